//! Lexer for the textual search grammar:
//!
//! ```text
//! name => LIKE 'fo%', OR(age => GE 21, age => NULL)
//! ```

use super::{Error, Token, TokenKind, TokenSource, classify_word};

/// Holds the source and an index, so it's cheap to clone when the caller
///  wants to look ahead and rewind.
#[derive(Clone)]
pub struct Lexer<'input> {
    source: &'input str,
    current: usize,
}

impl<'input> Lexer<'input> {
    pub fn new(source: &'input str) -> Self {
        Self { source, current: 0 }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.current >= self.source.len()
    }

    #[inline]
    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.current).copied()
    }

    #[inline]
    fn peek_at(&self, at: usize) -> Option<u8> {
        self.source.as_bytes().get(self.current + at).copied()
    }

    /// Byte offset of the next unread input
    #[inline]
    pub fn offset(&self) -> usize {
        self.current
    }

    #[inline]
    fn consume_while(&mut self, predicate: impl Fn(u8) -> bool) {
        while let Some(c) = self.peek()
            && predicate(c)
        {
            self.current += 1;
        }
    }

    #[inline]
    fn consume_whitespace(&mut self) {
        self.consume_while(|b| b.is_ascii_whitespace());
    }

    // `-?\d+(\.\d+)?`
    fn consume_number(&mut self) {
        if self.peek() == Some(b'-') {
            self.current += 1;
        }
        self.consume_while(|b| b.is_ascii_digit());
        if self.peek() == Some(b'.')
            && let Some(d) = self.peek_at(1)
            && d.is_ascii_digit()
        {
            self.current += 1;
            self.consume_while(|b| b.is_ascii_digit());
        }
    }

    // Opening quote already consumed. Backslash escapes the next character.
    fn consume_string(&mut self, quote: u8, start: usize) -> Result<String, Error> {
        let mut contents = String::new();
        let mut chars = self.source[self.current..].char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some((_, escaped)) => contents.push(escaped),
                    None => break,
                },
                c if c as u32 == u32::from(quote) => {
                    self.current += i + 1;
                    return Ok(contents);
                }
                c => contents.push(c),
            }
        }
        Err(Error::UnterminatedString { offset: start })
    }

    fn unexpected(&self, offset: usize) -> Error {
        let fragment = self.source[offset..]
            .split(|c: char| c.is_whitespace())
            .next()
            .unwrap_or_default()
            .chars()
            .take(24)
            .collect();
        Error::UnexpectedInput { fragment, offset }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, Error> {
        self.consume_whitespace();

        let Some(first) = self.peek() else {
            return Ok(None);
        };
        let start = self.current;

        let token = match first {
            b'\'' | b'"' => {
                self.current += 1;
                Token::new(TokenKind::Value, self.consume_string(first, start)?)
            }
            b'0'..=b'9' => {
                self.consume_number();
                Token::new(TokenKind::Value, &self.source[start..self.current])
            }
            b'-' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => {
                self.consume_number();
                Token::new(TokenKind::Value, &self.source[start..self.current])
            }
            b'a'..=b'z' | b'A'..=b'Z' => {
                self.consume_while(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.');
                let word = &self.source[start..self.current];
                match classify_word(word) {
                    TokenKind::Undef => Token::undef(),
                    kind => Token::new(kind, word),
                }
            }
            b'=' if self.peek_at(1) == Some(b'>') => {
                self.current += 2;
                Token::op("=>")
            }
            b',' | b'[' | b']' | b'(' | b')' => {
                self.current += 1;
                Token::new(TokenKind::Op, &self.source[start..self.current])
            }
            _ => return Err(self.unexpected(start)),
        };
        Ok(Some(token))
    }
}

impl TokenSource for Lexer<'_> {
    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        Lexer::next_token(self)
    }
}
