//! Tokens shared by both search input forms.
//!
//! [text::Lexer] reads the textual grammar, [structured::Lexer] walks
//!  [crate::term::Term]s. For the same search both produce the same token
//!  sequence, so one parser serves both.

pub mod structured;
pub mod text;

use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, strum::Display)]
pub enum TokenKind {
    Identifier,
    /// Punctuation: `,` `[` `]` `(` `)` `=>`
    Op,
    Compare,
    Keyword,
    Value,
    Undef,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
        }
    }

    pub fn op(text: &str) -> Self {
        Self::new(TokenKind::Op, text)
    }

    pub fn undef() -> Self {
        Self::new(TokenKind::Undef, UNDEF)
    }

    #[inline]
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TokenKind::Value => write!(f, "'{}'", self.text),
            _ => f.write_str(&self.text),
        }
    }
}

/// Canonical text of the undefined-value token
pub const UNDEF: &str = "NULL";

pub const COMPARE_WORDS: [&str; 8] = ["LIKE", "GT", "LT", "GE", "LE", "NE", "MATCH", "EQ"];
pub const KEYWORDS: [&str; 5] = ["BETWEEN", "AND", "OR", "ANY", "NOT"];

/// Words that never lex as identifiers.
pub fn is_reserved(word: &str) -> bool {
    word == UNDEF || word == "undef" || COMPARE_WORDS.contains(&word) || KEYWORDS.contains(&word)
}

/// Classifies a complete word the way both lexers do.
pub(crate) fn classify_word(word: &str) -> TokenKind {
    if word == UNDEF || word == "undef" {
        TokenKind::Undef
    } else if COMPARE_WORDS.contains(&word) {
        TokenKind::Compare
    } else if KEYWORDS.contains(&word) {
        TokenKind::Keyword
    } else {
        TokenKind::Identifier
    }
}

/// `[alpha][word.]*`
pub fn is_identifier(word: &str) -> bool {
    let mut bytes = word.bytes();
    bytes.next().is_some_and(|b| b.is_ascii_alphabetic())
        && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'.')
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("unexpected input at {offset}: `{fragment}`")]
    UnexpectedInput { fragment: String, offset: usize },
    #[error("unterminated string literal starting at {offset}")]
    UnterminatedString { offset: usize },
}

pub trait TokenSource {
    fn next_token(&mut self) -> Result<Option<Token>, Error>;
}

impl<T: TokenSource + ?Sized> TokenSource for &mut T {
    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        (**self).next_token()
    }
}

/// Drains a token source.
pub fn tokenize(mut source: impl TokenSource) -> Result<Vec<Token>, Error> {
    let mut tokens = Vec::new();
    while let Some(token) = source.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}
