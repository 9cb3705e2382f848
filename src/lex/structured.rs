//! Lexer over structured [Term]s. It emits exactly the tokens the text lexer
//!  produces for the term's textual rendering, so the grammar never needs to
//!  know which form a search arrived in.

use std::collections::VecDeque;

use super::{Error, Token, TokenKind, TokenSource, is_identifier, is_reserved};
use crate::ir::Scalar;
use crate::term::{Operand, Term};

struct Frame<'a> {
    terms: std::slice::Iter<'a, Term>,
    started: bool,
    /// Emits `)` when exhausted
    closes: bool,
}

/// Walks nested groups with an explicit stack; tokens for a single search are
///  buffered, everything else is produced on demand.
pub struct Lexer<'a> {
    frames: Vec<Frame<'a>>,
    pending: VecDeque<Token>,
    /// Index of the search being lexed, reported in errors
    position: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(terms: &'a [Term]) -> Self {
        Self {
            frames: vec![Frame {
                terms: terms.iter(),
                started: false,
                closes: false,
            }],
            pending: VecDeque::new(),
            position: 0,
        }
    }

    pub fn next_token(&mut self) -> Result<Option<Token>, Error> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(Some(token));
            }
            let Some(frame) = self.frames.last_mut() else {
                return Ok(None);
            };
            let Some(term) = frame.terms.next() else {
                let closes = frame.closes;
                self.frames.pop();
                if closes {
                    return Ok(Some(Token::op(")")));
                }
                continue;
            };
            if frame.started {
                self.pending.push_back(Token::op(","));
            }
            frame.started = true;

            match term {
                Term::Search(path, operand) => {
                    if !is_identifier(path) || is_reserved(path) {
                        return Err(Error::UnexpectedInput {
                            fragment: path.clone(),
                            offset: self.position,
                        });
                    }
                    self.position += 1;
                    self.pending.push_back(Token::new(TokenKind::Identifier, path));
                    self.pending.push_back(Token::op("=>"));
                    push_operand(&mut self.pending, operand);
                }
                Term::Group(combinator, terms) => {
                    self.pending
                        .push_back(Token::new(TokenKind::Keyword, combinator.to_string()));
                    self.pending.push_back(Token::op("("));
                    self.frames.push(Frame {
                        terms: terms.iter(),
                        started: false,
                        closes: true,
                    });
                }
            }
        }
    }
}

impl TokenSource for Lexer<'_> {
    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        Lexer::next_token(self)
    }
}

fn value(scalar: &Scalar) -> Token {
    Token::new(TokenKind::Value, scalar.to_string())
}

fn push_list(pending: &mut VecDeque<Token>, open: &str, values: &[Scalar], close: &str) {
    pending.push_back(Token::op(open));
    for (i, scalar) in values.iter().enumerate() {
        if i > 0 {
            pending.push_back(Token::op(","));
        }
        pending.push_back(value(scalar));
    }
    pending.push_back(Token::op(close));
}

fn push_operand(pending: &mut VecDeque<Token>, operand: &Operand) {
    match operand {
        Operand::Scalar(scalar) => pending.push_back(value(scalar)),
        Operand::Null => pending.push_back(Token::undef()),
        Operand::Comparison(compare, scalar) => {
            pending.push_back(Token::new(TokenKind::Compare, compare.to_string()));
            pending.push_back(value(scalar));
        }
        Operand::Between(low, high) => {
            pending.push_back(Token::new(TokenKind::Keyword, "BETWEEN"));
            push_list(pending, "[", &[low.clone(), high.clone()], "]");
        }
        Operand::Collection(values) => push_list(pending, "[", values, "]"),
        Operand::Any(values) => {
            pending.push_back(Token::new(TokenKind::Keyword, "ANY"));
            push_list(pending, "(", values, ")");
        }
        Operand::Not(inner) => {
            pending.push_back(Token::new(TokenKind::Keyword, "NOT"));
            push_operand(pending, inner);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lex::{text, tokenize};
    use crate::term::*;

    #[test]
    fn matches_text_lexer() {
        let terms = [
            search("name", like("fo%")),
            search("age", ge(21)),
            or([
                search("a.b", between(1, 2)),
                and([search("c", any(["x", "y"])), search("d", not(null()))]),
            ]),
            search("e", range([3, 4])),
        ];
        let structured = tokenize(Lexer::new(&terms)).unwrap();
        let text = tokenize(text::Lexer::new(&to_text(&terms))).unwrap();
        assert_eq!(structured, text);
        assert_eq!(structured.len(), 46);
    }

    #[test]
    fn empty_groups() {
        let terms = [or([])];
        let tokens = tokenize(Lexer::new(&terms)).unwrap();
        assert_eq!(tokens, [
            Token::new(TokenKind::Keyword, "OR"),
            Token::op("("),
            Token::op(")")
        ]);
        assert!(tokenize(Lexer::new(&[])).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_identifiers() {
        let terms = [search("ok", 1), search("not ok", 2)];
        let mut lexer = Lexer::new(&terms);
        for _ in 0..3 {
            lexer.next_token().unwrap();
        }
        assert_eq!(
            lexer.next_token(),
            Err(Error::UnexpectedInput {
                fragment: "not ok".into(),
                offset: 1
            })
        );
        assert!(tokenize(Lexer::new(&[search("AND", 1)])).is_err());
    }
}
