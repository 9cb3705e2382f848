//! Recursive-descent parser turning a token stream into the search [Node]
//!  tree.
//!
//! ```text
//! statements := statement (',' statement)* ','?
//! statement  := search | ('AND' | 'OR') '(' statements ')'
//! search     := identifier '=>'? 'NOT'? operand
//! operand    := value | NULL | compare (value | NULL) | between | any
//! between    := 'BETWEEN'? '[' value (',' | '=>') value ','? ']'
//! any        := 'ANY' '(' value ((',' | '=>') value)* ','? ')'
//! ```
//!
//! Attribute paths are checked against the search class as they're read and
//!  values are coerced to the attribute's type, so a successfully parsed tree
//!  only refers to real, persistent attributes.

use std::collections::VecDeque;
use std::mem::discriminant;

use tracing::{debug, trace};

use crate::date::IncompleteDate;
use crate::ir::{Combinator, Leaf, Node, Operator, Path, Scalar, Value};
use crate::lex::{self, Token, TokenKind, TokenSource};
use crate::meta::{MetadataGateway, SemanticType};
use crate::term::Term;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lexical(#[from] lex::Error),
    #[error("syntax error: {message}, near `{near}`")]
    Syntax { message: String, near: String },
    #[error("no searchable attribute `{path}` in class `{class}`")]
    UnknownAttribute { path: String, class: String },
    #[error("unknown class `{0}`")]
    UnknownClass(String),
    #[error("type mismatch for `{path}`: {message}")]
    TypeMismatch { path: String, message: String },
}

/// How many consumed tokens are quoted back in syntax errors
const CONTEXT_TOKENS: usize = 4;

/// Deepest AND/OR nesting accepted. Parsing, compiling and printing all
///  recurse per level, so unbounded input could exhaust the stack.
pub const MAX_DEPTH: usize = 128;

/// Parses a token stream into a top-level AND group.
pub fn parse<S, G>(tokens: S, gateway: &G, class: &str) -> Result<Node, Error>
where
    S: TokenSource,
    G: MetadataGateway + ?Sized,
{
    if gateway.resolve(class).is_none() {
        return Err(Error::UnknownClass(class.to_string()));
    }
    let mut parser = Parser {
        tokens,
        peeked: None,
        recent: VecDeque::with_capacity(CONTEXT_TOKENS),
        depth: 0,
        gateway,
        class,
    };
    let members = parser.statements()?;
    debug!(class, members = members.len(), "parsed search");
    Ok(Node::group(Combinator::And, members))
}

pub fn parse_text<G>(input: &str, gateway: &G, class: &str) -> Result<Node, Error>
where
    G: MetadataGateway + ?Sized,
{
    parse(lex::text::Lexer::new(input), gateway, class)
}

pub fn parse_terms<G>(terms: &[Term], gateway: &G, class: &str) -> Result<Node, Error>
where
    G: MetadataGateway + ?Sized,
{
    parse(lex::structured::Lexer::new(terms), gateway, class)
}

struct Parser<'a, S, G: ?Sized> {
    tokens: S,
    peeked: Option<Token>,
    recent: VecDeque<String>,
    depth: usize,
    gateway: &'a G,
    class: &'a str,
}

impl<S: TokenSource, G: MetadataGateway + ?Sized> Parser<'_, S, G> {
    fn peek(&mut self) -> Result<Option<&Token>, Error> {
        if self.peeked.is_none() {
            self.peeked = self.tokens.next_token()?;
        }
        Ok(self.peeked.as_ref())
    }

    fn next(&mut self) -> Result<Option<Token>, Error> {
        let token = match self.peeked.take() {
            Some(token) => Some(token),
            None => self.tokens.next_token()?,
        };
        if let Some(token) = &token {
            trace!(kind = %token.kind, text = %token.text, "token");
            if self.recent.len() == CONTEXT_TOKENS {
                self.recent.pop_front();
            }
            self.recent.push_back(token.to_string());
        }
        Ok(token)
    }

    fn at(&mut self, kind: TokenKind, text: &str) -> Result<bool, Error> {
        Ok(self.peek()?.is_some_and(|t| t.is(kind, text)))
    }

    /// Consumes the next token if it matches.
    fn eat(&mut self, kind: TokenKind, text: &str) -> Result<bool, Error> {
        if self.at(kind, text)? {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, kind: TokenKind, text: &str) -> Result<(), Error> {
        if self.eat(kind, text)? {
            Ok(())
        } else {
            self.peek()?;
            Err(self.syntax(format!("expected `{text}`")))
        }
    }

    fn syntax(&self, message: impl Into<String>) -> Error {
        let mut near: Vec<&str> = self.recent.iter().map(String::as_str).collect();
        let peeked = self.peeked.as_ref().map(Token::to_string);
        near.extend(peeked.as_deref());
        if self.peeked.is_none() {
            near.push("<end>");
        }
        Error::Syntax {
            message: message.into(),
            near: near.join(" "),
        }
    }

    fn statements(&mut self) -> Result<Vec<Node>, Error> {
        let mut members = Vec::new();
        while self.peek()?.is_some() {
            members.push(self.statement()?);
            if !self.eat(TokenKind::Op, ",")? {
                break;
            }
        }
        if self.peek()?.is_some() {
            return Err(self.syntax("expected `,` between searches"));
        }
        Ok(members)
    }

    fn statement(&mut self) -> Result<Node, Error> {
        let Some(token) = self.next()? else {
            return Err(self.syntax("expected a search"));
        };
        match token.kind {
            TokenKind::Identifier => self.search(token.text),
            TokenKind::Keyword if token.text == "AND" => self.group(Combinator::And),
            TokenKind::Keyword if token.text == "OR" => self.group(Combinator::Or),
            _ => Err(self.syntax("expected an attribute name, AND or OR")),
        }
    }

    fn group(&mut self, combinator: Combinator) -> Result<Node, Error> {
        self.expect(TokenKind::Op, "(")?;
        if self.depth == MAX_DEPTH {
            return Err(self.syntax(format!("groups nested deeper than {MAX_DEPTH}")));
        }
        self.depth += 1;
        let mut members = Vec::new();
        while !self.at(TokenKind::Op, ")")? {
            members.push(self.statement()?);
            if !self.eat(TokenKind::Op, ",")? {
                break;
            }
        }
        self.expect(TokenKind::Op, ")")?;
        self.depth -= 1;
        if members.is_empty() {
            return Err(self.syntax(format!("empty {combinator} group")));
        }
        Ok(Node::group(combinator, members))
    }

    fn search(&mut self, path: String) -> Result<Node, Error> {
        let ty = self
            .gateway
            .resolve_path(self.class, &path)
            .map(|resolved| resolved.attribute.search_type())
            .ok_or_else(|| Error::UnknownAttribute {
                path: path.clone(),
                class: self.class.to_string(),
            })?;
        self.eat(TokenKind::Op, "=>")?;
        let negated = self.eat(TokenKind::Keyword, "NOT")?;
        let (operator, data) = self.operand(&path, &ty)?;
        Ok(Node::Leaf(Leaf {
            path: Path::new(path),
            operator,
            negated,
            data,
        }))
    }

    fn operand(&mut self, path: &str, ty: &SemanticType) -> Result<(Operator, Value), Error> {
        let Some(token) = self.next()? else {
            return Err(self.syntax("expected a value"));
        };
        match token.kind {
            TokenKind::Value => Ok((Operator::Eq, Value::Scalar(coerce(path, ty, token.text)?))),
            TokenKind::Undef => Ok((Operator::Eq, Value::Null)),
            TokenKind::Compare => {
                let operator: Operator = token
                    .text
                    .parse()
                    .map_err(|_| self.syntax("unknown comparison"))?;
                match self.next()? {
                    Some(t) if t.kind == TokenKind::Value => {
                        Ok((operator, Value::Scalar(coerce(path, ty, t.text)?)))
                    }
                    Some(t) if t.kind == TokenKind::Undef && matches!(operator, Operator::Eq | Operator::Ne) => {
                        Ok((operator, Value::Null))
                    }
                    _ => Err(self.syntax(format!("{operator} needs a value"))),
                }
            }
            TokenKind::Keyword if token.text == "BETWEEN" => {
                self.expect(TokenKind::Op, "[")?;
                self.between(path, ty)
            }
            TokenKind::Op if token.text == "[" => self.between(path, ty),
            TokenKind::Keyword if token.text == "ANY" => {
                self.expect(TokenKind::Op, "(")?;
                self.any(path, ty)
            }
            _ => Err(self.syntax("expected a value, comparison, BETWEEN or ANY")),
        }
    }

    // Opening bracket already consumed
    fn values(&mut self, path: &str, ty: &SemanticType, close: &str) -> Result<Vec<Scalar>, Error> {
        let mut values = Vec::new();
        loop {
            if self.eat(TokenKind::Op, close)? {
                return Ok(values);
            }
            match self.next()? {
                Some(t) if t.kind == TokenKind::Value => values.push(coerce(path, ty, t.text)?),
                _ => return Err(self.syntax(format!("expected a value or `{close}`"))),
            }
            if self.eat(TokenKind::Op, close)? {
                return Ok(values);
            }
            if !(self.eat(TokenKind::Op, ",")? || self.eat(TokenKind::Op, "=>")?) {
                return Err(self.syntax(format!("expected `,` or `{close}`")));
            }
        }
    }

    fn between(&mut self, path: &str, ty: &SemanticType) -> Result<(Operator, Value), Error> {
        let values = self.values(path, ty, "]")?;
        let found = values.len();
        let Ok([low, high]) = <[Scalar; 2]>::try_from(values) else {
            return Err(self.syntax(format!("BETWEEN needs exactly two values, found {found}")));
        };
        if low.kind() != high.kind() {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                message: format!("BETWEEN operands differ: {} and {}", low.kind(), high.kind()),
            });
        }
        Ok((Operator::Between, Value::Pair(low, high)))
    }

    fn any(&mut self, path: &str, ty: &SemanticType) -> Result<(Operator, Value), Error> {
        let values = self.values(path, ty, ")")?;
        let Some(first) = values.first() else {
            return Err(self.syntax("ANY needs at least one value"));
        };
        if let Some(odd) = values.iter().find(|v| discriminant(*v) != discriminant(first)) {
            return Err(Error::TypeMismatch {
                path: path.to_string(),
                message: format!("ANY mixes {} and {}", first.kind(), odd.kind()),
            });
        }
        Ok((Operator::Any, Value::List(values)))
    }
}

fn mismatch(path: &str, text: &str, expected: &str) -> Error {
    Error::TypeMismatch {
        path: path.to_string(),
        message: format!("`{text}` is not {expected}"),
    }
}

/// Tokens only carry text; the attribute decides what the value is.
fn coerce(path: &str, ty: &SemanticType, text: String) -> Result<Scalar, Error> {
    if ty.is_integral() {
        return text
            .parse()
            .map(Scalar::Int)
            .map_err(|_| mismatch(path, &text, "an integer"));
    }
    match ty {
        SemanticType::Boolean => match text.to_ascii_lowercase().as_str() {
            "1" | "true" => Ok(Scalar::Bool(true)),
            "0" | "false" => Ok(Scalar::Bool(false)),
            _ => Err(mismatch(path, &text, "a boolean")),
        },
        SemanticType::Datetime => text
            .parse::<IncompleteDate>()
            .map(Scalar::Date)
            .map_err(|_| mismatch(path, &text, "a date")),
        _ => Ok(Scalar::Str(text)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::{AttributeDescriptor, Catalog, ClassDescriptor, OnDelete};
    use crate::term::*;

    fn catalog() -> Catalog {
        Catalog::builder()
            .class(
                ClassDescriptor::standard("person")
                    .attribute(AttributeDescriptor::new("name", SemanticType::String))
                    .attribute(AttributeDescriptor::new("age", SemanticType::Integer))
                    .attribute(AttributeDescriptor::new("active", SemanticType::Boolean))
                    .attribute(AttributeDescriptor::new("born", SemanticType::Datetime))
                    .attribute(AttributeDescriptor::new("secret", SemanticType::String).transient()),
            )
            .class(ClassDescriptor::standard("pet").attribute(
                AttributeDescriptor::new("owner", SemanticType::Whole).references("person", OnDelete::Cascade),
            ))
            .build()
            .unwrap()
    }

    fn leaf(path: &str, operator: Operator, data: Value) -> Node {
        Node::leaf(path, operator, data)
    }

    fn text(s: &str) -> Value {
        Value::Scalar(Scalar::Str(s.into()))
    }

    fn int(i: i64) -> Value {
        Value::Scalar(Scalar::Int(i))
    }

    fn date(s: &str) -> Scalar {
        Scalar::Date(s.parse().unwrap())
    }

    #[test]
    fn like_then_or_group() {
        let catalog = catalog();
        let expected = Node::group(
            Combinator::And,
            vec![
                leaf("name", Operator::Like, text("fo%")),
                Node::group(Combinator::Or, vec![leaf("age", Operator::Ge, int(21))]),
            ],
        );
        let parsed = parse_text("name => LIKE 'fo%', OR(age => GE 21)", &catalog, "person").unwrap();
        assert_eq!(parsed, expected);

        let terms = [search("name", like("fo%")), or([search("age", ge(21))])];
        assert_eq!(parse_terms(&terms, &catalog, "person").unwrap(), expected);
    }

    #[test]
    fn implied_operators() {
        let catalog = catalog();
        let parsed = parse_text("name 'x', age [1, 5], born => NULL, active 'true',", &catalog, "person").unwrap();
        assert_eq!(
            parsed,
            Node::group(
                Combinator::And,
                vec![
                    leaf("name", Operator::Eq, text("x")),
                    leaf("age", Operator::Between, Value::Pair(Scalar::Int(1), Scalar::Int(5))),
                    leaf("born", Operator::Eq, Value::Null),
                    leaf("active", Operator::Eq, Value::Scalar(Scalar::Bool(true))),
                ]
            )
        );
    }

    #[test]
    fn negation_and_null_comparisons() {
        let catalog = catalog();
        let parsed = parse_text(
            "name NOT LIKE 'a%', name => NOT NULL, age => NE NULL, age NOT BETWEEN [2 => 4]",
            &catalog,
            "person",
        )
        .unwrap();
        assert_eq!(
            parsed,
            Node::group(
                Combinator::And,
                vec![
                    leaf("name", Operator::Like, text("a%")).negate(),
                    leaf("name", Operator::Eq, Value::Null).negate(),
                    leaf("age", Operator::Ne, Value::Null),
                    leaf("age", Operator::Between, Value::Pair(Scalar::Int(2), Scalar::Int(4))).negate(),
                ]
            )
        );
    }

    #[test]
    fn nested_groups_and_any() {
        let catalog = catalog();
        let parsed = parse_text(
            "OR(name => 'a', AND(age => ANY(1, 2, 3,), active => 0),)",
            &catalog,
            "person",
        )
        .unwrap();
        assert_eq!(
            parsed.shape(),
            Node::group(
                Combinator::And,
                vec![Node::group(
                    Combinator::Or,
                    vec![
                        leaf("name", Operator::Eq, Value::Null),
                        Node::group(
                            Combinator::And,
                            vec![
                                leaf("age", Operator::Eq, Value::Null),
                                leaf("age", Operator::Eq, Value::Null)
                            ]
                        )
                    ]
                )]
            )
            .shape()
        );
    }

    #[test]
    fn dotted_paths() {
        let catalog = catalog();
        let parsed = parse_text("owner.name => 'Ann', owner => 7", &catalog, "pet").unwrap();
        assert_eq!(
            parsed,
            Node::group(
                Combinator::And,
                vec![leaf("owner.name", Operator::Eq, text("Ann")), leaf("owner", Operator::Eq, int(7))]
            )
        );
    }

    #[test]
    fn empty_search() {
        let catalog = catalog();
        assert_eq!(
            parse_text("  ", &catalog, "person").unwrap(),
            Node::group(Combinator::And, vec![])
        );
    }

    #[test]
    fn unknown_names() {
        let catalog = catalog();
        assert_eq!(
            parse_text("nope => 1", &catalog, "person"),
            Err(Error::UnknownAttribute {
                path: "nope".into(),
                class: "person".into()
            })
        );
        assert!(matches!(
            parse_text("secret => 'x'", &catalog, "person"),
            Err(Error::UnknownAttribute { .. })
        ));
        assert!(matches!(
            parse_text("owner.nope => 'x'", &catalog, "pet"),
            Err(Error::UnknownAttribute { .. })
        ));
        assert_eq!(
            parse_text("name => 1", &catalog, "ghost"),
            Err(Error::UnknownClass("ghost".into()))
        );
    }

    #[test]
    fn syntax_errors() {
        let catalog = catalog();
        for input in [
            "name =>",
            "name => LIKE",
            "name => GT NULL",
            "OR()",
            "AND(name => 'x'",
            "name => 'x' age => 1",
            ", name => 'x'",
            "name => 'x',, age => 1",
            "age => ANY()",
            "age => [1]",
            "age => BETWEEN [1, 2, 3]",
            "age => BETWEEN (1, 2)",
            "=> 'x'",
        ] {
            assert!(
                matches!(parse_text(input, &catalog, "person"), Err(Error::Syntax { .. })),
                "{input}"
            );
        }
    }

    #[test]
    fn nesting_is_bounded() {
        let catalog = catalog();
        let nested = |depth: usize| format!("{}age => 1{}", "AND(".repeat(depth), ")".repeat(depth));
        assert!(parse_text(&nested(MAX_DEPTH), &catalog, "person").is_ok());
        for depth in [MAX_DEPTH + 1, 2000] {
            assert!(
                matches!(parse_text(&nested(depth), &catalog, "person"), Err(Error::Syntax { .. })),
                "{depth}"
            );
        }

        let mut term = search("age", 1);
        for _ in 0..=MAX_DEPTH {
            term = or([term]);
        }
        assert!(matches!(
            parse_terms(&[term], &catalog, "person"),
            Err(Error::Syntax { .. })
        ));
    }

    #[test]
    fn syntax_errors_quote_the_input() {
        let catalog = catalog();
        let Err(Error::Syntax { near, .. }) = parse_text("name => 'x' age => 1", &catalog, "person") else {
            panic!("expected a syntax error");
        };
        assert_eq!(near, "name => 'x' age");
    }

    #[test]
    fn type_errors() {
        let catalog = catalog();
        assert_eq!(
            parse_text("age => GE 'old'", &catalog, "person"),
            Err(Error::TypeMismatch {
                path: "age".into(),
                message: "`old` is not an integer".into()
            })
        );
        assert!(matches!(
            parse_text("born => 'someday'", &catalog, "person"),
            Err(Error::TypeMismatch { .. })
        ));
        assert!(matches!(
            parse_text("active => 'maybe'", &catalog, "person"),
            Err(Error::TypeMismatch { .. })
        ));
    }

    #[test]
    fn between_dates_need_the_same_segments() {
        let catalog = catalog();
        let err = parse_text(
            "born => BETWEEN ['xxxx-05-xxTxx:xx:xx', 'xxxx-xx-10Txx:xx:xx']",
            &catalog,
            "person",
        )
        .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch { .. }), "{err}");

        let parsed = parse_text(
            "born => ['xxxx-05-xxTxx:xx:xx', 'xxxx-07-xxTxx:xx:xx']",
            &catalog,
            "person",
        )
        .unwrap();
        assert_eq!(
            parsed,
            Node::group(
                Combinator::And,
                vec![leaf(
                    "born",
                    Operator::Between,
                    Value::Pair(date("xxxx-05-xxTxx:xx:xx"), date("xxxx-07-xxTxx:xx:xx"))
                )]
            )
        );
    }

    #[test]
    fn lexical_errors_pass_through() {
        let catalog = catalog();
        assert!(matches!(
            parse_text("name => 'open", &catalog, "person"),
            Err(Error::Lexical(lex::Error::UnterminatedString { offset: 8 }))
        ));
    }
}
