//! Structured search input, built directly in code:
//!
//! ```
//! use classmap::term::{ge, like, or, search};
//!
//! let terms = [search("name", like("fo%")), or([search("age", ge(21))])];
//! assert_eq!(classmap::term::to_text(&terms), "name => LIKE 'fo%', OR(age => GE 21)");
//! ```

use std::fmt;

use crate::date::IncompleteDate;
use crate::ir::{Combinator, Scalar};
use crate::lex::UNDEF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Compare {
    Eq,
    Ne,
    Like,
    Gt,
    Lt,
    Ge,
    Le,
    Match,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Scalar(Scalar),
    Null,
    Comparison(Compare, Scalar),
    Between(Scalar, Scalar),
    /// A bare list, read as an implicit BETWEEN
    Collection(Vec<Scalar>),
    Any(Vec<Scalar>),
    Not(Box<Operand>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Term {
    Search(String, Operand),
    Group(Combinator, Vec<Term>),
}

macro_rules! operand_from {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Operand {
            fn from(value: $ty) -> Self {
                Operand::Scalar(value.into())
            }
        })*
    };
}
operand_from!(Scalar, &str, String, i64, i32, u32, bool, IncompleteDate);

pub fn search(path: impl Into<String>, operand: impl Into<Operand>) -> Term {
    Term::Search(path.into(), operand.into())
}

pub fn and(terms: impl IntoIterator<Item = Term>) -> Term {
    Term::Group(Combinator::And, terms.into_iter().collect())
}

pub fn or(terms: impl IntoIterator<Item = Term>) -> Term {
    Term::Group(Combinator::Or, terms.into_iter().collect())
}

pub fn null() -> Operand {
    Operand::Null
}

pub fn eq(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Eq, value.into())
}

pub fn ne(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Ne, value.into())
}

pub fn like(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Like, value.into())
}

pub fn gt(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Gt, value.into())
}

pub fn lt(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Lt, value.into())
}

pub fn ge(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Ge, value.into())
}

pub fn le(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Le, value.into())
}

/// Case-insensitive regular expression match
pub fn matches(value: impl Into<Scalar>) -> Operand {
    Operand::Comparison(Compare::Match, value.into())
}

pub fn between(low: impl Into<Scalar>, high: impl Into<Scalar>) -> Operand {
    Operand::Between(low.into(), high.into())
}

pub fn range<S: Into<Scalar>>(values: impl IntoIterator<Item = S>) -> Operand {
    Operand::Collection(values.into_iter().map(Into::into).collect())
}

pub fn any<S: Into<Scalar>>(values: impl IntoIterator<Item = S>) -> Operand {
    Operand::Any(values.into_iter().map(Into::into).collect())
}

pub fn not(operand: impl Into<Operand>) -> Operand {
    Operand::Not(Box::new(operand.into()))
}

/// Renders terms in the textual grammar, comma separated.
pub fn to_text(terms: &[Term]) -> String {
    Terms(terms).to_string()
}

struct Terms<'a>(&'a [Term]);

impl fmt::Display for Terms<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{term}")?;
        }
        Ok(())
    }
}

struct Quoted<'a>(&'a Scalar);

impl fmt::Display for Quoted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Scalar::Int(_) | Scalar::Bool(_) => write!(f, "{}", self.0),
            Scalar::Str(_) | Scalar::Date(_) => {
                f.write_str("'")?;
                for c in self.0.to_string().chars() {
                    if c == '\'' || c == '\\' {
                        f.write_str("\\")?;
                    }
                    write!(f, "{c}")?;
                }
                f.write_str("'")
            }
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, values: &[Scalar]) -> fmt::Result {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", Quoted(value))?;
    }
    Ok(())
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Scalar(value) => write!(f, "{}", Quoted(value)),
            Operand::Null => f.write_str(UNDEF),
            Operand::Comparison(compare, value) => write!(f, "{compare} {}", Quoted(value)),
            Operand::Between(low, high) => write!(f, "BETWEEN [{}, {}]", Quoted(low), Quoted(high)),
            Operand::Collection(values) => {
                f.write_str("[")?;
                write_list(f, values)?;
                f.write_str("]")
            }
            Operand::Any(values) => {
                f.write_str("ANY(")?;
                write_list(f, values)?;
                f.write_str(")")
            }
            Operand::Not(inner) => write!(f, "NOT {inner}"),
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Search(path, operand) => write!(f, "{path} => {operand}"),
            Term::Group(combinator, terms) => write!(f, "{combinator}({})", Terms(terms)),
        }
    }
}
