//! The backend-independent search tree produced by the parser.

use std::fmt;

use crate::date::{IncompleteDate, Segments};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Combinator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::VariantNames)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Operator {
    Eq,
    Ne,
    Like,
    Gt,
    Lt,
    Ge,
    Le,
    Match,
    Between,
    Any,
}

impl Operator {
    /// The operator a negated comparison turns into, where one exists.
    pub fn inverse(self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Ne),
            Operator::Ne => Some(Operator::Eq),
            Operator::Gt => Some(Operator::Le),
            Operator::Lt => Some(Operator::Ge),
            Operator::Ge => Some(Operator::Lt),
            Operator::Le => Some(Operator::Gt),
            Operator::Like | Operator::Match | Operator::Between | Operator::Any => None,
        }
    }

    pub fn is_ordering(self) -> bool {
        matches!(self, Operator::Gt | Operator::Lt | Operator::Ge | Operator::Le)
    }
}

/// What a scalar is, for operand type consistency checks. Dates only match
///  dates with the same defined segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Str,
    Int,
    Bool,
    Date(Segments),
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::Str => f.write_str("string"),
            ScalarKind::Int => f.write_str("integer"),
            ScalarKind::Bool => f.write_str("boolean"),
            ScalarKind::Date(segments) if *segments == Segments::ALL => f.write_str("date"),
            ScalarKind::Date(segments) => write!(f, "date ({segments})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Str(String),
    Int(i64),
    Bool(bool),
    Date(IncompleteDate),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::Str(_) => ScalarKind::Str,
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Bool(_) => ScalarKind::Bool,
            Scalar::Date(date) => ScalarKind::Date(date.segments()),
        }
    }

    pub fn as_date(&self) -> Option<&IncompleteDate> {
        match self {
            Scalar::Date(date) => Some(date),
            _ => None,
        }
    }
}

/// Plain rendering, as handed to a token stream or a driver.
impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Str(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Bool(b) => f.write_str(if *b { "1" } else { "0" }),
            Scalar::Date(d) => write!(f, "{d}"),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<u32> for Scalar {
    fn from(value: u32) -> Self {
        Scalar::Int(value.into())
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

impl From<IncompleteDate> for Scalar {
    fn from(value: IncompleteDate) -> Self {
        Scalar::Date(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Scalar(Scalar),
    Pair(Scalar, Scalar),
    List(Vec<Scalar>),
    Null,
}

/// A dotted attribute path, e.g. `one.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(String);

impl Path {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub path: Path,
    pub operator: Operator,
    pub negated: bool,
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    pub combinator: Combinator,
    pub members: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Leaf(Leaf),
    Group(Group),
}

impl Node {
    pub fn leaf(path: impl Into<String>, operator: Operator, data: Value) -> Self {
        Node::Leaf(Leaf {
            path: Path::new(path),
            operator,
            negated: false,
            data,
        })
    }

    pub fn group(combinator: Combinator, members: Vec<Node>) -> Self {
        Node::Group(Group { combinator, members })
    }

    /// Flips the negation of a leaf. Groups are left alone.
    pub fn negate(mut self) -> Self {
        if let Node::Leaf(leaf) = &mut self {
            leaf.negated = !leaf.negated;
        }
        self
    }

    /// The AND/OR skeleton, used to check that compilation keeps grouping.
    pub fn shape(&self) -> Shape {
        match self {
            Node::Leaf(_) => Shape::Leaf,
            Node::Group(group) => Shape::Group(
                group.combinator,
                group.members.iter().map(Node::shape).collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shape {
    Leaf,
    Group(Combinator, Vec<Shape>),
}
