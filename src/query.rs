//! Compiles a search [Node] tree into a parameterized WHERE clause.
//!
//! Values never reach the SQL text: every scalar becomes a `?` placeholder and
//!  is pushed onto the bind list in placeholder order.

use tracing::debug;

use crate::date::Segments;
use crate::ir::{Combinator, Leaf, Node, Path, Scalar};
use crate::meta::{MetadataGateway, SemanticType};
use crate::to_sql::{PrinterConfig, Printer};

pub mod postgres;
pub mod sqlite;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no searchable attribute `{path}` in class `{class}`")]
    UnknownAttribute { path: String, class: String },
    #[error("type mismatch for `{path}`: {message}")]
    TypeMismatch { path: String, message: String },
    #[error("invalid search constraints: {0}")]
    Syntax(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Parenthesize {
    Yes,
    #[default]
    No,
}

impl Parenthesize {
    pub fn open(&self, out: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.write(out, "(")
    }
    pub fn close(&self, out: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.write(out, ")")
    }
    fn write(&self, out: &mut std::fmt::Formatter, s: &str) -> std::fmt::Result {
        if self == &Parenthesize::Yes {
            out.write_str(s)
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    Match,
    NotMatch,
}

/// The SQL side of compilation: an IR tree goes in, one of these comes out
///  and is printed by [crate::to_sql].
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Column {
        name: String,
        /// Wrap in the case-folding function
        fold: bool,
    },
    Placeholder {
        fold: bool,
    },
    /// The defined segments of a datetime column, formatted as a string
    DatePart {
        column: String,
        segments: Segments,
    },
    Compare(Box<Fragment>, CompareOp, Box<Fragment>),
    Between {
        subject: Box<Fragment>,
        low: Box<Fragment>,
        high: Box<Fragment>,
        negated: bool,
    },
    In {
        subject: Box<Fragment>,
        items: Vec<Fragment>,
        negated: bool,
    },
    IsNull {
        subject: Box<Fragment>,
        negated: bool,
    },
    Group {
        combinator: Combinator,
        members: Vec<Fragment>,
        parenthesize: Parenthesize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "UPPERCASE")
)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// Ordering and paging applied to a search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct Constraints {
    pub order_by: Vec<String>,
    /// Paired with `order_by` by position; missing entries sort ascending
    pub sort_order: Vec<SortOrder>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// A compiled search, ready for the store layer to execute.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Compiled {
    /// Without the `WHERE` keyword; empty when the search has no constraints
    pub where_clause: String,
    pub order_clause: String,
    pub limit_clause: String,
    /// One per placeholder, in order, LIMIT/OFFSET values last
    pub binds: Vec<Scalar>,
}

impl Compiled {
    pub fn select_sql(&self, view: &str) -> String {
        let mut sql = format!("SELECT * FROM {view}");
        if !self.where_clause.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.where_clause);
        }
        for clause in [&self.order_clause, &self.limit_clause] {
            if !clause.is_empty() {
                sql.push(' ');
                sql.push_str(clause);
            }
        }
        sql
    }
}

/// Lets each backend control compilation. A new backend can delegate to the
///  PostgreSQL functions in [postgres] and intercept only what differs, which
///  is what [sqlite::Compiler] does.
pub trait QueryContext {
    /// Resolves a search path to its view column and the type values of that
    ///  column are compared as.
    fn lookup_column(&self, path: &Path) -> Result<(String, SemanticType), Error>;

    /// Compiles one leaf, pushing its bind values.
    fn compile_leaf(&self, leaf: &Leaf, binds: &mut Vec<Scalar>) -> Result<Fragment, Error>;

    fn printer(&self) -> PrinterConfig;

    /// Converts a value into what the driver expects for this backend.
    fn bind_value(&self, value: Scalar) -> Scalar {
        value
    }

    fn limit_clause(
        &self,
        limit: Option<u64>,
        offset: Option<u64>,
        binds: &mut Vec<Scalar>,
    ) -> Result<String, Error> {
        let mut clauses = Vec::new();
        if let Some(limit) = limit {
            binds.push(Scalar::Int(to_bind(limit, "limit")?));
            clauses.push("LIMIT ?");
        }
        if let Some(offset) = offset {
            binds.push(Scalar::Int(to_bind(offset, "offset")?));
            clauses.push("OFFSET ?");
        }
        Ok(clauses.join(" "))
    }
}

pub(crate) fn to_bind(value: u64, what: &str) -> Result<i64, Error> {
    i64::try_from(value).map_err(|_| Error::Syntax(format!("{what} {value} is out of range")))
}

/// Resolves paths against a class through the metadata gateway.
pub(crate) fn lookup_column<G>(gateway: &G, class: &str, path: &Path) -> Result<(String, SemanticType), Error>
where
    G: MetadataGateway + ?Sized,
{
    gateway
        .resolve_path(class, path.as_str())
        .map(|resolved| (resolved.column, resolved.attribute.search_type()))
        .ok_or_else(|| Error::UnknownAttribute {
            path: path.to_string(),
            class: class.to_string(),
        })
}

pub fn compile(node: &Node, constraints: &Constraints, cx: &impl QueryContext) -> Result<Compiled, Error> {
    let mut binds = Vec::new();
    let where_clause = match compile_node(node, cx, &mut binds, Parenthesize::No)? {
        Some(fragment) => Printer::new(fragment, cx.printer()).to_string(),
        None => String::new(),
    };
    let order_clause = order_clause(constraints, cx)?;
    let limit_clause = cx.limit_clause(constraints.limit, constraints.offset, &mut binds)?;
    debug!(
        where_clause = %where_clause,
        binds = binds.len(),
        "compiled search"
    );
    Ok(Compiled {
        where_clause,
        order_clause,
        limit_clause,
        binds,
    })
}

// Empty groups constrain nothing and compile to `None`.
fn compile_node(
    node: &Node,
    cx: &impl QueryContext,
    binds: &mut Vec<Scalar>,
    parenthesize: Parenthesize,
) -> Result<Option<Fragment>, Error> {
    match node {
        Node::Leaf(leaf) => cx.compile_leaf(leaf, binds).map(Some),
        Node::Group(group) => {
            let mut members = Vec::with_capacity(group.members.len());
            for member in &group.members {
                if let Some(fragment) = compile_node(member, cx, binds, Parenthesize::Yes)? {
                    members.push(fragment);
                }
            }
            Ok((!members.is_empty()).then_some(Fragment::Group {
                combinator: group.combinator,
                members,
                parenthesize,
            }))
        }
    }
}

fn order_clause(constraints: &Constraints, cx: &impl QueryContext) -> Result<String, Error> {
    if constraints.sort_order.len() > constraints.order_by.len() {
        return Err(Error::Syntax(format!(
            "{} sort orders for {} order_by attributes",
            constraints.sort_order.len(),
            constraints.order_by.len()
        )));
    }
    if constraints.order_by.is_empty() {
        return Ok(String::new());
    }
    let mut terms = Vec::with_capacity(constraints.order_by.len());
    for (i, path) in constraints.order_by.iter().enumerate() {
        let (column, _) = cx.lookup_column(&Path::new(path.as_str()))?;
        let order = constraints.sort_order.get(i).copied().unwrap_or_default();
        terms.push(format!("{column} {order}"));
    }
    Ok(format!("ORDER BY {}", terms.join(", ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_sql() {
        let compiled = Compiled {
            where_clause: "age > ?".into(),
            order_clause: "ORDER BY name ASC".into(),
            limit_clause: "LIMIT ?".into(),
            binds: vec![Scalar::Int(1), Scalar::Int(10)],
        };
        assert_eq!(
            compiled.select_sql("person"),
            "SELECT * FROM person WHERE age > ? ORDER BY name ASC LIMIT ?"
        );
        assert_eq!(Compiled::default().select_sql("person"), "SELECT * FROM person");
    }
}
