//! Search compilation and schema synthesis for a class-mapped relational
//!  store.
//!
//! Searches arrive as text (`name => LIKE 'fo%', OR(age => GE 21)`) or as
//!  [term::Term] values. Both are lexed into the same token stream, parsed
//!  against a [meta::MetadataGateway] into a backend-independent [ir::Node]
//!  tree and compiled into a parameterized WHERE clause for PostgreSQL or
//!  SQLite. [schema::Generator] turns the same class metadata into the DDL
//!  backing it: tables, indexes, constraints, views and the rules or triggers
//!  that make those views writable.

pub mod date;
pub mod ir;
pub mod lex;
pub mod meta;
pub mod parser;
pub mod query;
pub mod schema;
pub mod term;
pub mod to_sql;

#[cfg(test)]
mod tests;

use ir::Node;
use meta::MetadataGateway;
use query::{Compiled, Constraints};
pub use schema::Backend;
use term::Term;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Lex(#[from] lex::Error),
    #[error(transparent)]
    Parse(#[from] parser::Error),
    #[error(transparent)]
    Query(#[from] query::Error),
    #[error(transparent)]
    Schema(#[from] schema::Error),
    #[error(transparent)]
    Catalog(#[from] meta::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Parses and compiles a textual search on `class`.
pub fn search<G>(backend: Backend, gateway: &G, class: &str, input: &str, constraints: &Constraints) -> Result<Compiled>
where
    G: MetadataGateway + ?Sized,
{
    let node = parser::parse_text(input, gateway, class)?;
    compile(backend, gateway, class, &node, constraints)
}

/// Parses and compiles a structured search on `class`.
pub fn search_terms<G>(
    backend: Backend,
    gateway: &G,
    class: &str,
    terms: &[Term],
    constraints: &Constraints,
) -> Result<Compiled>
where
    G: MetadataGateway + ?Sized,
{
    let node = parser::parse_terms(terms, gateway, class)?;
    compile(backend, gateway, class, &node, constraints)
}

/// Compiles an already parsed search.
pub fn compile<G>(backend: Backend, gateway: &G, class: &str, node: &Node, constraints: &Constraints) -> Result<Compiled>
where
    G: MetadataGateway + ?Sized,
{
    let compiled = match backend {
        Backend::Postgres => query::compile(node, constraints, &query::postgres::Compiler::new(gateway, class))?,
        Backend::Sqlite => query::compile(node, constraints, &query::sqlite::Compiler::new(gateway, class))?,
    };
    Ok(compiled)
}
