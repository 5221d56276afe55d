//! # SPARQL Front-End
//!
//! Lexer → Parser → AST → decomposition into atomic queries.
//!
//! The supported subset is what the overlay can route: one `GRAPH` block
//! of triple patterns, optionally split by `UNION`, with `FILTER` and the
//! usual solution modifiers.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod expr;
pub mod decomposer;

pub use ast::Query;
pub use decomposer::{decompose, AtomicQuery};
pub use expr::is_satisfied;

use crate::Result;

/// Parse a SPARQL query string into an AST.
pub fn parse(sparql: &str) -> Result<Query> {
    let tokens = lexer::tokenize(sparql)?;
    parser::parse_query(&tokens)
}

/// Parse and decompose in one step.
pub fn decompose_str(sparql: &str) -> Result<Vec<AtomicQuery>> {
    decompose(&parse(sparql)?)
}
