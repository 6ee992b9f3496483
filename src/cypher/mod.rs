//! Cypher frontend: parsing, validation, rewriting and emission.
//!
//! User queries go through four stages:
//!
//! 1. [`parser`] turns text into a [`model::Query`] syntax tree using a pest
//!    grammar for the supported openCypher subset.
//! 2. [`filters`] walk the tree and reject constructs users may not submit
//!    (procedure calls, parameters, and optionally updating clauses).
//! 3. [`analyzer`] measures how expensive the query is likely to be.
//! 4. [`format`] writes the tree back out, either verbatim or with every
//!    literal replaced by a placeholder for safe logging.
//!
//! [`age`] builds the SQL wrapper Apache AGE needs around a Cypher query.
//!
//! # Example
//!
//! ```ignore
//! use graphquery::cypher::{self, filters::FilterSet, ParseContext};
//!
//! let mut ctx = ParseContext::new(FilterSet::user_queries(false).build());
//! let query = cypher::parse(&mut ctx, "MATCH (n:User) RETURN n")?;
//! let complexity = cypher::analyzer::query_complexity(&query)?;
//! ```

pub mod age;
pub mod analyzer;
pub mod filters;
pub mod format;
pub mod model;
pub mod parser;
pub mod walk;

use crate::cypher::model::Query;
use crate::cypher::walk::Visitor;

/// Errors that can occur while parsing or validating Cypher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Syntax error in the query
    InvalidSyntax(String),
    /// `CALL proc(args)` is not accepted from users
    ExplicitProcedureInvocation(String),
    /// `CALL proc` is not accepted from users
    ImplicitProcedureInvocation(String),
    /// `$param` references are not accepted from users
    SpecifiedParameter(String),
    /// CREATE, MERGE, SET, DELETE or REMOVE while mutations are disabled
    UpdatingClauseNotAllowed,
    /// RETURN * requires variable tracking (not supported)
    ReturnStarNotSupported,
    /// Writing the query back out failed
    Emit(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidSyntax(msg) => write!(f, "Invalid syntax: {}", msg),
            ParseError::ExplicitProcedureInvocation(name) => {
                write!(f, "explicit procedure invocation is not allowed: {}", name)
            }
            ParseError::ImplicitProcedureInvocation(name) => {
                write!(f, "implicit procedure invocation is not allowed: {}", name)
            }
            ParseError::SpecifiedParameter(name) => {
                write!(f, "user-specified parameters are not supported: ${}", name)
            }
            ParseError::UpdatingClauseNotAllowed => {
                write!(f, "updating clauses are not supported")
            }
            ParseError::ReturnStarNotSupported => {
                write!(
                    f,
                    "RETURN * is not supported - please specify columns explicitly"
                )
            }
            ParseError::Emit(msg) => write!(f, "Failed to format query: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::fmt::Error> for ParseError {
    fn from(err: std::fmt::Error) -> Self {
        ParseError::Emit(err.to_string())
    }
}

/// Validation visitors applied to every parsed query.
pub struct ParseContext {
    filters: Vec<Box<dyn Visitor + Send>>,
}

impl ParseContext {
    pub fn new(filters: Vec<Box<dyn Visitor + Send>>) -> Self {
        Self { filters }
    }

    /// A context that accepts any syntactically valid query.
    pub fn permissive() -> Self {
        Self {
            filters: Vec::new(),
        }
    }
}

/// Parses the text and runs every filter in the context over the result.
///
/// The first filter to reject the query aborts parsing with its error.
pub fn parse(ctx: &mut ParseContext, text: &str) -> Result<Query, ParseError> {
    let query = parser::parse_query(text)?;
    for filter in ctx.filters.iter_mut() {
        walk::walk_query(&query, filter.as_mut())?;
    }
    Ok(query)
}
