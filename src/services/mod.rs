//! Query services built on the graph abstraction.
//!
//! [`GraphQuery`] is the single service; its operations are split by
//! concern across the submodules.

mod entity;
pub(crate) mod graph_query;
pub mod prepare;
mod search;

pub use graph_query::{GraphQuery, RequestContext};
pub use prepare::{
    AgeSqlTranslator, CypherTranslator, PreparedQuery, QueryTranslator, DEFAULT_QUERY_TIMEOUT,
    MAX_QUERY_TIMEOUT,
};
