//! Application error types with stable error codes.

use thiserror::Error;

use crate::cypher::ParseError;

/// Application-level errors for graph querying.
#[derive(Error, Debug)]
pub enum AppError {
    // Query preparation errors
    #[error("Cypher query error: {0}")]
    QueryParse(#[from] ParseError),

    #[error("cypher query is too complex and is likely to result in poor or unstable database performance")]
    CypherQueryTooComplex,

    // Entity query errors
    #[error("type 'graph' is not supported for this endpoint")]
    GraphUnsupported,

    #[error("unsupported result type for this query")]
    UnsupportedDataType,

    #[error("invalid skip: {0}")]
    InvalidSkip(usize),

    #[error("invalid paging parameter {name}: {value}")]
    InvalidPaging { name: String, value: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // Database errors
    #[error("Database connection error: {0}")]
    Connection(String),

    #[error("Query timed out: {message}")]
    Timeout { message: String, query: String },

    #[error("Graph query error: {message}")]
    Query { message: String, query: String },

    // Cache errors
    #[error("Cache error: {0}")]
    Cache(String),

    // Config errors
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    /// Wraps this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        AppError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Returns the innermost error beneath any context wrappers.
    pub fn root(&self) -> &AppError {
        match self {
            AppError::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// True when the database cancelled the statement because it ran past
    /// its deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), AppError::Timeout { .. })
    }

    /// Stable machine-readable code for API responses.
    pub fn app_code(&self) -> &'static str {
        match self.root() {
            AppError::QueryParse(_) => "QUERY_PARSE_ERROR",
            AppError::CypherQueryTooComplex => "QUERY_TOO_COMPLEX",
            AppError::GraphUnsupported => "GRAPH_UNSUPPORTED",
            AppError::UnsupportedDataType => "UNSUPPORTED_DATA_TYPE",
            AppError::InvalidSkip(_) => "INVALID_SKIP",
            AppError::InvalidPaging { .. } => "INVALID_PAGING",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Connection(_) => "CONNECTION_ERROR",
            AppError::Timeout { .. } => "QUERY_TIMEOUT",
            AppError::Query { .. } => "QUERY_ERROR",
            AppError::Cache(_) => "CACHE_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::Context { .. } => "INTERNAL_ERROR",
        }
    }
}
