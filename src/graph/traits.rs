//! Core traits for graph database abstraction.
//!
//! This module defines the trait hierarchy that backends must implement:
//!
//! - [`GraphReader`] - Read access within a transaction
//! - [`Transaction`] - Writes plus transaction lifecycle management
//! - [`GraphDatabase`] - Connection pool and transaction creation

use std::time::Duration;

use async_trait::async_trait;

use crate::error::AppError;
use crate::graph::criteria::Criteria;
use crate::graph::model::{Node, NodeSet, QueryResult};

/// A query text in the dialect the backend should run it in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Statement {
    /// Cypher text, executed through the backend's Cypher support.
    Cypher(String),
    /// Native SQL text that already embeds the Cypher call.
    Sql(String),
}

impl Statement {
    pub fn text(&self) -> &str {
        match self {
            Statement::Cypher(text) | Statement::Sql(text) => text,
        }
    }
}

/// How a transaction may touch the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    Read,
    Write,
    /// Bulk writes that skip per-statement deadlines.
    Batch,
}

/// Per-transaction settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Deadline applied to every statement in the transaction.
    pub timeout: Option<Duration>,
}

impl TransactionConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Read operations available inside any transaction.
#[async_trait]
pub trait GraphReader: Send + Sync {
    /// Runs a raw query and splits its rows into paths and literals.
    async fn fetch_by_query(&self, statement: &Statement) -> Result<QueryResult, AppError>;

    /// Fetches every node matching the criteria.
    async fn fetch_nodes(&self, criteria: &Criteria) -> Result<NodeSet, AppError>;

    /// Counts nodes matching the criteria.
    async fn count_nodes(&self, criteria: &Criteria) -> Result<i64, AppError>;

    /// Fetches one node matching the criteria.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`] when nothing matches.
    async fn fetch_first_node(&self, criteria: &Criteria) -> Result<Node, AppError> {
        self.fetch_nodes(criteria)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::NotFound("no node matched the given criteria".to_string()))
    }
}

/// Transaction lifecycle management.
///
/// Commit and rollback take `&self` so transactions can live behind a trait
/// object; a transaction must not be used after either has been called.
#[async_trait]
pub trait Transaction: GraphReader {
    /// Replaces the stored properties of an existing node.
    async fn update_node(&self, node: &Node) -> Result<(), AppError>;

    /// Commits the transaction, making all changes permanent.
    async fn commit(&self) -> Result<(), AppError>;

    /// Rolls back the transaction, discarding all changes.
    async fn rollback(&self) -> Result<(), AppError>;
}

/// A graph database that can begin transactions.
///
/// Implementations typically wrap a connection pool.
///
/// # Example
///
/// ```ignore
/// let txn = db.begin(AccessMode::Read, TransactionConfig::default()).await?;
/// let nodes = txn.fetch_nodes(&criteria::kind(ad::USER)).await?;
/// txn.commit().await?;
/// ```
#[async_trait]
pub trait GraphDatabase: Send + Sync {
    async fn begin(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
    ) -> Result<Box<dyn Transaction>, AppError>;
}
