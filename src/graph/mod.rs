//! Graph abstraction layer for backend-agnostic database access.
//!
//! This module provides a trait-based abstraction over graph databases,
//! enabling the query services to run against PostgreSQL + Apache AGE in
//! production and against in-memory fakes in tests.
//!
//! # Architecture
//!
//! The abstraction is built on a hierarchy of traits:
//!
//! - [`GraphReader`] - Raw queries, node fetches and counts
//! - [`Transaction`] - Node updates plus commit/rollback
//! - [`GraphDatabase`] - Connection management and transaction creation
//!
//! # Usage
//!
//! ```ignore
//! use graphquery::graph::{criteria, Graph, TransactionConfig};
//!
//! let graph = Graph::new(Arc::new(db));
//!
//! let users = graph
//!     .read_transaction(TransactionConfig::default(), move |tx| {
//!         Box::pin(async move { tx.fetch_nodes(&criteria::kind(ad::USER)).await })
//!     })
//!     .await?;
//! ```

pub mod criteria;
pub mod model;
mod row;
mod traits;

pub mod backends;

#[cfg(test)]
pub(crate) mod testing;

// Re-export core types
pub use criteria::Criteria;
pub use model::{
    GraphId, Kind, Literal, Node, NodeSet, Path, PathSet, Properties, QueryResult, Relationship,
};
pub use row::{Params, Row, RowStream};
pub use traits::{
    AccessMode, GraphDatabase, GraphReader, Statement, Transaction, TransactionConfig,
};

// --- Graph wrapper struct ---

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::error::AppError;

/// Future returned by transaction delegates.
pub type TxFuture<'t, R> = BoxFuture<'t, Result<R, AppError>>;

/// High-level wrapper providing a convenient API for graph operations.
///
/// `Graph` wraps any [`GraphDatabase`] and runs closures inside a
/// transaction: the transaction commits when the closure returns `Ok` and
/// rolls back when it returns `Err`.
///
/// This type is cheap to clone.
///
/// # Example
///
/// ```ignore
/// let count = graph.read_transaction(TransactionConfig::default(), move |tx| {
///     Box::pin(async move { tx.count_nodes(&criteria).await })
/// }).await?;
/// ```
#[derive(Clone)]
pub struct Graph {
    db: Arc<dyn GraphDatabase>,
}

impl Graph {
    /// Creates a new graph wrapper around the given database.
    pub fn new(db: Arc<dyn GraphDatabase>) -> Self {
        Self { db }
    }

    /// Runs the delegate inside a read-only transaction.
    pub async fn read_transaction<R, F>(&self, config: TransactionConfig, f: F) -> Result<R, AppError>
    where
        F: for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t, R>,
    {
        self.transaction(AccessMode::Read, config, f).await
    }

    /// Runs the delegate inside a read-write transaction.
    pub async fn write_transaction<R, F>(&self, config: TransactionConfig, f: F) -> Result<R, AppError>
    where
        F: for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t, R>,
    {
        self.transaction(AccessMode::Write, config, f).await
    }

    /// Runs the delegate inside a bulk-write transaction without a deadline.
    pub async fn batch_operation<R, F>(&self, f: F) -> Result<R, AppError>
    where
        F: for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t, R>,
    {
        self.transaction(AccessMode::Batch, TransactionConfig::default(), f)
            .await
    }

    /// Executes a closure within a transaction of the given mode.
    ///
    /// The closure's result decides the outcome: `Ok` commits, `Err` rolls
    /// back and is returned unchanged. A failed rollback is logged and does
    /// not mask the closure's error.
    pub async fn transaction<R, F>(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
        f: F,
    ) -> Result<R, AppError>
    where
        F: for<'t> FnOnce(&'t dyn Transaction) -> TxFuture<'t, R>,
    {
        let txn = self.db.begin(mode, config).await?;

        match f(txn.as_ref()).await {
            Ok(value) => {
                txn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(error = %rollback_err, "Failed to roll back transaction");
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::testing::FakeDatabase;

    #[tokio::test]
    async fn test_transaction_commits_on_success() {
        let db = Arc::new(FakeDatabase::new());
        let graph = Graph::new(db.clone());

        let count = graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.count_nodes(&Criteria::And(vec![])).await })
            })
            .await
            .unwrap();

        assert_eq!(count, 0);
        assert_eq!(db.commits(), 1);
        assert_eq!(db.rollbacks(), 0);
    }

    #[tokio::test]
    async fn test_transaction_rolls_back_on_error() {
        let db = Arc::new(FakeDatabase::new());
        let graph = Graph::new(db.clone());

        let result: Result<(), _> = graph
            .write_transaction(TransactionConfig::default(), move |_tx| {
                Box::pin(async move { Err(AppError::Internal("boom".to_string())) })
            })
            .await;

        assert!(matches!(result, Err(AppError::Internal(_))));
        assert_eq!(db.commits(), 0);
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(db.begun_modes(), vec![AccessMode::Write]);
    }
}
