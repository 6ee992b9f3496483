//! Backend implementations for different graph databases.
//!
//! Each backend implements the traits from [`crate::graph`]:
//!
//! - [`GraphReader`](crate::graph::GraphReader) - raw queries, node fetches and counts
//! - [`Transaction`](crate::graph::Transaction) - node updates, commit and rollback
//! - [`GraphDatabase`](crate::graph::GraphDatabase) - opens transactions in a mode
//!
//! # Available Backends
//!
//! | Backend | Module | Status |
//! |---------|--------|--------|
//! | PostgreSQL + Apache AGE | [`postgres`] | Available |
//!
//! A backend must honor [`TransactionConfig::timeout`](crate::graph::TransactionConfig)
//! and report a cancelled statement as [`AppError::Timeout`](crate::error::AppError).

pub mod postgres;
