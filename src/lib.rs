//! GraphQuery - attack-path graph query service
//!
//! Admits, translates and runs user Cypher against a PostgreSQL + Apache AGE
//! graph, and serves cached entity queries and name searches over it.

pub mod cache;
pub mod cli;
pub mod config;
pub mod context;
pub mod cypher;
pub mod error;
pub mod graph;
pub mod models;
pub mod schema;
pub mod services;
