//! Application context holding the shared connection, cache and configuration.

use std::sync::Arc;

use crate::cache::Cache;
use crate::config::Config;
use crate::error::AppError;
use crate::graph::backends::postgres::PostgresDatabase;
use crate::graph::Graph;
use crate::services::GraphQuery;

/// Root application context.
///
/// Cloning is cheap; every field is shared.
#[derive(Clone)]
pub struct Context {
    /// Graph database behind the transaction wrapper.
    pub graph: Graph,
    /// Entity query result cache.
    pub cache: Arc<Cache>,
    /// Application configuration.
    pub config: Arc<Config>,
}

impl Context {
    /// Creates a new context with the given dependencies.
    pub fn new(graph: Graph, cache: Cache, config: Config) -> Self {
        Self {
            graph,
            cache: Arc::new(cache),
            config: Arc::new(config),
        }
    }

    /// Connects to PostgreSQL + AGE and builds the cache from `config`.
    pub async fn from(config: Config) -> Result<Self, AppError> {
        tracing::info!(
            uri = %config.postgres.uri,
            graph_name = %config.postgres.graph_name,
            "Connecting to PostgreSQL"
        );
        let db = PostgresDatabase::connect(&config.postgres).await?;
        tracing::info!("Connected to PostgreSQL + AGE");

        let cache = Cache::new(config.cache)?;
        Ok(Self::new(Graph::new(Arc::new(db)), cache, config))
    }

    /// Query service sharing this context's graph and cache.
    pub fn graph_query(&self) -> GraphQuery {
        GraphQuery::from_config(self.graph.clone(), self.cache.clone(), &self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use crate::graph::testing::FakeDatabase;

    #[tokio::test]
    async fn test_graph_query_shares_cache() {
        let db = FakeDatabase::new();
        let ctx = Context::new(
            Graph::new(Arc::new(db)),
            Cache::new(CacheConfig { max_size: 4 }).unwrap(),
            Config::default(),
        );

        let first = ctx.graph_query();
        first.cache().set("k", &1u32).unwrap();

        let second = ctx.graph_query();
        assert_eq!(second.cache().get::<u32>("k").unwrap(), Some(1));
    }
}
