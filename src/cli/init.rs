//! Init command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::graph::backends::postgres::PostgresDatabase;

use super::App;

impl App {
    /// Run the init command to create the configured graph.
    pub async fn run_init(&self) -> Result<()> {
        let config = Config::load()?;

        tracing::info!("Connecting to PostgreSQL at {}", config.postgres.uri);
        let db = PostgresDatabase::connect(&config.postgres).await?;
        tracing::info!("Connected to PostgreSQL + AGE");

        tracing::info!("Ensuring graph '{}' exists...", db.graph_name());
        db.ensure_graph_exists().await?;
        tracing::info!("Graph '{}' is ready", db.graph_name());

        Ok(())
    }
}
