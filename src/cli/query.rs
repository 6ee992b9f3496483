//! Query command handler.

use std::time::Duration;

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;
use crate::services::RequestContext;

use super::{print_json, App};

impl App {
    /// Run a user query and print the rendered graph.
    pub async fn run_query(
        &self,
        query: &str,
        include_properties: bool,
        timeout: Option<u64>,
    ) -> Result<()> {
        let config = Config::load()?;
        let ctx = Context::from(config).await?;

        let request = timeout
            .map(|secs| RequestContext::with_timeout(Duration::from_secs(secs)))
            .unwrap_or_default();

        let graph = ctx
            .graph_query()
            .raw_cypher_search(&request, query, include_properties)
            .await?;

        print_json(&graph)
    }
}
