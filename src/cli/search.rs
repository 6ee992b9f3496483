//! Search command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;

use super::{parse_kind, print_json, App};

impl App {
    /// Search nodes by name or object id and print one page of results.
    pub async fn run_search(
        &self,
        value: &str,
        kinds: &[String],
        open_graph: bool,
        environments: &[String],
        skip: usize,
        limit: usize,
    ) -> Result<()> {
        let kinds = kinds
            .iter()
            .map(String::as_str)
            .map(parse_kind)
            .collect::<Result<Vec<_>>>()?;
        let environments = (!environments.is_empty()).then_some(environments);

        let config = Config::load()?;
        let ctx = Context::from(config).await?;

        let results = ctx
            .graph_query()
            .search_nodes_by_name_or_object_id(&kinds, value, open_graph, skip, limit, environments)
            .await?;

        print_json(&results)
    }
}
