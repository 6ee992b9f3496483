//! Count command handler.

use color_eyre::Result;

use crate::config::Config;
use crate::context::Context;

use super::{parse_kind, print_json, App};

impl App {
    /// Print node counts of a kind grouped by primary kind.
    pub async fn run_count(&self, kind: &str) -> Result<()> {
        let kind = parse_kind(kind)?;

        let config = Config::load()?;
        let ctx = Context::from(config).await?;

        let counts = ctx
            .graph_query()
            .get_primary_node_kind_counts(kind, Vec::new())
            .await?;

        print_json(&counts)
    }
}
