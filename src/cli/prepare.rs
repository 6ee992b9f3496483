//! Prepare command handler.

use color_eyre::Result;
use serde_json::json;

use crate::config::Config;
use crate::services::prepare::{translator_for, Admission};

use super::{print_json, App};

impl App {
    /// Parse and measure a query without touching the database.
    pub fn run_prepare(&self, query: &str) -> Result<()> {
        let config = Config::load()?;
        let translator = translator_for(&config.query, &config.postgres.graph_name);

        let prepared = translator.prepare(query)?;
        let admitted = Admission::from_config(&config.query).check(&prepared);

        print_json(&json!({
            "stripped": prepared.stripped(),
            "weight": prepared.complexity().map(|c| c.weight),
            "has_mutation": prepared.has_mutation(),
            "admitted": admitted.is_ok(),
        }))
    }
}
