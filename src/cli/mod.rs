//! CLI module for GraphQuery.
//!
//! Subcommands:
//! - `init`: Create the AGE graph if it is missing
//! - `prepare`: Parse and measure a query without running it
//! - `query`: Run a user Cypher query and print the graph it returns
//! - `search`: Search nodes by name or object id
//! - `count`: Tally nodes of a kind by their primary kind

mod count;
mod init;
mod prepare;
mod query;
mod search;

use clap::{Parser, Subcommand};
use color_eyre::eyre::eyre;

use crate::graph::Kind;
use crate::schema;

/// GraphQuery - attack-path graph queries
#[derive(Parser)]
#[command(name = "graphquery")]
#[command(about = "Admit, translate and run Cypher against an attack-path graph")]
#[command(version)]
pub struct App {
    /// Run in verbose mode
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create the configured graph if it does not exist
    Init,

    /// Print the stripped text, weight and mutation flag of a query
    Prepare {
        /// Cypher query text
        query: String,
    },

    /// Run a Cypher query and print the resulting graph as JSON
    Query {
        /// Cypher query text
        query: String,

        /// Include node and edge properties in the output
        #[arg(long)]
        include_properties: bool,

        /// Deadline in seconds, capped at 30 minutes
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Search nodes by name or object id
    Search {
        /// Name or object id to look for
        value: String,

        /// Restrict the search to these kinds (repeatable)
        #[arg(long = "kind")]
        kinds: Vec<String>,

        /// Label nodes of unknown kind with their first kind
        #[arg(long)]
        open_graph: bool,

        /// Only return nodes from these domains or tenants (repeatable)
        #[arg(long = "environment")]
        environments: Vec<String>,

        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Count nodes of a kind grouped by primary kind
    Count {
        /// Kind to count, e.g. `Base` or `AZBase`
        kind: String,
    },
}

impl App {
    /// Run the CLI application.
    pub async fn run(self) -> color_eyre::Result<()> {
        match self.command {
            Command::Init => self.run_init().await,
            Command::Prepare { ref query } => self.run_prepare(query),
            Command::Query {
                ref query,
                include_properties,
                timeout,
            } => self.run_query(query, include_properties, timeout).await,
            Command::Search {
                ref value,
                ref kinds,
                open_graph,
                ref environments,
                skip,
                limit,
            } => {
                self.run_search(value, kinds, open_graph, environments, skip, limit)
                    .await
            }
            Command::Count { ref kind } => self.run_count(kind).await,
        }
    }
}

/// Resolves a kind name against the known schema.
fn parse_kind(name: &str) -> color_eyre::Result<Kind> {
    schema::parse_kind(name).ok_or_else(|| eyre!("Unknown kind: {}", name))
}

/// Writes a value to stdout as pretty JSON.
fn print_json<T: serde::Serialize>(value: &T) -> color_eyre::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
