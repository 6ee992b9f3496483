//! In-memory graph database used by unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::AppError;
use crate::graph::{
    AccessMode, Criteria, GraphDatabase, GraphReader, Node, NodeSet, QueryResult, Statement,
    Transaction, TransactionConfig,
};

#[derive(Default)]
struct State {
    nodes: Vec<Node>,
    query_result: QueryResult,
    query_timeout: bool,
    modes: Vec<AccessMode>,
    configs: Vec<TransactionConfig>,
    statements: Vec<Statement>,
    updated: Vec<Node>,
    commits: usize,
    rollbacks: usize,
}

/// Records every transaction it hands out and answers node queries by
/// evaluating criteria against a fixed node list.
#[derive(Clone, Default)]
pub(crate) struct FakeDatabase {
    state: Arc<Mutex<State>>,
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(self, nodes: Vec<Node>) -> Self {
        self.state.lock().nodes = nodes;
        self
    }

    pub fn with_query_result(self, result: QueryResult) -> Self {
        self.state.lock().query_result = result;
        self
    }

    /// Raw queries fail as if the database cancelled them.
    pub fn with_query_timeout(self) -> Self {
        self.state.lock().query_timeout = true;
        self
    }

    pub fn begun_modes(&self) -> Vec<AccessMode> {
        self.state.lock().modes.clone()
    }

    pub fn begun_configs(&self) -> Vec<TransactionConfig> {
        self.state.lock().configs.clone()
    }

    pub fn statements(&self) -> Vec<Statement> {
        self.state.lock().statements.clone()
    }

    pub fn updated(&self) -> Vec<Node> {
        self.state.lock().updated.clone()
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().rollbacks
    }
}

#[async_trait]
impl GraphDatabase for FakeDatabase {
    async fn begin(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
    ) -> Result<Box<dyn Transaction>, AppError> {
        let mut state = self.state.lock();
        state.modes.push(mode);
        state.configs.push(config);
        Ok(Box::new(FakeTransaction {
            state: self.state.clone(),
        }))
    }
}

struct FakeTransaction {
    state: Arc<Mutex<State>>,
}

#[async_trait]
impl GraphReader for FakeTransaction {
    async fn fetch_by_query(&self, statement: &Statement) -> Result<QueryResult, AppError> {
        let mut state = self.state.lock();
        state.statements.push(statement.clone());
        if state.query_timeout {
            return Err(AppError::Timeout {
                message: "canceling statement due to statement timeout".to_string(),
                query: statement.text().to_string(),
            });
        }
        Ok(state.query_result.clone())
    }

    async fn fetch_nodes(&self, criteria: &Criteria) -> Result<NodeSet, AppError> {
        let state = self.state.lock();
        Ok(state
            .nodes
            .iter()
            .filter(|node| matches(criteria, node))
            .cloned()
            .collect())
    }

    async fn count_nodes(&self, criteria: &Criteria) -> Result<i64, AppError> {
        let state = self.state.lock();
        Ok(state.nodes.iter().filter(|node| matches(criteria, node)).count() as i64)
    }
}

#[async_trait]
impl Transaction for FakeTransaction {
    async fn update_node(&self, node: &Node) -> Result<(), AppError> {
        self.state.lock().updated.push(node.clone());
        Ok(())
    }

    async fn commit(&self) -> Result<(), AppError> {
        self.state.lock().commits += 1;
        Ok(())
    }

    async fn rollback(&self) -> Result<(), AppError> {
        self.state.lock().rollbacks += 1;
        Ok(())
    }
}

/// Evaluates a criteria tree against a node in memory.
pub(crate) fn matches(criteria: &Criteria, node: &Node) -> bool {
    match criteria {
        Criteria::And(items) => items.iter().all(|c| matches(c, node)),
        Criteria::Or(items) => items.iter().any(|c| matches(c, node)),
        Criteria::Not(inner) => !matches(inner, node),
        Criteria::Kind(kind) => node.has_kind(kind),
        Criteria::KindIn(kinds) => kinds.is_empty() || node.has_any_kind(kinds),
        Criteria::Equals(property, value) => node.properties.get(property) == Some(value),
        Criteria::In(property, values) => node
            .properties
            .get(property)
            .map(|v| values.contains(v))
            .unwrap_or(false),
        Criteria::StringContains(property, value) => node
            .property_str(property)
            .map(|s| s.contains(value.as_str()))
            .unwrap_or(false),
        Criteria::StringStartsWith(property, value) => node
            .property_str(property)
            .map(|s| s.starts_with(value.as_str()))
            .unwrap_or(false),
        Criteria::IsNotNull(property) => node
            .properties
            .get(property)
            .map(|v| !v.is_null())
            .unwrap_or(false),
    }
}
