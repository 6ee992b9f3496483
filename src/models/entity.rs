//! Entity query parameters, delegates and result shapes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::graph::{Graph, Node, NodeSet, PathSet, Transaction, TransactionConfig, TxFuture};
use crate::models::unified::GraphItem;

/// Page size used when the caller gives no `limit`.
pub const DEFAULT_LIMIT: usize = 100;

/// Namespace prefix of entity query cache keys.
const CACHE_KEY_PREFIX: &str = "ad-entity-query";

/// Result shape requested for an entity query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Graph = 0,
    List = 1,
    Count = 2,
}

impl DataType {
    /// Reads the `type` query value. Unrecognized values ask for a count.
    pub fn from_query_value(value: &str) -> Self {
        match value {
            "" | "list" => DataType::List,
            "graph" => DataType::Graph,
            _ => DataType::Count,
        }
    }
}

/// One row of a paged entity list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedNodeListEntry {
    #[serde(rename = "objectID")]
    pub object_id: String,
    pub name: String,
    /// Display kind.
    pub label: String,
    pub kinds: Vec<String>,
}

type TransactionListFn =
    dyn for<'t> Fn(&'t dyn Transaction, &'t Node, usize, usize) -> TxFuture<'t, NodeSet> + Send + Sync;
type ParallelListFn =
    dyn Fn(Graph, Node, usize, usize) -> BoxFuture<'static, Result<NodeSet, AppError>> + Send + Sync;
type TransactionPathFn =
    dyn for<'t> Fn(&'t dyn Transaction, &'t Node) -> TxFuture<'t, PathSet> + Send + Sync;
type ParallelPathFn =
    dyn Fn(Graph, Node) -> BoxFuture<'static, Result<PathSet, AppError>> + Send + Sync;

/// Analysis function producing the nodes related to an entity.
///
/// `Transaction` delegates run inside a read transaction opened for them;
/// `Parallel` delegates receive the graph handle and manage their own
/// transactions.
#[derive(Clone)]
pub enum ListDelegate {
    Transaction(Arc<TransactionListFn>),
    Parallel(Arc<ParallelListFn>),
}

impl ListDelegate {
    pub fn transaction<F>(f: F) -> Self
    where
        F: for<'t> Fn(&'t dyn Transaction, &'t Node, usize, usize) -> TxFuture<'t, NodeSet>
            + Send
            + Sync
            + 'static,
    {
        ListDelegate::Transaction(Arc::new(f))
    }

    pub fn parallel<F>(f: F) -> Self
    where
        F: Fn(Graph, Node, usize, usize) -> BoxFuture<'static, Result<NodeSet, AppError>>
            + Send
            + Sync
            + 'static,
    {
        ListDelegate::Parallel(Arc::new(f))
    }

    pub async fn run(
        &self,
        graph: &Graph,
        node: &Node,
        skip: usize,
        limit: usize,
    ) -> Result<NodeSet, AppError> {
        match self {
            ListDelegate::Transaction(f) => {
                let f = f.clone();
                let node = node.clone();
                graph
                    .read_transaction(TransactionConfig::default(), move |tx| {
                        Box::pin(async move { f(tx, &node, skip, limit).await })
                    })
                    .await
            }
            ListDelegate::Parallel(f) => f(graph.clone(), node.clone(), skip, limit).await,
        }
    }
}

impl fmt::Debug for ListDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListDelegate::Transaction(_) => f.write_str("ListDelegate::Transaction"),
            ListDelegate::Parallel(_) => f.write_str("ListDelegate::Parallel"),
        }
    }
}

/// Analysis function producing the paths that explain an entity relation.
#[derive(Clone)]
pub enum PathDelegate {
    Transaction(Arc<TransactionPathFn>),
    Parallel(Arc<ParallelPathFn>),
}

impl PathDelegate {
    pub fn transaction<F>(f: F) -> Self
    where
        F: for<'t> Fn(&'t dyn Transaction, &'t Node) -> TxFuture<'t, PathSet> + Send + Sync + 'static,
    {
        PathDelegate::Transaction(Arc::new(f))
    }

    pub fn parallel<F>(f: F) -> Self
    where
        F: Fn(Graph, Node) -> BoxFuture<'static, Result<PathSet, AppError>> + Send + Sync + 'static,
    {
        PathDelegate::Parallel(Arc::new(f))
    }

    pub async fn run(&self, graph: &Graph, node: &Node) -> Result<PathSet, AppError> {
        match self {
            PathDelegate::Transaction(f) => {
                let f = f.clone();
                let node = node.clone();
                graph
                    .read_transaction(TransactionConfig::default(), move |tx| {
                        Box::pin(async move { f(tx, &node).await })
                    })
                    .await
            }
            PathDelegate::Parallel(f) => f(graph.clone(), node.clone()).await,
        }
    }
}

impl fmt::Debug for PathDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathDelegate::Transaction(_) => f.write_str("PathDelegate::Transaction"),
            PathDelegate::Parallel(_) => f.write_str("PathDelegate::Parallel"),
        }
    }
}

/// A structured lookup of the entities related to one object.
#[derive(Debug, Clone)]
pub struct EntityQueryParameters {
    /// Cache namespace. Empty disables caching for this query.
    pub query_name: String,
    pub object_id: String,
    pub requested_type: DataType,
    pub skip: usize,
    pub limit: usize,
    pub path_delegate: Option<PathDelegate>,
    pub list_delegate: Option<ListDelegate>,
}

impl EntityQueryParameters {
    /// Builds parameters from request query pairs (`type`, `skip`, `limit`).
    ///
    /// Count requests always fetch with zero skip and limit.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::InvalidPaging`] when `skip` or `limit` is not a
    /// non-negative integer.
    pub fn from_query<'a, I>(
        query_name: &str,
        object_id: &str,
        query: I,
        path_delegate: Option<PathDelegate>,
        list_delegate: Option<ListDelegate>,
    ) -> Result<Self, AppError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut requested_type = DataType::List;
        let mut skip = 0;
        let mut limit = DEFAULT_LIMIT;

        for (name, value) in query {
            match name {
                "type" => requested_type = DataType::from_query_value(value),
                "skip" => skip = parse_paging(name, value)?,
                "limit" => limit = parse_paging(name, value)?,
                _ => {}
            }
        }

        if requested_type == DataType::Count {
            skip = 0;
            limit = 0;
        }

        Ok(Self {
            query_name: query_name.to_string(),
            object_id: object_id.to_string(),
            requested_type,
            skip,
            limit,
            path_delegate,
            list_delegate,
        })
    }

    /// Checks that a delegate exists for the requested shape.
    pub fn validate(&self) -> Result<(), AppError> {
        match self.requested_type {
            DataType::Graph if self.path_delegate.is_none() => Err(AppError::GraphUnsupported),
            DataType::List | DataType::Count if self.list_delegate.is_none() => {
                Err(AppError::UnsupportedDataType)
            }
            _ => Ok(()),
        }
    }

    /// Key under which the unpaginated result is cached.
    pub fn cache_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            CACHE_KEY_PREFIX, self.query_name, self.object_id, self.requested_type as u8
        )
    }
}

fn parse_paging(name: &str, value: &str) -> Result<usize, AppError> {
    value.trim().parse::<usize>().map_err(|_| AppError::InvalidPaging {
        name: name.to_string(),
        value: value.to_string(),
    })
}

/// Rendered entity query result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityQueryResult {
    Graph(BTreeMap<String, GraphItem>),
    List(Vec<PagedNodeListEntry>),
    /// Counts carry no body; the number travels next to the result.
    Count,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list_delegate() -> ListDelegate {
        ListDelegate::transaction(|tx, _node, _skip, _limit| {
            Box::pin(async move { tx.fetch_nodes(&crate::graph::criteria::and(vec![])).await })
        })
    }

    #[test]
    fn test_requested_type() {
        assert_eq!(DataType::from_query_value(""), DataType::List);
        assert_eq!(DataType::from_query_value("list"), DataType::List);
        assert_eq!(DataType::from_query_value("graph"), DataType::Graph);
        assert_eq!(DataType::from_query_value("count"), DataType::Count);
        assert_eq!(DataType::from_query_value("bogus"), DataType::Count);
    }

    #[test]
    fn test_from_query_paging() {
        let params = EntityQueryParameters::from_query(
            "sessions",
            "S-1-5-21-1",
            [("skip", "10"), ("limit", "5")],
            None,
            Some(list_delegate()),
        )
        .unwrap();

        assert_eq!(params.requested_type, DataType::List);
        assert_eq!((params.skip, params.limit), (10, 5));
        assert_eq!(params.cache_key(), "ad-entity-query_sessions_S-1-5-21-1_1");

        let defaults =
            EntityQueryParameters::from_query("sessions", "S-1", Vec::<(&str, &str)>::new(), None, None)
                .unwrap();
        assert_eq!((defaults.skip, defaults.limit), (0, DEFAULT_LIMIT));
    }

    #[test]
    fn test_count_forces_zero_paging() {
        let params = EntityQueryParameters::from_query(
            "sessions",
            "S-1",
            [("type", "count"), ("skip", "10"), ("limit", "5")],
            None,
            None,
        )
        .unwrap();

        assert_eq!(params.requested_type, DataType::Count);
        assert_eq!((params.skip, params.limit), (0, 0));
    }

    #[test]
    fn test_rejects_bad_paging() {
        let err = EntityQueryParameters::from_query("q", "S-1", [("skip", "-1")], None, None)
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidPaging { ref name, .. } if name == "skip"));

        let err = EntityQueryParameters::from_query("q", "S-1", [("limit", "ten")], None, None)
            .unwrap_err();
        assert_eq!(err.app_code(), "INVALID_PAGING");
    }

    #[test]
    fn test_validate_requires_matching_delegate() {
        let mut params =
            EntityQueryParameters::from_query("q", "S-1", [("type", "graph")], None, Some(list_delegate()))
                .unwrap();
        assert!(matches!(params.validate(), Err(AppError::GraphUnsupported)));

        params.requested_type = DataType::List;
        assert!(params.validate().is_ok());

        params.list_delegate = None;
        assert!(matches!(params.validate(), Err(AppError::UnsupportedDataType)));
        params.requested_type = DataType::Count;
        assert!(matches!(params.validate(), Err(AppError::UnsupportedDataType)));
    }
}
