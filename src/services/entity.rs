//! Entity queries: delegate dispatch, paging and the result cache.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use serde_json::Value as JsonValue;
use tokio::task::JoinSet;

use crate::error::AppError;
use crate::graph::{criteria, Kind, Node, NodeSet, TransactionConfig};
use crate::models::{
    path_set_to_graph_map, DataType, EntityQueryParameters, EntityQueryResult, ListDelegate,
    PagedNodeListEntry,
};
use crate::schema::{self, ad, property};
use crate::services::GraphQuery;

impl GraphQuery {
    /// Resolves the AD entity named by `params.object_id` and runs the
    /// requested query against it.
    ///
    /// Returns the rendered result and the total number of items before
    /// paging.
    ///
    /// # Errors
    ///
    /// [`AppError::GraphUnsupported`] or [`AppError::UnsupportedDataType`]
    /// when the parameters lack a delegate for the requested shape. No
    /// transaction is opened in that case.
    pub async fn get_ad_entity_query_result(
        &self,
        params: &EntityQueryParameters,
        cache_enabled: bool,
    ) -> Result<(EntityQueryResult, usize), AppError> {
        params.validate()?;

        let node = self
            .get_entity_by_object_id(&params.object_id, &[ad::ENTITY])
            .await
            .map_err(|e| e.context("error getting entity node"))?;

        self.get_entity_results(&node, params, cache_enabled).await
    }

    /// Fetches the node with the object id carrying any of the kinds.
    pub async fn get_entity_by_object_id(
        &self,
        object_id: &str,
        kinds: &[Kind],
    ) -> Result<Node, AppError> {
        let filter = criteria::and(vec![
            criteria::equals(property::OBJECT_ID, object_id),
            criteria::kind_in(kinds),
        ]);

        self.graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.fetch_first_node(&filter).await })
            })
            .await
    }

    /// Runs the requested query for an already resolved node.
    pub async fn get_entity_results(
        &self,
        node: &Node,
        params: &EntityQueryParameters,
        cache_enabled: bool,
    ) -> Result<(EntityQueryResult, usize), AppError> {
        params.validate()?;

        match params.requested_type {
            DataType::Graph => {
                let delegate = params
                    .path_delegate
                    .as_ref()
                    .ok_or(AppError::GraphUnsupported)?;
                let paths = delegate.run(&self.graph, node).await?;
                let total = paths.len();
                Ok((EntityQueryResult::Graph(path_set_to_graph_map(&paths)), total))
            }
            DataType::List => {
                let result = self
                    .run_maybe_cached_entity_query(node, params, cache_enabled)
                    .await?;
                let (entries, total) = page_entries(result, params.skip, params.limit)?;
                Ok((EntityQueryResult::List(entries), total))
            }
            DataType::Count => {
                let result = self
                    .run_maybe_cached_entity_query(node, params, cache_enabled)
                    .await?;
                Ok((EntityQueryResult::Count, result.len()))
            }
        }
    }

    /// Runs every count delegate concurrently against the node.
    ///
    /// A failing delegate counts as zero. The node's properties and kinds
    /// are returned next to the counts under `props` and `kinds`.
    pub async fn get_entity_count_results(
        &self,
        node: &Node,
        delegates: HashMap<String, ListDelegate>,
    ) -> BTreeMap<String, JsonValue> {
        let mut results: BTreeMap<String, JsonValue> = delegates
            .keys()
            .map(|key| (key.clone(), JsonValue::from(0)))
            .collect();

        let mut tasks = JoinSet::new();
        for (key, delegate) in delegates {
            tracing::debug!(entity_key = %key, "Running entity count query");

            let graph = self.graph.clone();
            let node = node.clone();
            tasks.spawn(async move {
                let result = delegate.run(&graph, &node, 0, 0).await;
                (key, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((key, Ok(nodes))) => {
                    results.insert(key, JsonValue::from(nodes.len()));
                }
                Ok((key, Err(err))) if err.is_timeout() => {
                    tracing::warn!(entity_key = %key, error = %err, "Entity count query timed out");
                }
                Ok((key, Err(err))) => {
                    tracing::error!(entity_key = %key, error = %err, "Error running entity count query");
                }
                Err(err) => {
                    tracing::error!(error = %err, "Entity count task failed");
                }
            }
        }

        results.insert(
            "props".to_string(),
            JsonValue::Object(node.properties.clone()),
        );
        results.insert("kinds".to_string(), JsonValue::from(node.kind_names()));
        results
    }

    /// Runs the list delegate without paging, going through the cache when
    /// enabled.
    async fn run_maybe_cached_entity_query(
        &self,
        node: &Node,
        params: &EntityQueryParameters,
        cache_enabled: bool,
    ) -> Result<NodeSet, AppError> {
        let start = Instant::now();
        let use_cache = cache_enabled && !params.query_name.is_empty();
        let cache_key = params.cache_key();

        if use_cache {
            let cached = self
                .cache
                .get::<NodeSet>(&cache_key)
                .map_err(|e| e.context(format!("error getting cache entry for {}", cache_key)))?;
            if let Some(cached) = cached {
                tracing::debug!(cache_key = %cache_key, "Entity query served from cache");
                return Ok(cached);
            }
        }

        let delegate = params
            .list_delegate
            .as_ref()
            .ok_or(AppError::UnsupportedDataType)?;
        let result = delegate.run(&self.graph, node, 0, 0).await?;

        if use_cache {
            self.cache_query_result(start, &cache_key, &result);
        }
        Ok(result)
    }

    /// Stores a result that took longer than the slow query threshold.
    /// Failures are logged and never reach the caller.
    fn cache_query_result(&self, start: Instant, cache_key: &str, result: &NodeSet) {
        let elapsed = start.elapsed();
        if elapsed <= self.slow_query_threshold {
            return;
        }

        match self.cache.guarded_set(cache_key, result) {
            Err(err) => {
                tracing::error!(cache_key, error = %err, "Failed to write entity results to cache");
            }
            Ok((false, _)) => {
                tracing::warn!(cache_key, "Cache entry not set because it already exists");
            }
            Ok((true, size_bytes)) => {
                tracing::info!(
                    cache_key,
                    size_bytes,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Cached slow entity query"
                );
            }
        }
    }
}

/// Orders nodes by id, highest first, and cuts one page.
///
/// A `limit` running past the end is shortened; a `skip` past the end is an
/// error.
fn page_entries(
    result: NodeSet,
    skip: usize,
    limit: usize,
) -> Result<(Vec<PagedNodeListEntry>, usize), AppError> {
    let total = result.len();
    if skip > total {
        return Err(AppError::InvalidSkip(skip));
    }
    let limit = limit.min(total - skip);

    let entries = result
        .into_sorted_desc()
        .iter()
        .skip(skip)
        .take(limit)
        .map(paged_entry)
        .collect();
    Ok((entries, total))
}

fn paged_entry(node: &Node) -> PagedNodeListEntry {
    let object_id = node.property_str(property::OBJECT_ID).unwrap_or_else(|| {
        tracing::warn!(node_id = node.id, "Node missing objectid");
        ""
    });
    let name = node.property_str(property::NAME).unwrap_or_else(|| {
        tracing::warn!(node_id = node.id, "Node missing name");
        ""
    });

    PagedNodeListEntry {
        object_id: object_id.to_string(),
        name: name.to_string(),
        label: schema::primary_kind(&node.kinds).to_string(),
        kinds: node.kind_names(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::graph::testing::FakeDatabase;
    use crate::graph::{Path, PathSet, Relationship};
    use crate::models::{GraphItem, PathDelegate};
    use crate::services::graph_query::tests::{ad_node, service};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    const ENTITY_ID: &str = "S-1-5-21-0";

    fn database(members: i64) -> FakeDatabase {
        let mut nodes = vec![ad_node(1000, ad::GROUP, json!({"objectid": ENTITY_ID, "name": "ADMINS"}))];
        nodes.extend((1..=members).map(|id| {
            ad_node(
                id,
                ad::USER,
                json!({"objectid": format!("S-1-5-21-{}", id), "name": format!("USER{}", id)}),
            )
        }));
        FakeDatabase::new().with_nodes(nodes)
    }

    /// Lists every user and counts invocations.
    fn counting_users(calls: Arc<AtomicUsize>) -> ListDelegate {
        ListDelegate::transaction(move |tx, _node, _skip, _limit| {
            calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { tx.fetch_nodes(&criteria::kind_in(&[ad::USER])).await })
        })
    }

    fn params(requested_type: DataType, skip: usize, limit: usize, list: Option<ListDelegate>) -> EntityQueryParameters {
        EntityQueryParameters {
            query_name: "group-members".to_string(),
            object_id: ENTITY_ID.to_string(),
            requested_type,
            skip,
            limit,
            path_delegate: None,
            list_delegate: list,
        }
    }

    fn config(slow_query_threshold: u64) -> QueryConfig {
        QueryConfig {
            slow_query_threshold,
            ..QueryConfig::default()
        }
    }

    #[tokio::test]
    async fn test_list_first_page_is_sorted_desc() {
        let db = database(20);
        let svc = service(&db, config(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let (result, total) = svc
            .get_ad_entity_query_result(&params(DataType::List, 0, 10, Some(counting_users(calls))), false)
            .await
            .unwrap();

        assert_eq!(total, 20);
        let EntityQueryResult::List(entries) = result else {
            panic!("expected a list result");
        };
        let names: Vec<_> = entries.iter().map(|e| e.name.clone()).collect();
        let expected: Vec<_> = (11..=20).rev().map(|id| format!("USER{}", id)).collect();
        assert_eq!(names, expected);
        assert_eq!(entries[0].label, "User");
        assert_eq!(entries[0].object_id, "S-1-5-21-20");
    }

    #[tokio::test]
    async fn test_last_page_is_shortened() {
        let db = database(20);
        let svc = service(&db, config(0));

        let (result, total) = svc
            .get_ad_entity_query_result(
                &params(DataType::List, 15, 10, Some(counting_users(Arc::default()))),
                false,
            )
            .await
            .unwrap();

        assert_eq!(total, 20);
        assert!(matches!(result, EntityQueryResult::List(ref entries) if entries.len() == 5));
    }

    #[tokio::test]
    async fn test_skip_past_end_is_an_error() {
        let db = database(20);
        let svc = service(&db, config(0));

        let err = svc
            .get_ad_entity_query_result(
                &params(DataType::List, 21, 10, Some(counting_users(Arc::default()))),
                false,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidSkip(21)));
    }

    #[tokio::test]
    async fn test_missing_delegate_fails_before_database() {
        let db = database(1);
        let svc = service(&db, config(0));

        let err = svc
            .get_ad_entity_query_result(&params(DataType::Count, 0, 0, None), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::UnsupportedDataType));

        let err = svc
            .get_ad_entity_query_result(&params(DataType::Graph, 0, 0, None), true)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GraphUnsupported));

        assert!(db.begun_modes().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_entity_is_not_found() {
        let db = database(1);
        let svc = service(&db, config(0));
        let mut missing = params(DataType::Count, 0, 0, Some(counting_users(Arc::default())));
        missing.object_id = "S-1-5-21-404".to_string();

        let err = svc.get_ad_entity_query_result(&missing, false).await.unwrap_err();
        assert_eq!(err.app_code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_cache_miss_then_hit() {
        let db = database(3);
        let svc = service(&db, config(0));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = params(DataType::Count, 0, 0, Some(counting_users(calls.clone())));

        let (_, first) = svc.get_ad_entity_query_result(&query, true).await.unwrap();
        let (_, second) = svc.get_ad_entity_query_result(&query, true).await.unwrap();

        assert_eq!((first, second), (3, 3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(svc.cache().len(), 1);
        assert!(svc.cache().get::<NodeSet>(&query.cache_key()).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_fast_queries_are_not_cached() {
        let db = database(3);
        let svc = service(&db, config(200_000));
        let calls = Arc::new(AtomicUsize::new(0));
        let query = params(DataType::Count, 0, 0, Some(counting_users(calls.clone())));

        svc.get_ad_entity_query_result(&query, true).await.unwrap();
        svc.get_ad_entity_query_result(&query, true).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn test_cache_disabled_or_unnamed_skips_cache() {
        let db = database(3);
        let svc = service(&db, config(0));
        let calls = Arc::new(AtomicUsize::new(0));

        let query = params(DataType::Count, 0, 0, Some(counting_users(calls.clone())));
        svc.get_ad_entity_query_result(&query, false).await.unwrap();

        let mut unnamed = query.clone();
        unnamed.query_name.clear();
        svc.get_ad_entity_query_result(&unnamed, true).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(svc.cache().is_empty());
    }

    #[tokio::test]
    async fn test_graph_result_uses_path_delegate() {
        let db = database(2);
        let svc = service(&db, config(0));

        let mut query = params(DataType::Graph, 0, 0, None);
        query.path_delegate = Some(PathDelegate::parallel(|_graph, node| {
            Box::pin(async move {
                let member = ad_node(1, ad::USER, json!({"objectid": "S-1-5-21-1", "name": "USER1"}));
                let edge = Relationship {
                    id: 1,
                    start_id: member.id,
                    end_id: node.id,
                    kind: ad::MEMBER_OF,
                    properties: Default::default(),
                };
                Ok(PathSet::from(vec![Path {
                    nodes: vec![member, node],
                    edges: vec![edge],
                }]))
            })
        }));

        let (result, total) = svc.get_ad_entity_query_result(&query, true).await.unwrap();

        assert_eq!(total, 1);
        let EntityQueryResult::Graph(items) = result else {
            panic!("expected a graph result");
        };
        assert!(matches!(items.get("1000"), Some(GraphItem::Node(n)) if n.label == "ADMINS"));
        assert!(matches!(items.get("rel_1"), Some(GraphItem::Edge(e)) if e.kind == "MemberOf"));
    }

    #[tokio::test]
    async fn test_count_fan_out_tolerates_failures() {
        let db = database(4);
        let svc = service(&db, config(0));
        let node = svc.get_entity_by_object_id(ENTITY_ID, &[ad::ENTITY]).await.unwrap();

        let mut delegates = HashMap::new();
        delegates.insert("members".to_string(), counting_users(Arc::default()));
        delegates.insert(
            "broken".to_string(),
            ListDelegate::parallel(|_graph, _node, _skip, _limit| {
                Box::pin(async { Err(AppError::Internal("boom".to_string())) })
            }),
        );

        let results = svc.get_entity_count_results(&node, delegates).await;

        assert_eq!(results["members"], json!(4));
        assert_eq!(results["broken"], json!(0));
        assert_eq!(results["props"]["name"], json!("ADMINS"));
        assert_eq!(results["kinds"], json!(["Base", "Group"]));
    }
}
