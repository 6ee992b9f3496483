//! The graph query service: user Cypher, entity lookups, search and counts.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::Cache;
use crate::config::{Config, QueryConfig};
use crate::error::AppError;
use crate::graph::{
    criteria, AccessMode, Criteria, Graph, Kind, Node, NodeSet, TransactionConfig,
};
use crate::models::UnifiedGraph;
use crate::schema::{self, ad, azure, property};
use crate::services::prepare::{translator_for, Admission, PreparedQuery, QueryTranslator};

/// Per-request execution options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Deadline requested by the caller. Zero or `None` lets the service
    /// pick one from the query's complexity.
    pub timeout: Option<Duration>,
}

impl RequestContext {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Shared query service. Cheap to clone; clones share the graph handle,
/// the result cache and the translator.
#[derive(Clone)]
pub struct GraphQuery {
    pub(crate) graph: Graph,
    pub(crate) cache: Arc<Cache>,
    translator: Arc<dyn QueryTranslator>,
    admission: Admission,
    pub(crate) slow_query_threshold: Duration,
}

impl GraphQuery {
    pub fn new(
        graph: Graph,
        cache: Arc<Cache>,
        translator: Arc<dyn QueryTranslator>,
        config: &QueryConfig,
    ) -> Self {
        Self {
            graph,
            cache,
            translator,
            admission: Admission::from_config(config),
            slow_query_threshold: Duration::from_millis(config.slow_query_threshold),
        }
    }

    /// Builds the service with the translator the configuration selects.
    pub fn from_config(graph: Graph, cache: Arc<Cache>, config: &Config) -> Self {
        let translator = translator_for(&config.query, &config.postgres.graph_name);
        Self::new(graph, cache, Arc::from(translator), &config.query)
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// Parses, filters and measures user text, rejecting queries that are
    /// too complex.
    ///
    /// # Errors
    ///
    /// [`AppError::QueryParse`] for text that does not parse or uses a
    /// construct users may not submit, and
    /// [`AppError::CypherQueryTooComplex`] when admission fails.
    pub fn prepare_cypher_query(&self, raw: &str) -> Result<PreparedQuery, AppError> {
        let prepared = self.translator.prepare(raw)?;
        self.admission.check(&prepared)?;
        Ok(prepared)
    }

    /// Runs a prepared query and renders what it returned.
    ///
    /// Writing queries run in a write transaction, everything else in a
    /// read transaction. The deadline comes from [`Admission::timeout`].
    pub async fn raw_cypher_query(
        &self,
        ctx: &RequestContext,
        prepared: &PreparedQuery,
        include_properties: bool,
    ) -> Result<UnifiedGraph, AppError> {
        let config = self
            .admission
            .timeout(prepared, ctx.timeout)
            .map(TransactionConfig::with_timeout)
            .unwrap_or_default();
        let mode = if prepared.has_mutation() {
            AccessMode::Write
        } else {
            AccessMode::Read
        };

        tracing::info!(
            query = prepared.stripped(),
            weight = prepared.weight(),
            "Preparing user cypher query"
        );

        let start = Instant::now();
        let statement = prepared.statement().clone();
        let result = self
            .graph
            .transaction(mode, config, move |tx| {
                Box::pin(async move { tx.fetch_by_query(&statement).await })
            })
            .await;

        tracing::info!(
            query = prepared.stripped(),
            weight = prepared.weight(),
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Executed user cypher query"
        );

        match result {
            Ok(result) => {
                let mut graph = UnifiedGraph::new();
                graph.add_path_set(&result.paths, include_properties);
                graph.add_literals(result.literals);
                Ok(graph)
            }
            Err(err) => {
                if err.is_timeout() {
                    tracing::error!(
                        query = prepared.stripped(),
                        weight = prepared.weight(),
                        elapsed_secs = start.elapsed().as_secs_f64(),
                        "Database timed out while executing cypher query"
                    );
                } else {
                    tracing::warn!(error = %err, "Raw cypher query failed");
                }
                Err(err)
            }
        }
    }

    /// Prepares and runs user text in one call.
    pub async fn raw_cypher_search(
        &self,
        ctx: &RequestContext,
        raw: &str,
        include_properties: bool,
    ) -> Result<UnifiedGraph, AppError> {
        let prepared = self.prepare_cypher_query(raw)?;
        self.raw_cypher_query(ctx, &prepared, include_properties)
            .await
    }

    pub async fn count_filtered_nodes(&self, filter: Criteria) -> Result<i64, AppError> {
        self.graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.count_nodes(&filter).await })
            })
            .await
    }

    /// Counts nodes carrying any of the kinds.
    pub async fn count_nodes_by_kind(&self, kinds: &[Kind]) -> Result<i64, AppError> {
        self.count_filtered_nodes(criteria::kind_in(kinds)).await
    }

    pub async fn get_nodes_by_kind(&self, kinds: &[Kind]) -> Result<NodeSet, AppError> {
        let filter = criteria::kind_in(kinds);
        self.graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.fetch_nodes(&filter).await })
            })
            .await
    }

    /// Tallies nodes of `kind` by their primary kind.
    pub async fn get_primary_node_kind_counts(
        &self,
        kind: Kind,
        extra_filters: Vec<Criteria>,
    ) -> Result<BTreeMap<String, usize>, AppError> {
        let mut filters = vec![criteria::kind_in(&[kind])];
        filters.extend(extra_filters);
        let filter = criteria::and(filters);

        let nodes = self
            .graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.fetch_nodes(&filter).await })
            })
            .await?;

        let mut counts = BTreeMap::new();
        for node in nodes.iter() {
            *counts
                .entry(schema::primary_kind(&node.kinds).to_string())
                .or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Fetches AD and Azure nodes by object id. Unknown ids are skipped.
    pub async fn fetch_nodes_by_object_ids(&self, object_ids: &[String]) -> Result<NodeSet, AppError> {
        let filter = criteria::and(vec![
            criteria::kind_in(&[ad::ENTITY, azure::ENTITY]),
            Criteria::In(
                property::OBJECT_ID.to_string(),
                object_ids.iter().cloned().map(Into::into).collect(),
            ),
        ]);
        self.graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move { tx.fetch_nodes(&filter).await })
            })
            .await
    }

    /// Writes node property updates in a single batch.
    pub async fn batch_node_update(&self, nodes: Vec<Node>) -> Result<(), AppError> {
        let count = nodes.len();
        self.graph
            .batch_operation(move |tx| {
                Box::pin(async move {
                    for node in &nodes {
                        tx.update_node(node)
                            .await
                            .map_err(|e| e.context(format!("error updating node {}", node.id)))?;
                    }
                    Ok::<_, AppError>(())
                })
            })
            .await?;

        tracing::debug!(count, "Batch node update complete");
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::{CacheConfig, TranslatorKind};
    use crate::graph::testing::FakeDatabase;
    use crate::graph::{Literal, Path, PathSet, Properties, QueryResult, Relationship, Statement};
    use serde_json::json;

    pub(crate) fn service(db: &FakeDatabase, config: QueryConfig) -> GraphQuery {
        let mut full = Config::default();
        full.query = config;
        GraphQuery::from_config(
            Graph::new(Arc::new(db.clone())),
            Arc::new(Cache::new(CacheConfig { max_size: 16 }).unwrap()),
            &full,
        )
    }

    pub(crate) fn ad_node(id: i64, kind: Kind, props: serde_json::Value) -> Node {
        let properties: Properties = match props {
            serde_json::Value::Object(map) => map,
            _ => Properties::new(),
        };
        Node::new(id, vec![ad::ENTITY, kind], properties)
    }

    fn path_result() -> QueryResult {
        QueryResult {
            paths: PathSet::from(vec![Path {
                nodes: vec![
                    ad_node(1, ad::USER, json!({"name": "BOB", "objectid": "S-1"})),
                    ad_node(2, ad::GROUP, json!({"name": "ADMINS", "objectid": "S-2"})),
                ],
                edges: vec![Relationship {
                    id: 10,
                    start_id: 1,
                    end_id: 2,
                    kind: ad::MEMBER_OF,
                    properties: Properties::new(),
                }],
            }]),
            literals: vec![Literal {
                key: "total".to_string(),
                value: json!(2),
            }],
        }
    }

    #[tokio::test]
    async fn test_read_query_uses_reduced_timeout() {
        let db = FakeDatabase::new().with_query_result(path_result());
        let svc = service(&db, QueryConfig::default());

        let prepared = svc
            .prepare_cypher_query("MATCH (n)-[:MemberOf*1..20]->(g) RETURN n, g")
            .unwrap();
        assert_eq!(prepared.weight(), 7);
        let graph = svc
            .raw_cypher_query(&RequestContext::default(), &prepared, false)
            .await
            .unwrap();

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);
        assert_eq!(graph.literals.len(), 1);
        assert!(graph.nodes["1"].properties.is_none());

        assert_eq!(db.begun_modes(), vec![AccessMode::Read]);
        assert_eq!(
            db.begun_configs(),
            vec![TransactionConfig::with_timeout(Duration::from_secs(450))]
        );
        assert_eq!(
            db.statements(),
            vec![Statement::Cypher(
                "match (n)-[:MemberOf*1..20]->(g) return n, g".to_string()
            )]
        );
        assert_eq!(db.commits(), 1);
    }

    #[tokio::test]
    async fn test_mutation_routes_to_write_transaction() {
        let db = FakeDatabase::new();
        let svc = service(
            &db,
            QueryConfig {
                enable_cypher_mutations: true,
                ..QueryConfig::default()
            },
        );

        svc.raw_cypher_search(
            &RequestContext::with_timeout(Duration::from_secs(30)),
            "MATCH (n:User) SET n.owned = true RETURN n",
            true,
        )
        .await
        .unwrap();

        assert_eq!(db.begun_modes(), vec![AccessMode::Write]);
        assert_eq!(
            db.begun_configs(),
            vec![TransactionConfig::with_timeout(Duration::from_secs(30))]
        );
    }

    #[tokio::test]
    async fn test_rejected_query_never_reaches_database() {
        let db = FakeDatabase::new();
        let svc = service(&db, QueryConfig::default());

        let text = format!("MATCH (n){} RETURN n", "-[*]->()".repeat(9));
        let err = svc
            .raw_cypher_search(&RequestContext::default(), &text, false)
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::CypherQueryTooComplex));
        assert!(db.begun_modes().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_reported_and_rolled_back() {
        let db = FakeDatabase::new().with_query_timeout();
        let svc = service(&db, QueryConfig::default());

        let err = svc
            .raw_cypher_search(&RequestContext::default(), "MATCH (n) RETURN n", false)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert_eq!(db.rollbacks(), 1);
        assert_eq!(db.commits(), 0);
    }

    #[tokio::test]
    async fn test_push_down_has_no_default_deadline() {
        let db = FakeDatabase::new();
        let svc = service(
            &db,
            QueryConfig {
                translator: TranslatorKind::AgeSql,
                complexity_limit: 0,
                ..QueryConfig::default()
            },
        );

        svc.raw_cypher_search(&RequestContext::default(), "MATCH (n)-[*]->(m) RETURN m", false)
            .await
            .unwrap();

        assert_eq!(db.begun_configs(), vec![TransactionConfig::default()]);
        assert!(matches!(db.statements()[0], Statement::Sql(_)));
    }

    #[tokio::test]
    async fn test_counts_and_kind_queries() {
        let db = FakeDatabase::new().with_nodes(vec![
            ad_node(1, ad::USER, json!({"objectid": "S-1"})),
            ad_node(2, ad::USER, json!({"objectid": "S-2"})),
            ad_node(3, ad::COMPUTER, json!({"objectid": "S-3"})),
            Node::new(4, vec![ad::ENTITY, ad::LOCAL_GROUP], Properties::new()),
        ]);
        let svc = service(&db, QueryConfig::default());

        assert_eq!(svc.count_nodes_by_kind(&[ad::USER]).await.unwrap(), 2);
        assert_eq!(svc.get_nodes_by_kind(&[ad::COMPUTER]).await.unwrap().len(), 1);

        let counts = svc
            .get_primary_node_kind_counts(ad::ENTITY, Vec::new())
            .await
            .unwrap();
        assert_eq!(counts.get("User"), Some(&2));
        assert_eq!(counts.get("Computer"), Some(&1));
        assert_eq!(counts.get("ADLocalGroup"), Some(&1));

        let fetched = svc
            .fetch_nodes_by_object_ids(&["S-1".to_string(), "S-3".to_string(), "S-9".to_string()])
            .await
            .unwrap();
        assert_eq!(fetched.len(), 2);
    }

    #[tokio::test]
    async fn test_batch_node_update() {
        let db = FakeDatabase::new();
        let svc = service(&db, QueryConfig::default());

        let nodes = vec![
            ad_node(1, ad::USER, json!({"owned": true})),
            ad_node(2, ad::USER, json!({"owned": false})),
        ];
        svc.batch_node_update(nodes.clone()).await.unwrap();

        assert_eq!(db.updated(), nodes);
        assert_eq!(db.begun_modes(), vec![AccessMode::Batch]);
    }
}
