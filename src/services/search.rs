//! Name and object id search over AD and Azure nodes.

use crate::error::AppError;
use crate::graph::criteria::{self, Criteria};
use crate::graph::{Kind, NodeSet, TransactionConfig};
use crate::models::{
    filter_search_results, format_search_results, NodeSearchResults, SearchResult, SearchType,
};
use crate::schema::{ad, azure, property};
use crate::services::GraphQuery;

impl GraphQuery {
    /// Searches exact then fuzzy matches for each kind and returns one page.
    ///
    /// The input is matched upper-cased. With no kinds the search spans
    /// every node. With `environments` only nodes from the listed domains
    /// or tenants are returned.
    pub async fn search_nodes_by_name_or_object_id(
        &self,
        kinds: &[Kind],
        value: &str,
        open_graph: bool,
        skip: usize,
        limit: usize,
        environments: Option<&[String]>,
    ) -> Result<Vec<SearchResult>, AppError> {
        let formatted = value.to_uppercase();
        let mut results = NodeSearchResults::default();

        if kinds.is_empty() {
            self.search_exact_and_fuzzy(None, &formatted, open_graph, environments, &mut results)
                .await?;
        } else {
            for kind in kinds {
                self.search_exact_and_fuzzy(
                    Some(kind.clone()),
                    &formatted,
                    open_graph,
                    environments,
                    &mut results,
                )
                .await?;
            }
        }

        Ok(format_search_results(results, skip, limit))
    }

    async fn search_exact_and_fuzzy(
        &self,
        kind: Option<Kind>,
        value: &str,
        open_graph: bool,
        environments: Option<&[String]>,
        results: &mut NodeSearchResults,
    ) -> Result<(), AppError> {
        let exact = exact_criteria(kind.clone(), value, true);
        let fuzzy = fuzzy_criteria(kind, value);

        let (exact_nodes, fuzzy_nodes) = self
            .graph
            .read_transaction(TransactionConfig::default(), move |tx| {
                Box::pin(async move {
                    let exact_nodes = tx.fetch_nodes(&exact).await?;
                    let fuzzy_nodes = tx.fetch_nodes(&fuzzy).await?;
                    Ok::<_, AppError>((exact_nodes, fuzzy_nodes))
                })
            })
            .await?;

        results
            .exact
            .extend(filter_search_results(exact_nodes.iter(), open_graph, environments));
        results
            .fuzzy
            .extend(filter_search_results(fuzzy_nodes.iter(), open_graph, environments));
        Ok(())
    }

    /// Finds AD and Azure nodes whose name or object id equals (`Exact`) or
    /// starts with (`Fuzzy`) the upper-cased input.
    ///
    /// With `include_open_graph` the search is not limited to AD and Azure
    /// kinds.
    pub async fn search_by_name_or_object_id(
        &self,
        include_open_graph: bool,
        value: &str,
        search_type: SearchType,
    ) -> Result<NodeSet, AppError> {
        let value = value.to_uppercase();
        let kinds: Vec<Option<Kind>> = if include_open_graph {
            vec![None]
        } else {
            vec![Some(ad::ENTITY), Some(azure::ENTITY)]
        };

        let mut nodes = NodeSet::new();
        for kind in kinds {
            let filter = match search_type {
                SearchType::Exact => exact_criteria(kind, &value, false),
                SearchType::Fuzzy => starts_with_criteria(kind, &value),
            };
            let found = self
                .graph
                .read_transaction(TransactionConfig::default(), move |tx| {
                    Box::pin(async move { tx.fetch_nodes(&filter).await })
                })
                .await?;
            for node in found {
                nodes.insert(node);
            }
        }
        Ok(nodes)
    }
}

/// Excludes local groups unless they are also domain groups.
fn group_filter() -> Criteria {
    criteria::not(criteria::and(vec![
        criteria::kind(ad::LOCAL_GROUP),
        criteria::not(criteria::kind(ad::GROUP)),
    ]))
}

fn exact_criteria(kind: Option<Kind>, value: &str, include_group_filter: bool) -> Criteria {
    let mut filters = vec![criteria::or(vec![
        criteria::equals(property::NAME, value),
        criteria::equals(property::OBJECT_ID, value),
    ])];
    if include_group_filter {
        filters.push(group_filter());
    }
    filters.extend(kind.map(criteria::kind));
    criteria::and(filters)
}

fn not_exact(value: &str) -> [Criteria; 2] {
    [
        criteria::not(criteria::equals(property::NAME, value)),
        criteria::not(criteria::equals(property::OBJECT_ID, value)),
    ]
}

fn fuzzy_criteria(kind: Option<Kind>, value: &str) -> Criteria {
    let mut filters = vec![criteria::or(vec![
        criteria::contains(property::NAME, value),
        criteria::contains(property::OBJECT_ID, value),
    ])];
    filters.extend(not_exact(value));
    filters.push(group_filter());
    filters.extend(kind.map(criteria::kind));
    criteria::and(filters)
}

fn starts_with_criteria(kind: Option<Kind>, value: &str) -> Criteria {
    let mut filters = vec![criteria::or(vec![
        criteria::starts_with(property::NAME, value),
        criteria::starts_with(property::OBJECT_ID, value),
    ])];
    filters.extend(not_exact(value));
    filters.extend(kind.map(criteria::kind));
    criteria::and(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueryConfig;
    use crate::graph::testing::{matches, FakeDatabase};
    use crate::graph::Node;
    use crate::services::graph_query::tests::{ad_node, service};
    use serde_json::json;

    fn nodes() -> Vec<Node> {
        vec![
            ad_node(1, ad::USER, json!({"name": "BOB@CORP", "objectid": "S-1", "domainsid": "D1"})),
            ad_node(2, ad::USER, json!({"name": "ZBOB@CORP", "objectid": "S-2", "domainsid": "D1"})),
            ad_node(3, ad::USER, json!({"name": "ABOB@CORP", "objectid": "S-3", "domainsid": "D2"})),
            ad_node(4, ad::LOCAL_GROUP, json!({"name": "BOB@CORP LOCAL", "objectid": "S-4", "domainsid": "D1"})),
            ad_node(5, ad::COMPUTER, json!({"name": "BOBPC", "objectid": "S-5", "domainsid": "D1"})),
            Node::new(6, vec![azure::ENTITY, azure::USER], {
                let mut props = crate::graph::Properties::new();
                props.insert("name".to_string(), json!("BOB@TENANT"));
                props.insert("objectid".to_string(), json!("A-6"));
                props
            }),
        ]
    }

    #[test]
    fn test_group_filter() {
        let local_only = Node::new(1, vec![ad::ENTITY, ad::LOCAL_GROUP], Default::default());
        let both = Node::new(2, vec![ad::ENTITY, ad::LOCAL_GROUP, ad::GROUP], Default::default());
        let user = Node::new(3, vec![ad::ENTITY, ad::USER], Default::default());

        assert!(!matches(&group_filter(), &local_only));
        assert!(matches(&group_filter(), &both));
        assert!(matches(&group_filter(), &user));
    }

    #[tokio::test]
    async fn test_exact_match_comes_first() {
        let db = FakeDatabase::new().with_nodes(nodes());
        let svc = service(&db, QueryConfig::default());

        let results = svc
            .search_nodes_by_name_or_object_id(&[ad::USER], "bob@corp", false, 0, 10, None)
            .await
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["BOB@CORP", "ABOB@CORP", "ZBOB@CORP"]);
        assert_eq!(results[0].kind, "User");
    }

    #[tokio::test]
    async fn test_search_excludes_local_groups_and_filters_environments() {
        let db = FakeDatabase::new().with_nodes(nodes());
        let svc = service(&db, QueryConfig::default());
        let environments = vec!["D1".to_string()];

        let results = svc
            .search_nodes_by_name_or_object_id(&[], "bob", false, 0, 10, Some(&environments))
            .await
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["BOB@CORP", "BOBPC", "ZBOB@CORP"]);
    }

    #[tokio::test]
    async fn test_search_pages_across_kinds() {
        let db = FakeDatabase::new().with_nodes(nodes());
        let svc = service(&db, QueryConfig::default());

        let results = svc
            .search_nodes_by_name_or_object_id(&[ad::USER, ad::COMPUTER], "BOB", false, 1, 2, None)
            .await
            .unwrap();

        let names: Vec<_> = results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["BOB@CORP", "BOBPC"]);
        assert_eq!(db.begun_modes().len(), 2);
    }

    #[tokio::test]
    async fn test_search_by_name_or_object_id() {
        let db = FakeDatabase::new().with_nodes(nodes());
        let svc = service(&db, QueryConfig::default());

        let exact = svc
            .search_by_name_or_object_id(false, "s-5", SearchType::Exact)
            .await
            .unwrap();
        assert_eq!(exact.len(), 1);
        assert!(exact.get(5).is_some());

        let fuzzy = svc
            .search_by_name_or_object_id(false, "bob@", SearchType::Fuzzy)
            .await
            .unwrap();
        let ids: Vec<_> = fuzzy.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![1, 4, 6]);
    }
}
