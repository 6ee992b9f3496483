//! Node search results and their ordering.

use serde::{Deserialize, Serialize};

use crate::graph::Node;
use crate::models::unified::display_name;
use crate::schema::{self, ad, azure, property};

/// A node rendered for the search box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(rename = "objectid")]
    pub object_id: String,
    /// Display kind.
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(rename = "distinguishedname")]
    pub distinguished_name: String,
    pub system_tags: String,
}

impl SearchResult {
    /// Renders a node. With open graph search enabled, nodes of unknown kind
    /// are labelled with their first kind instead.
    pub fn from_node(node: &Node, open_graph: bool) -> Self {
        let mut kind = schema::primary_kind(&node.kinds);
        if open_graph && kind == schema::UNKNOWN {
            if let Some(first) = node.kinds.first() {
                kind = first.clone();
            }
        }

        Self {
            object_id: node
                .property_str(property::OBJECT_ID)
                .unwrap_or(schema::DEFAULT_MISSING_OBJECT_ID)
                .to_string(),
            kind: kind.to_string(),
            name: display_name(&node.properties),
            distinguished_name: node
                .property_str(property::DISTINGUISHED_NAME)
                .unwrap_or_default()
                .to_string(),
            system_tags: node
                .property_str(property::SYSTEM_TAGS)
                .unwrap_or_default()
                .to_string(),
        }
    }
}

/// How [`search_by_name_or_object_id`](crate::services::GraphQuery::search_by_name_or_object_id)
/// matches its input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    /// Name or object id equals the input.
    Exact,
    /// Name or object id starts with the input.
    Fuzzy,
}

/// Search hits split by match quality.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSearchResults {
    pub exact: Vec<SearchResult>,
    pub fuzzy: Vec<SearchResult>,
}

/// Orders exact hits first, then fuzzy hits by name, and cuts one page.
///
/// A `skip` past the end yields an empty page.
pub fn format_search_results(
    results: NodeSearchResults,
    skip: usize,
    limit: usize,
) -> Vec<SearchResult> {
    let NodeSearchResults { exact, mut fuzzy } = results;
    fuzzy.sort_by(|a, b| a.name.cmp(&b.name));

    let mut ordered = exact;
    ordered.extend(fuzzy);

    let skip = skip.min(ordered.len());
    let end = skip.saturating_add(limit).min(ordered.len());
    ordered.drain(skip..end).collect()
}

/// Keeps the nodes whose environment is listed and renders them.
///
/// An Azure node's environment is its tenant id and an AD node's is its
/// domain SID; nodes missing that property are dropped. Without a filter
/// every node is kept.
pub fn filter_search_results<'a, I>(
    nodes: I,
    open_graph: bool,
    environments: Option<&[String]>,
) -> Vec<SearchResult>
where
    I: IntoIterator<Item = &'a Node>,
{
    nodes
        .into_iter()
        .filter(|node| match environments {
            None => true,
            Some(allowed) => environment_id(node)
                .map(|id| allowed.iter().any(|env| env == id))
                .unwrap_or(false),
        })
        .map(|node| SearchResult::from_node(node, open_graph))
        .collect()
}

fn environment_id(node: &Node) -> Option<&str> {
    if node.has_kind(&azure::ENTITY) {
        node.property_str(property::TENANT_ID)
    } else if node.has_kind(&ad::ENTITY) {
        node.property_str(property::DOMAIN_SID)
    } else {
        Some("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Kind, Properties};
    use serde_json::json;

    fn result(name: &str) -> SearchResult {
        SearchResult {
            object_id: format!("OID-{}", name),
            kind: "User".to_string(),
            name: name.to_string(),
            distinguished_name: String::new(),
            system_tags: String::new(),
        }
    }

    fn node(id: i64, kinds: Vec<Kind>, props: serde_json::Value) -> Node {
        let properties: Properties = match props {
            serde_json::Value::Object(map) => map,
            _ => Properties::new(),
        };
        Node::new(id, kinds, properties)
    }

    fn names(results: &[SearchResult]) -> Vec<&str> {
        results.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_exact_first_then_fuzzy_by_name() {
        let results = NodeSearchResults {
            exact: vec![result("BOB")],
            fuzzy: vec![result("ZED BOB"), result("ALICE BOB")],
        };

        let page = format_search_results(results, 0, 10);
        assert_eq!(names(&page), vec!["BOB", "ALICE BOB", "ZED BOB"]);
    }

    #[test]
    fn test_paging_clamps() {
        let results = NodeSearchResults {
            exact: vec![result("A")],
            fuzzy: vec![result("C"), result("B")],
        };

        assert_eq!(names(&format_search_results(results.clone(), 1, 1)), vec!["B"]);
        assert_eq!(names(&format_search_results(results.clone(), 2, 10)), vec!["C"]);
        assert!(format_search_results(results, 10, 10).is_empty());
    }

    #[test]
    fn test_from_node_fallbacks() {
        let bare = node(1, vec![Kind::new("Widget")], json!({}));

        let rendered = SearchResult::from_node(&bare, false);
        assert_eq!(rendered.name, "NO NAME");
        assert_eq!(rendered.object_id, "NO OBJECT ID");
        assert_eq!(rendered.kind, "Unknown");

        assert_eq!(SearchResult::from_node(&bare, true).kind, "Widget");
    }

    #[test]
    fn test_environment_filter() {
        let nodes = vec![
            node(1, vec![ad::ENTITY, ad::USER], json!({"name": "IN", "domainsid": "S-1-5-21-1"})),
            node(2, vec![ad::ENTITY, ad::USER], json!({"name": "OUT", "domainsid": "S-1-5-21-2"})),
            node(3, vec![azure::ENTITY, azure::USER], json!({"name": "AZ", "tenantid": "T1"})),
            node(4, vec![ad::ENTITY, ad::USER], json!({"name": "NOSID"})),
        ];

        let allowed = vec!["S-1-5-21-1".to_string(), "T1".to_string()];
        let filtered = filter_search_results(&nodes, false, Some(&allowed));
        assert_eq!(names(&filtered), vec!["IN", "AZ"]);

        assert_eq!(filter_search_results(&nodes, false, None).len(), 4);
    }

    #[test]
    fn test_serialized_field_names() {
        let value = serde_json::to_value(result("BOB")).unwrap();
        assert_eq!(value["objectid"], "OID-BOB");
        assert_eq!(value["type"], "User");
        assert!(value.get("distinguishedname").is_some());
    }
}
