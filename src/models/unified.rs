//! Backend-agnostic graph shape returned to callers for rendering.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::graph::{GraphId, Literal, Node, PathSet, Properties, Relationship};
use crate::schema::{self, property};

/// Minimal rendering record for a node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedNode {
    /// Display label: name, display name or object id.
    pub label: String,
    /// Primary kind.
    pub kind: String,
    /// Every kind the node carries.
    pub kinds: Vec<String>,
    pub object_id: String,
    pub is_tier_zero: bool,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

/// Minimal rendering record for a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedEdge {
    /// Id of the start node.
    pub source: String,
    /// Id of the end node.
    pub target: String,
    pub label: String,
    pub kind: String,
    pub last_seen: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<Properties>,
}

/// Sorted property key names present in a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyKeys {
    pub node_keys: Vec<String>,
    pub edge_keys: Vec<String>,
}

/// Nodes keyed by id plus edges in first-seen order.
///
/// Every element is converted once; adding the same node or relationship
/// again is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnifiedGraph {
    pub nodes: BTreeMap<String, UnifiedNode>,
    pub edges: Vec<UnifiedEdge>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub literals: Vec<Literal>,
    #[serde(skip)]
    seen_edges: HashSet<GraphId>,
}

impl UnifiedGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, node: &Node, include_properties: bool) {
        self.nodes
            .entry(node.id.to_string())
            .or_insert_with(|| unified_node(node, include_properties));
    }

    pub fn add_relationship(&mut self, relationship: &Relationship, include_properties: bool) {
        if self.seen_edges.insert(relationship.id) {
            self.edges
                .push(unified_edge(relationship, include_properties));
        }
    }

    /// Adds every node and relationship of every path.
    pub fn add_path_set(&mut self, paths: &PathSet, include_properties: bool) {
        for path in paths.iter() {
            for node in &path.nodes {
                self.add_node(node, include_properties);
            }
            for edge in &path.edges {
                self.add_relationship(edge, include_properties);
            }
        }
    }

    pub fn add_literals(&mut self, literals: Vec<Literal>) {
        self.literals.extend(literals);
    }

    /// Drops the property maps from every element.
    pub fn without_properties(mut self) -> Self {
        for node in self.nodes.values_mut() {
            node.properties = None;
        }
        for edge in &mut self.edges {
            edge.properties = None;
        }
        self
    }

    /// Collects the property names used by nodes and by edges.
    pub fn property_keys(&self) -> PropertyKeys {
        let node_keys: BTreeSet<&String> = self
            .nodes
            .values()
            .filter_map(|node| node.properties.as_ref())
            .flat_map(|props| props.keys())
            .collect();
        let edge_keys: BTreeSet<&String> = self
            .edges
            .iter()
            .filter_map(|edge| edge.properties.as_ref())
            .flat_map(|props| props.keys())
            .collect();

        PropertyKeys {
            node_keys: node_keys.into_iter().cloned().collect(),
            edge_keys: edge_keys.into_iter().cloned().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.edges.is_empty() && self.literals.is_empty()
    }
}

/// Either rendering record, keyed into an entity graph map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphItem {
    Node(UnifiedNode),
    Edge(UnifiedEdge),
}

/// Renders paths as a single map keyed by element id.
///
/// Relationship keys carry a `rel_` prefix since backends may reuse numeric
/// ids across nodes and relationships.
pub fn path_set_to_graph_map(paths: &PathSet) -> BTreeMap<String, GraphItem> {
    let mut graph = UnifiedGraph::new();
    graph.add_path_set(paths, false);

    let mut items = BTreeMap::new();
    for (id, node) in graph.nodes {
        items.insert(id, GraphItem::Node(node));
    }
    for (edge, id) in graph.edges.into_iter().zip(edge_ids(paths)) {
        items.insert(format!("rel_{}", id), GraphItem::Edge(edge));
    }
    items
}

/// Relationship ids in the order `add_path_set` first sees them.
fn edge_ids(paths: &PathSet) -> Vec<GraphId> {
    let mut seen = HashSet::new();
    paths
        .iter()
        .flat_map(|path| path.edges.iter())
        .filter(|edge| seen.insert(edge.id))
        .map(|edge| edge.id)
        .collect()
}

/// Display label with the name fallback chain used across the UI.
pub fn display_name(properties: &Properties) -> String {
    [property::NAME, property::DISPLAY_NAME, property::OBJECT_ID]
        .iter()
        .find_map(|key| {
            properties
                .get(*key)
                .and_then(JsonValue::as_str)
                .filter(|value| !value.is_empty())
        })
        .unwrap_or(schema::DEFAULT_MISSING_NAME)
        .to_string()
}

fn unified_node(node: &Node, include_properties: bool) -> UnifiedNode {
    let is_tier_zero = node
        .property_str(property::SYSTEM_TAGS)
        .map(|tags| tags.split_whitespace().any(|tag| tag == schema::TIER_ZERO_TAG))
        .unwrap_or(false);

    UnifiedNode {
        label: display_name(&node.properties),
        kind: schema::primary_kind(&node.kinds).to_string(),
        kinds: node.kind_names(),
        object_id: node.property_str(property::OBJECT_ID).unwrap_or_default().to_string(),
        is_tier_zero,
        last_seen: last_seen(&node.properties),
        properties: include_properties.then(|| node.properties.clone()),
    }
}

fn unified_edge(relationship: &Relationship, include_properties: bool) -> UnifiedEdge {
    UnifiedEdge {
        source: relationship.start_id.to_string(),
        target: relationship.end_id.to_string(),
        label: relationship.kind.to_string(),
        kind: relationship.kind.to_string(),
        last_seen: last_seen(&relationship.properties),
        properties: include_properties.then(|| relationship.properties.clone()),
    }
}

/// Reads `lastseen` as RFC 3339 text or epoch seconds.
fn last_seen(properties: &Properties) -> Option<DateTime<Utc>> {
    match properties.get(property::LAST_SEEN)? {
        JsonValue::String(text) => DateTime::parse_from_rfc3339(text)
            .ok()
            .map(|ts| ts.with_timezone(&Utc)),
        JsonValue::Number(number) => {
            let seconds = number.as_f64()?;
            Utc.timestamp_opt(seconds as i64, 0).single()
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Kind, Path};
    use crate::schema::ad;
    use serde_json::json;

    fn node(id: GraphId, name: Option<&str>, extra: JsonValue) -> Node {
        let mut properties = Properties::new();
        properties.insert("objectid".to_string(), json!(format!("S-1-5-{}", id)));
        if let Some(name) = name {
            properties.insert("name".to_string(), json!(name));
        }
        if let JsonValue::Object(extra) = extra {
            properties.extend(extra);
        }
        Node::new(id, vec![ad::ENTITY, ad::USER], properties)
    }

    fn edge(id: GraphId, start: GraphId, end: GraphId) -> Relationship {
        Relationship {
            id,
            start_id: start,
            end_id: end,
            kind: ad::MEMBER_OF,
            properties: Properties::new(),
        }
    }

    fn path() -> PathSet {
        PathSet::from(vec![Path {
            nodes: vec![
                node(1, Some("BOB@CORP"), json!({"system_tags": "admin_tier_0"})),
                node(2, None, json!({"lastseen": "2024-05-01T10:00:00Z"})),
            ],
            edges: vec![edge(1, 1, 2)],
        }])
    }

    #[test]
    fn test_add_path_set() {
        let mut graph = UnifiedGraph::new();
        graph.add_path_set(&path(), false);
        graph.add_path_set(&path(), false);

        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges.len(), 1);

        let bob = &graph.nodes["1"];
        assert_eq!(bob.label, "BOB@CORP");
        assert_eq!(bob.kind, "User");
        assert!(bob.is_tier_zero);
        assert!(bob.properties.is_none());

        let unnamed = &graph.nodes["2"];
        assert_eq!(unnamed.label, "S-1-5-2");
        assert!(!unnamed.is_tier_zero);
        assert_eq!(
            unnamed.last_seen,
            Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap())
        );

        assert_eq!(graph.edges[0].source, "1");
        assert_eq!(graph.edges[0].target, "2");
        assert_eq!(graph.edges[0].kind, "MemberOf");
    }

    #[test]
    fn test_property_keys_and_stripping() {
        let mut graph = UnifiedGraph::new();
        graph.add_path_set(&path(), true);

        let keys = graph.property_keys();
        assert_eq!(keys.node_keys, vec!["lastseen", "name", "objectid", "system_tags"]);
        assert!(keys.edge_keys.is_empty());

        let stripped = graph.without_properties();
        assert!(stripped.nodes.values().all(|n| n.properties.is_none()));
        assert_eq!(stripped.property_keys(), PropertyKeys::default());
    }

    #[test]
    fn test_display_name_fallbacks() {
        let mut properties = Properties::new();
        assert_eq!(display_name(&properties), "NO NAME");
        properties.insert("displayname".to_string(), json!("Bob"));
        assert_eq!(display_name(&properties), "Bob");
    }

    #[test]
    fn test_graph_map_prefixes_relationships() {
        let items = path_set_to_graph_map(&path());
        let keys: Vec<_> = items.keys().cloned().collect();
        assert_eq!(keys, vec!["1", "2", "rel_1"]);
        assert!(matches!(items["rel_1"], GraphItem::Edge(_)));
    }

    #[test]
    fn test_unknown_kind_node() {
        let mut graph = UnifiedGraph::new();
        graph.add_node(&Node::new(9, vec![Kind::new("Custom")], Properties::new()), false);
        assert_eq!(graph.nodes["9"].kind, "Unknown");
        assert_eq!(graph.nodes["9"].label, "NO NAME");
    }
}
