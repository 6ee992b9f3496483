//! Property-graph value types returned by the storage layer.
//!
//! Nodes carry an ordered kind list and a property map; relationships carry
//! a single kind. Paths are alternating node/relationship sequences. All of
//! these serialize with serde so they can round-trip through the result
//! cache.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Database identifier of a node or relationship.
pub type GraphId = i64;

/// Property map attached to nodes and relationships.
pub type Properties = Map<String, JsonValue>;

/// A node or relationship kind (label).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Kind(Cow<'static, str>);

impl Kind {
    /// Creates a kind from a static schema name.
    pub const fn from_static(name: &'static str) -> Self {
        Kind(Cow::Borrowed(name))
    }

    pub fn new(name: impl Into<String>) -> Self {
        Kind(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Kind {
    fn from(name: &str) -> Self {
        Kind::new(name)
    }
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: GraphId,
    pub kinds: Vec<Kind>,
    #[serde(default)]
    pub properties: Properties,
}

impl Node {
    pub fn new(id: GraphId, kinds: Vec<Kind>, properties: Properties) -> Self {
        Self {
            id,
            kinds,
            properties,
        }
    }

    pub fn has_kind(&self, kind: &Kind) -> bool {
        self.kinds.contains(kind)
    }

    pub fn has_any_kind(&self, kinds: &[Kind]) -> bool {
        kinds.iter().any(|kind| self.has_kind(kind))
    }

    /// Returns a string property, or `None` when absent or not a string.
    pub fn property_str(&self, key: &str) -> Option<&str> {
        self.properties.get(key).and_then(JsonValue::as_str)
    }

    /// Returns a string-list property, or `None` when absent or malformed.
    pub fn property_strings(&self, key: &str) -> Option<Vec<String>> {
        let values = self.properties.get(key)?.as_array()?;
        values
            .iter()
            .map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    /// Kind names in declaration order.
    pub fn kind_names(&self) -> Vec<String> {
        self.kinds.iter().map(|k| k.to_string()).collect()
    }
}

/// A directed graph relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: GraphId,
    pub start_id: GraphId,
    pub end_id: GraphId,
    pub kind: Kind,
    #[serde(default)]
    pub properties: Properties,
}

/// Alternating sequence of nodes and relationships.
///
/// A path with `n` relationships holds `n + 1` nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Path {
    pub nodes: Vec<Node>,
    pub edges: Vec<Relationship>,
}

impl Path {
    /// A path containing a single node and no relationships.
    pub fn from_node(node: Node) -> Self {
        Self {
            nodes: vec![node],
            edges: Vec::new(),
        }
    }

    /// A path containing a single relationship with unknown endpoints.
    pub fn from_edge(edge: Relationship) -> Self {
        Self {
            nodes: Vec::new(),
            edges: vec![edge],
        }
    }

    /// The terminal node of the path, if any.
    pub fn terminal(&self) -> Option<&Node> {
        self.nodes.last()
    }
}

/// Ordered collection of paths.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSet(Vec<Path>);

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, path: Path) {
        self.0.push(path);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Path> {
        self.0.iter()
    }

    /// Every distinct node appearing in any path.
    pub fn all_nodes(&self) -> NodeSet {
        let mut set = NodeSet::new();
        for path in &self.0 {
            for node in &path.nodes {
                set.insert(node.clone());
            }
        }
        set
    }
}

impl From<Vec<Path>> for PathSet {
    fn from(paths: Vec<Path>) -> Self {
        Self(paths)
    }
}

impl FromIterator<Path> for PathSet {
    fn from_iter<I: IntoIterator<Item = Path>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Set of nodes keyed by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeSet(BTreeMap<GraphId, Node>);

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a node, replacing any node with the same id.
    pub fn insert(&mut self, node: Node) {
        self.0.insert(node.id, node);
    }

    pub fn get(&self, id: GraphId) -> Option<&Node> {
        self.0.get(&id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Node> {
        self.0.values()
    }

    /// Nodes ordered by id, highest first.
    pub fn into_sorted_desc(self) -> Vec<Node> {
        self.0.into_values().rev().collect()
    }

    pub fn first(&self) -> Option<&Node> {
        self.0.values().next()
    }
}

impl FromIterator<Node> for NodeSet {
    fn from_iter<I: IntoIterator<Item = Node>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for node in iter {
            set.insert(node);
        }
        set
    }
}

impl IntoIterator for NodeSet {
    type Item = Node;
    type IntoIter = std::collections::btree_map::IntoValues<GraphId, Node>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_values()
    }
}

/// A named scalar or collection value returned next to graph elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Literal {
    pub key: String,
    pub value: JsonValue,
}

/// Everything a raw query returned, split into graph shape and literals.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub paths: PathSet,
    pub literals: Vec<Literal>,
}
