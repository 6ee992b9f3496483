//! Request and response models for graph queries.

mod entity;
mod search;
mod unified;

pub use entity::{
    DataType, EntityQueryParameters, EntityQueryResult, ListDelegate, PagedNodeListEntry,
    PathDelegate, DEFAULT_LIMIT,
};
pub use search::{
    filter_search_results, format_search_results, NodeSearchResults, SearchResult, SearchType,
};
pub use unified::{
    display_name, path_set_to_graph_map, GraphItem, PropertyKeys, UnifiedEdge, UnifiedGraph,
    UnifiedNode,
};
