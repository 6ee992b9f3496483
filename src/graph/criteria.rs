//! Backend-neutral node filters.
//!
//! Services describe which nodes they want with a [`Criteria`] tree; each
//! backend renders it into its own query language.

use serde_json::Value as JsonValue;

use crate::graph::model::Kind;
use crate::graph::row::Params;

/// A predicate over a single node.
#[derive(Debug, Clone, PartialEq)]
pub enum Criteria {
    And(Vec<Criteria>),
    Or(Vec<Criteria>),
    Not(Box<Criteria>),
    /// Node carries the kind.
    Kind(Kind),
    /// Node carries at least one of the kinds.
    KindIn(Vec<Kind>),
    /// Property equals the value.
    Equals(String, JsonValue),
    /// Property equals one of the values.
    In(String, Vec<JsonValue>),
    StringContains(String, String),
    StringStartsWith(String, String),
    IsNotNull(String),
}

pub fn and(criteria: Vec<Criteria>) -> Criteria {
    Criteria::And(criteria)
}

pub fn or(criteria: Vec<Criteria>) -> Criteria {
    Criteria::Or(criteria)
}

pub fn not(criteria: Criteria) -> Criteria {
    Criteria::Not(Box::new(criteria))
}

pub fn kind(kind: Kind) -> Criteria {
    Criteria::Kind(kind)
}

pub fn kind_in(kinds: &[Kind]) -> Criteria {
    Criteria::KindIn(kinds.to_vec())
}

pub fn equals(property: &str, value: impl Into<JsonValue>) -> Criteria {
    Criteria::Equals(property.to_string(), value.into())
}

pub fn contains(property: &str, value: &str) -> Criteria {
    Criteria::StringContains(property.to_string(), value.to_string())
}

pub fn starts_with(property: &str, value: &str) -> Criteria {
    Criteria::StringStartsWith(property.to_string(), value.to_string())
}

impl Criteria {
    /// Renders the predicate as a Cypher boolean expression over `var`.
    ///
    /// Values are bound through `params` rather than spliced into the text.
    /// Property names are backtick-quoted.
    pub fn to_cypher(&self, var: &str, params: &mut Params) -> String {
        match self {
            Criteria::And(items) => join(items, " AND ", "true", var, params),
            Criteria::Or(items) => join(items, " OR ", "false", var, params),
            Criteria::Not(inner) => format!("NOT ({})", inner.to_cypher(var, params)),
            Criteria::Kind(kind) => kind_predicate(var, kind, params),
            Criteria::KindIn(kinds) => {
                if kinds.is_empty() {
                    return "true".to_string();
                }
                let parts: Vec<String> = kinds
                    .iter()
                    .map(|kind| kind_predicate(var, kind, params))
                    .collect();
                format!("({})", parts.join(" OR "))
            }
            Criteria::Equals(property, value) => {
                let name = bind(params, value.clone());
                format!("{}.{} = ${}", var, quote(property), name)
            }
            Criteria::In(property, values) => {
                let name = bind(params, JsonValue::Array(values.clone()));
                format!("{}.{} IN ${}", var, quote(property), name)
            }
            Criteria::StringContains(property, value) => {
                let name = bind(params, JsonValue::String(value.clone()));
                format!("{}.{} CONTAINS ${}", var, quote(property), name)
            }
            Criteria::StringStartsWith(property, value) => {
                let name = bind(params, JsonValue::String(value.clone()));
                format!("{}.{} STARTS WITH ${}", var, quote(property), name)
            }
            Criteria::IsNotNull(property) => {
                format!("{}.{} IS NOT NULL", var, quote(property))
            }
        }
    }
}

fn join(items: &[Criteria], sep: &str, empty: &str, var: &str, params: &mut Params) -> String {
    if items.is_empty() {
        return empty.to_string();
    }
    let parts: Vec<String> = items.iter().map(|c| c.to_cypher(var, params)).collect();
    format!("({})", parts.join(sep))
}

// AGE vertices have a single label; additional kinds live in the `kinds`
// property list.
fn kind_predicate(var: &str, kind: &Kind, params: &mut Params) -> String {
    let name = bind(params, JsonValue::String(kind.to_string()));
    format!(
        "(label({var}) = ${name} OR ${name} IN coalesce({var}.kinds, []))",
        var = var,
        name = name
    )
}

fn bind(params: &mut Params, value: JsonValue) -> String {
    let name = format!("p{}", params.len());
    params.insert(name.clone(), value);
    name
}

fn quote(property: &str) -> String {
    format!("`{}`", property.replace('`', "``"))
}
