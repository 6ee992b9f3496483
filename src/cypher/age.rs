//! Apache AGE push-down translation.
//!
//! AGE runs Cypher through the `cypher()` set-returning function, which
//! needs an explicit SQL column list matching the final `RETURN`.

use crate::cypher::format::Emitter;
use crate::cypher::model::{Clause, ProjectionItems, Query};
use crate::cypher::ParseError;

/// Placeholder column for queries that return nothing.
const WRITE_ONLY_COLUMNS: &str = "result agtype";

/// Column names produced by the query's final `RETURN`.
///
/// Returns `None` when the query does not end in `RETURN` (write-only
/// queries). Aliased items use the alias, other items use their emitted
/// expression text.
pub fn return_columns(query: &Query) -> Result<Option<Vec<String>>, ParseError> {
    let ret = match query.first.clauses.last() {
        Some(Clause::Return(ret)) => ret,
        _ => return Ok(None),
    };

    let items = match &ret.projection.items {
        ProjectionItems::All => return Err(ParseError::ReturnStarNotSupported),
        ProjectionItems::Items(items) => items,
    };

    let emitter = Emitter::verbatim();
    items
        .iter()
        .map(|item| match &item.alias {
            Some(alias) => Ok(alias.clone()),
            None => emitter.emit_expression(&item.expression),
        })
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

/// Dollar-quote delimiter that does not occur in `body`.
///
/// Plain `$$` unless the body contains it, then `$gq$`, `$gq1$`, ...
fn dollar_tag(body: &str) -> String {
    if !body.contains("$$") {
        return "$$".to_string();
    }

    let mut tag = "$gq$".to_string();
    let mut suffix = 0;
    while body.contains(&tag) {
        suffix += 1;
        tag = format!("$gq{}$", suffix);
    }
    tag
}

/// Wraps Cypher text in the AGE `cypher()` call.
///
/// The Cypher is dollar-quoted with a tag absent from the text, so string
/// literals and escaped names cannot end the quote. Column names are always
/// quoted so reserved words such as `count` work. With `has_params` the
/// query takes its parameter map from `$1`.
pub fn wrap_cypher(
    graph_name: &str,
    cypher: &str,
    columns: Option<&[String]>,
    has_params: bool,
) -> String {
    let columns_sql = match columns {
        Some(columns) => columns
            .iter()
            .map(|name| format!("\"{}\" agtype", name.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(", "),
        None => WRITE_ONLY_COLUMNS.to_string(),
    };

    let graph_name = graph_name.replace('\'', "''");
    let tag = dollar_tag(cypher);
    let params = if has_params { ", $1" } else { "" };

    format!(
        "SELECT * FROM cypher('{}', {tag} {} {tag}{}) as ({})",
        graph_name,
        cypher,
        params,
        columns_sql,
        tag = tag
    )
}

/// Renders a parsed query as a complete AGE SQL statement.
pub fn translate(graph_name: &str, query: &Query) -> Result<String, ParseError> {
    let columns = return_columns(query)?;
    let cypher = Emitter::verbatim().emit(query)?;
    Ok(wrap_cypher(graph_name, &cypher, columns.as_deref(), false))
}
