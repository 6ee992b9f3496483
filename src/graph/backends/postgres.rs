//! PostgreSQL + Apache AGE backend.
//!
//! Cypher runs through AGE's `cypher()` set-returning function. Results come
//! back as `agtype` values, which are decoded into graph elements by shape:
//! vertices carry `id`, `label` and `properties`; edges additionally carry
//! `start_id` and `end_id`; paths are alternating vertex/edge arrays.
//!
//! # Example
//!
//! ```ignore
//! use graphquery::graph::backends::postgres::PostgresDatabase;
//! use graphquery::graph::Graph;
//!
//! let db = PostgresDatabase::connect(&config.postgres).await?;
//! db.ensure_graph_exists().await?;
//! let graph = Graph::new(Arc::new(db));
//! ```

use std::error::Error;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::BytesMut;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use futures::TryStreamExt;
use serde_json::{json, Value as JsonValue};
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, ToSql, Type};
use tokio_postgres::NoTls;

use crate::config::PostgresConfig;
use crate::cypher::{age, parser};
use crate::error::AppError;
use crate::graph::criteria::Criteria;
use crate::graph::model::{
    GraphId, Kind, Literal, Node, NodeSet, Path, Properties, QueryResult, Relationship,
};
use crate::graph::row::{Params, Row, RowStream};
use crate::graph::traits::{
    AccessMode, GraphDatabase, GraphReader, Statement, Transaction, TransactionConfig,
};

/// Property holding the kinds beyond a vertex's AGE label.
const KINDS_PROPERTY: &str = "kinds";

// ----------------------------------------------------------------------------
// Agtype parameter binding
// ----------------------------------------------------------------------------

/// Parameter map bound as AGE `agtype`.
///
/// `cypher()` only accepts its parameter map as `agtype`. The binary format
/// is a version byte (1) followed by JSON text. Values travel through the
/// extended query protocol and are never interpolated into query text.
#[derive(Debug, Clone)]
struct Agtype(String);

impl ToSql for Agtype {
    fn to_sql(
        &self,
        _ty: &Type,
        out: &mut BytesMut,
    ) -> Result<IsNull, Box<dyn Error + Sync + Send>> {
        out.extend_from_slice(&[1]);
        out.extend_from_slice(self.0.as_bytes());
        Ok(IsNull::No)
    }

    fn accepts(ty: &Type) -> bool {
        // agtype's OID differs per installation
        ty.name() == "agtype"
    }

    to_sql_checked!();
}

/// An `agtype` result column decoded to JSON.
#[derive(Debug)]
struct AgtypeValue(JsonValue);

impl<'a> FromSql<'a> for AgtypeValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let json_bytes = match raw.split_first() {
            None => return Ok(AgtypeValue(JsonValue::Null)),
            Some((&1, rest)) => rest,
            Some(_) => raw,
        };
        let text = std::str::from_utf8(json_bytes)?;

        // Strip the type annotations AGE appends to graph elements, including
        // the ones nested inside paths and lists.
        let clean = text
            .replace("}::vertex", "}")
            .replace("}::edge", "}")
            .replace("]::path", "]");

        Ok(AgtypeValue(serde_json::from_str(&clean)?))
    }

    fn accepts(ty: &Type) -> bool {
        ty.name() == "agtype"
    }
}

// ----------------------------------------------------------------------------
// Database
// ----------------------------------------------------------------------------

/// Pooled PostgreSQL + AGE database.
///
/// Cheap to clone; the pool is `Arc`-based.
#[derive(Clone)]
pub struct PostgresDatabase {
    pool: Pool,
    graph_name: Arc<str>,
}

impl PostgresDatabase {
    /// Creates the connection pool. Connections are opened lazily.
    pub async fn connect(config: &PostgresConfig) -> Result<Self, AppError> {
        let pg_config: tokio_postgres::Config = config.uri.parse().map_err(|e| {
            AppError::Connection(format!("Invalid PostgreSQL connection string: {}", e))
        })?;

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
        let pool = Pool::builder(mgr)
            .max_size(config.pool_size)
            .build()
            .map_err(|e| AppError::Connection(format!("Failed to create connection pool: {}", e)))?;

        Ok(Self {
            pool,
            graph_name: Arc::from(config.graph_name.as_str()),
        })
    }

    /// Gets a connection from the pool with the AGE session loaded.
    async fn get_connection(&self) -> Result<Object, AppError> {
        let conn = self.pool.get().await.map_err(|e| {
            AppError::Connection(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.batch_execute("LOAD 'age'; SET search_path = ag_catalog, public;")
            .await
            .map_err(|e| AppError::Connection(format!("Failed to initialize AGE session: {}", e)))?;

        Ok(conn)
    }

    pub fn graph_name(&self) -> &str {
        &self.graph_name
    }

    /// Creates the AGE graph if it does not exist yet.
    pub async fn ensure_graph_exists(&self) -> Result<(), AppError> {
        let conn = self.get_connection().await?;
        let name = self.graph_name.replace('\'', "''");

        // create_graph has no IF NOT EXISTS form
        let sql = format!(
            r#"
            DO $$
            BEGIN
                IF NOT EXISTS (
                    SELECT 1 FROM ag_catalog.ag_graph WHERE name = '{name}'
                ) THEN
                    PERFORM ag_catalog.create_graph('{name}');
                END IF;
            END $$;
            "#
        );

        conn.batch_execute(&sql)
            .await
            .map_err(|e| AppError::Connection(format!("Failed to ensure graph exists: {}", e)))
    }
}

/// Session statements that open a transaction in the given mode.
fn begin_statements(mode: AccessMode, config: &TransactionConfig) -> String {
    let mut sql = String::from(match mode {
        AccessMode::Read => "BEGIN READ ONLY;",
        AccessMode::Write | AccessMode::Batch => "BEGIN;",
    });

    if let Some(timeout) = config.timeout {
        // A zero statement_timeout would disable the deadline entirely
        let millis = timeout.as_millis().max(1);
        let _ = write!(sql, " SET LOCAL statement_timeout = {};", millis);
    }
    if mode == AccessMode::Batch {
        sql.push_str(" SET LOCAL synchronous_commit = off;");
    }
    sql
}

#[async_trait]
impl GraphDatabase for PostgresDatabase {
    async fn begin(
        &self,
        mode: AccessMode,
        config: TransactionConfig,
    ) -> Result<Box<dyn Transaction>, AppError> {
        let conn = self.get_connection().await?;

        conn.batch_execute(&begin_statements(mode, &config))
            .await
            .map_err(|e| AppError::Connection(format!("Failed to begin transaction: {}", e)))?;

        Ok(Box::new(PostgresTransaction {
            conn,
            graph_name: self.graph_name.clone(),
            finished: AtomicBool::new(false),
        }))
    }
}

// ----------------------------------------------------------------------------
// Transaction
// ----------------------------------------------------------------------------

/// An open transaction on a pooled connection.
///
/// Must be committed or rolled back; dropping it unfinished logs a warning.
pub struct PostgresTransaction {
    conn: Object,
    graph_name: Arc<str>,
    finished: AtomicBool,
}

impl PostgresTransaction {
    async fn query_stream(
        &self,
        sql: &str,
        param: Option<&Agtype>,
        query: &str,
    ) -> Result<RowStream<'_>, AppError> {
        let stream = match param {
            None => {
                self.conn
                    .query_raw::<_, &Agtype, _>(sql, std::iter::empty())
                    .await
            }
            Some(param) => self.conn.query_raw(sql, std::iter::once(param)).await,
        }
        .map_err(|e| map_pg_error(e, query))?;

        let query = query.to_string();
        Ok(Box::pin(
            stream
                .map_ok(|row| parse_pg_row(&row))
                .map_err(move |e| map_pg_error(e, &query)),
        ))
    }

    async fn query_rows(&self, sql: &str, param: Option<&Agtype>, query: &str) -> Result<Vec<Row>, AppError> {
        self.query_stream(sql, param, query).await?.try_collect().await
    }

    /// Runs internal Cypher with bound parameters.
    async fn cypher_rows(&self, cypher: &str, params: &Params) -> Result<Vec<Row>, AppError> {
        let (sql, param) = build_age_query(&self.graph_name, cypher, params)?;
        self.query_rows(&sql, param.as_ref(), cypher).await
    }

    async fn finish(&self, sql: &str) -> Result<(), AppError> {
        self.finished.store(true, Ordering::SeqCst);
        self.conn
            .batch_execute(sql)
            .await
            .map_err(|e| map_pg_error(e, sql))
    }
}

#[async_trait]
impl GraphReader for PostgresTransaction {
    async fn fetch_by_query(&self, statement: &Statement) -> Result<QueryResult, AppError> {
        let rows = match statement {
            Statement::Cypher(cypher) => self.cypher_rows(cypher, &Params::new()).await?,
            Statement::Sql(sql) => self.query_rows(sql, None, sql).await?,
        };

        let mut result = QueryResult::default();
        for row in rows {
            for (key, value) in row.into_inner() {
                decode_column(key, value, &mut result);
            }
        }
        Ok(result)
    }

    async fn fetch_nodes(&self, criteria: &Criteria) -> Result<NodeSet, AppError> {
        let mut params = Params::new();
        let cypher = format!(
            "MATCH (n) WHERE {} RETURN n",
            criteria.to_cypher("n", &mut params)
        );

        let mut nodes = NodeSet::new();
        for row in self.cypher_rows(&cypher, &params).await? {
            if let Some(node) = row.get_raw("n").and_then(decode_node) {
                nodes.insert(node);
            }
        }
        Ok(nodes)
    }

    async fn count_nodes(&self, criteria: &Criteria) -> Result<i64, AppError> {
        let mut params = Params::new();
        let cypher = format!(
            "MATCH (n) WHERE {} RETURN count(n) AS total",
            criteria.to_cypher("n", &mut params)
        );

        match self.cypher_rows(&cypher, &params).await?.first() {
            Some(row) => row.get("total"),
            None => Ok(0),
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn update_node(&self, node: &Node) -> Result<(), AppError> {
        let (cypher, params) = update_node_cypher(node);
        self.cypher_rows(&cypher, &params).await.map(|_| ())
    }

    async fn commit(&self) -> Result<(), AppError> {
        self.finish("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), AppError> {
        self.finish("ROLLBACK").await
    }
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished.load(Ordering::SeqCst) {
            tracing::warn!(
                "PostgresTransaction dropped without commit or rollback - connection state undefined"
            );
        }
    }
}

fn map_pg_error(err: tokio_postgres::Error, query: &str) -> AppError {
    if err.code() == Some(&SqlState::QUERY_CANCELED) {
        return AppError::Timeout {
            message: err.to_string(),
            query: query.to_string(),
        };
    }

    let detail = err
        .as_db_error()
        .map(|db_err| {
            format!(
                "{}: {} ({})",
                db_err.severity(),
                db_err.message(),
                db_err.code().code()
            )
        })
        .unwrap_or_else(|| err.to_string());

    AppError::Query {
        message: detail,
        query: query.to_string(),
    }
}

/// Builds the `SET` statement that writes a node's kinds and properties back.
fn update_node_cypher(node: &Node) -> (String, Params) {
    let mut params = Params::new();
    params.insert("id".to_string(), json!(node.id));
    params.insert(KINDS_PROPERTY.to_string(), json!(node.kind_names()));

    let mut assignments = vec![format!("n.{} = ${}", KINDS_PROPERTY, KINDS_PROPERTY)];
    for (idx, (key, value)) in node
        .properties
        .iter()
        .filter(|(key, _)| key.as_str() != KINDS_PROPERTY)
        .enumerate()
    {
        let name = format!("v{}", idx);
        assignments.push(format!("n.`{}` = ${}", key.replace('`', "``"), name));
        params.insert(name, value.clone());
    }

    let cypher = format!(
        "MATCH (n) WHERE id(n) = $id SET {}",
        assignments.join(", ")
    );
    (cypher, params)
}

/// Builds the AGE SQL for internal Cypher that may reference parameters.
///
/// Returns the SQL and the parameter map to bind as `$1`, if any.
fn build_age_query(
    graph_name: &str,
    cypher: &str,
    params: &Params,
) -> Result<(String, Option<Agtype>), AppError> {
    let query = parser::parse_query(cypher)?;
    let columns = age::return_columns(&query)?;
    let sql = age::wrap_cypher(graph_name, cypher, columns.as_deref(), !params.is_empty());

    if params.is_empty() {
        return Ok((sql, None));
    }

    let params_json = serde_json::to_string(params)
        .map_err(|e| AppError::Internal(format!("Failed to serialize parameters: {}", e)))?;
    Ok((sql, Some(Agtype(params_json))))
}

// ----------------------------------------------------------------------------
// Row decoding
// ----------------------------------------------------------------------------

/// Converts a PostgreSQL row into a [`Row`] in column order.
fn parse_pg_row(pg_row: &tokio_postgres::Row) -> Row {
    let columns = pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let value = match column.type_().name() {
                "agtype" => pg_row.try_get::<_, AgtypeValue>(idx).ok().map(|v| v.0),
                "int2" => pg_row.try_get::<_, i16>(idx).ok().map(JsonValue::from),
                "int4" => pg_row.try_get::<_, i32>(idx).ok().map(JsonValue::from),
                "int8" => pg_row.try_get::<_, i64>(idx).ok().map(JsonValue::from),
                "float8" => pg_row.try_get::<_, f64>(idx).ok().map(JsonValue::from),
                "bool" => pg_row.try_get::<_, bool>(idx).ok().map(JsonValue::Bool),
                "json" | "jsonb" => pg_row.try_get::<_, JsonValue>(idx).ok(),
                _ => pg_row.try_get::<_, String>(idx).ok().map(JsonValue::String),
            };
            (column.name().to_string(), value.unwrap_or(JsonValue::Null))
        })
        .collect();

    Row::new(columns)
}

/// Sorts one result column into paths or literals.
fn decode_column(key: String, value: JsonValue, result: &mut QueryResult) {
    if let Some(path) = decode_path(&value) {
        result.paths.push(path);
    } else if let Some(node) = decode_node(&value) {
        result.paths.push(Path::from_node(node));
    } else if let Some(edge) = decode_edge(&value) {
        result.paths.push(Path::from_edge(edge));
    } else if let Some(items) = value.as_array().filter(|items| is_graph_list(items)) {
        for item in items {
            decode_column(key.clone(), item.clone(), result);
        }
    } else {
        result.literals.push(Literal { key, value });
    }
}

fn is_graph_list(items: &[JsonValue]) -> bool {
    !items.is_empty()
        && items.iter().all(|item| {
            decode_node(item).is_some() || decode_edge(item).is_some() || decode_path(item).is_some()
        })
}

fn element_id(object: &serde_json::Map<String, JsonValue>, key: &str) -> Option<GraphId> {
    object.get(key).and_then(JsonValue::as_i64)
}

fn decode_node(value: &JsonValue) -> Option<Node> {
    let object = value.as_object()?;
    if object.contains_key("start_id") {
        return None;
    }

    let id = element_id(object, "id")?;
    let label = object.get("label")?.as_str()?;
    let mut properties: Properties = object
        .get("properties")
        .and_then(JsonValue::as_object)
        .cloned()
        .unwrap_or_default();

    let mut kinds = Vec::new();
    if !label.is_empty() {
        kinds.push(Kind::new(label));
    }
    if let Some(JsonValue::Array(extra)) = properties.remove(KINDS_PROPERTY) {
        for kind in extra.iter().filter_map(JsonValue::as_str) {
            let kind = Kind::new(kind);
            if !kinds.contains(&kind) {
                kinds.push(kind);
            }
        }
    }

    Some(Node::new(id, kinds, properties))
}

fn decode_edge(value: &JsonValue) -> Option<Relationship> {
    let object = value.as_object()?;

    Some(Relationship {
        id: element_id(object, "id")?,
        start_id: element_id(object, "start_id")?,
        end_id: element_id(object, "end_id")?,
        kind: Kind::new(object.get("label")?.as_str()?),
        properties: object
            .get("properties")
            .and_then(JsonValue::as_object)
            .cloned()
            .unwrap_or_default(),
    })
}

fn decode_path(value: &JsonValue) -> Option<Path> {
    let items = value.as_array()?;
    if items.len() < 3 || items.len() % 2 == 0 {
        return None;
    }

    let mut path = Path::default();
    for (idx, item) in items.iter().enumerate() {
        if idx % 2 == 0 {
            path.nodes.push(decode_node(item)?);
        } else {
            path.edges.push(decode_edge(item)?);
        }
    }
    Some(path)
}
