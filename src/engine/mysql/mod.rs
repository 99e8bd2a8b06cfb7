//! MySQL Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for MySQL databases (including MariaDB).
//!
//! # Features
//! - Client-server connections via TCP
//! - Schema discovery via `information_schema`, with server-internal schemas hidden
//! - Native DDL via `SHOW CREATE TABLE`
//!
//! # Implementation Notes
//! - Uses `mysql_async` (async driver, requires tokio runtime)
//! - No default database is selected: MySQL schemas are databases, and every
//!   catalog statement names its schema explicitly
//! - Column names come from result metadata, so empty result sets keep them
//! - ENUM and SET types converted to strings
//! - BLOB data is Base64-encoded for JSON safety

use mysql_async::consts::ColumnType;
use mysql_async::{prelude::*, Conn, OptsBuilder, Row, Value};
use tracing::{debug, info, warn};

use crate::engine::{DatabaseEngine, DatabaseTarget, Endpoint, QueryResult};
use crate::error::{AskDbError, Result};

/// Schemas owned by the server itself
const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "mysql", "performance_schema", "sys"];

/// Table name prefixes reserved for server-internal tables
const SYSTEM_TABLE_PREFIXES: &[&str] = &["mysql_", "sys_", "performance_schema_"];

/// MySQL database engine implementation
pub struct MySqlEngine;

impl DatabaseEngine for MySqlEngine {
    async fn test_connection(endpoint: &Endpoint) -> bool {
        let mut conn = match open(endpoint).await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(host = %endpoint.tcp.host, port = endpoint.tcp.port, error = %e, "mysql connection test failed");
                return false;
            }
        };

        let verified: std::result::Result<Option<Row>, _> = conn.query_first("SELECT 1").await;
        close(conn).await;

        match verified {
            Ok(_) => {
                info!(host = %endpoint.tcp.host, port = endpoint.tcp.port, "mysql connection established");
                true
            }
            Err(e) => {
                warn!(error = %e, "mysql connection opened but verification query failed");
                false
            }
        }
    }

    async fn list_accessible_schemas(endpoint: &Endpoint) -> Result<Vec<String>> {
        let mut conn = open(endpoint).await?;
        let result = list_schemas_mysql(&mut conn).await;
        close(conn).await;
        result
    }

    async fn list_tables(endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        let mut conn = open(endpoint).await?;
        let result = list_tables_mysql(&mut conn, schema).await;
        close(conn).await;
        result
    }

    async fn table_ddl(endpoint: &Endpoint, schema: &str, table: &str) -> Result<String> {
        let mut conn = open(endpoint).await?;
        let result = show_create_table(&mut conn, schema, table).await;
        close(conn).await;
        result
    }

    async fn schema_ddl(endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        let mut conn = open(endpoint).await?;

        let tables = match list_tables_mysql(&mut conn, schema).await {
            Ok(tables) => tables,
            Err(e) => {
                close(conn).await;
                return Err(e);
            }
        };

        let mut ddls = Vec::with_capacity(tables.len());
        for table in &tables {
            match show_create_table(&mut conn, schema, table).await {
                Ok(ddl) => ddls.push(ddl),
                Err(e) => warn!(schema, table = %table, error = %e, "skipping table, DDL unavailable"),
            }
        }

        close(conn).await;
        Ok(ddls)
    }

    async fn execute(endpoint: &Endpoint, sql: &str) -> Result<QueryResult> {
        if sql.trim().is_empty() {
            return Err(AskDbError::invalid_input("Query cannot be empty"));
        }

        let mut conn = open(endpoint).await?;
        debug!(sql, "executing query");
        let result = execute_query(&mut conn, sql).await;
        close(conn).await;
        result
    }
}

/// Build MySQL connection options from an `Endpoint`
fn build_mysql_opts(endpoint: &Endpoint) -> Result<OptsBuilder> {
    if endpoint.target != DatabaseTarget::MySql {
        return Err(AskDbError::invalid_input(format!(
            "Expected MySQL target, got {}",
            endpoint.engine()
        )));
    }

    if endpoint.tcp.host.trim().is_empty() {
        return Err(AskDbError::invalid_input("MySQL requires 'host' parameter"));
    }

    let opts = OptsBuilder::default()
        .ip_or_hostname(endpoint.tcp.host.clone())
        .tcp_port(endpoint.tcp.port)
        .user(Some(endpoint.tcp.user.clone()))
        .pass(Some(endpoint.tcp.password.clone()));

    Ok(opts)
}

async fn open(endpoint: &Endpoint) -> Result<Conn> {
    let opts = build_mysql_opts(endpoint)?;
    Conn::new(opts).await.map_err(|e| {
        AskDbError::connectivity(format!(
            "Failed to connect to MySQL at {}:{}: {e}",
            endpoint.tcp.host, endpoint.tcp.port
        ))
    })
}

async fn close(conn: Conn) {
    if let Err(e) = conn.disconnect().await {
        debug!(error = %e, "mysql disconnect failed");
    }
}

/// Whether a schema belongs to the server rather than to users
#[must_use]
pub fn is_system_schema(name: &str) -> bool {
    SYSTEM_SCHEMAS.iter().any(|s| name.eq_ignore_ascii_case(s)) || name.starts_with("mysql_")
}

/// Whether a table name carries a server-internal prefix
#[must_use]
pub fn is_system_table(name: &str) -> bool {
    SYSTEM_TABLE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

async fn list_schemas_mysql(conn: &mut Conn) -> Result<Vec<String>> {
    let query = "SELECT CAST(schema_name AS CHAR)
                 FROM information_schema.schemata
                 ORDER BY schema_name";

    let names: Vec<String> = conn
        .query(query)
        .await
        .map_err(|e| AskDbError::connectivity(format!("Failed to list schemas: {e}")))?;

    let schemas: Vec<String> = names.into_iter().filter(|name| !is_system_schema(name)).collect();
    if schemas.is_empty() {
        warn!("no user schemas visible on server");
    } else {
        debug!(count = schemas.len(), "schemas found");
    }

    Ok(schemas)
}

/// Base tables and views of `schema`
async fn list_tables_mysql(conn: &mut Conn, schema: &str) -> Result<Vec<String>> {
    let query = "SELECT CAST(table_name AS CHAR)
                 FROM information_schema.tables
                 WHERE table_schema = ?
                 ORDER BY table_name";

    let names: Vec<String> = conn.exec(query, (schema,)).await.map_err(|e| {
        AskDbError::connectivity(format!("Failed to list tables in schema '{schema}': {e}"))
    })?;

    Ok(names.into_iter().filter(|name| !is_system_table(name)).collect())
}

fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

async fn show_create_table(conn: &mut Conn, schema: &str, table: &str) -> Result<String> {
    let qualified = format!("{schema}.{table}");
    let statement =
        format!("SHOW CREATE TABLE {}.{}", quote_identifier(schema), quote_identifier(table));

    let row: Row = conn
        .query_first(statement)
        .await
        .map_err(|e| AskDbError::introspection(&qualified, e.to_string()))?
        .ok_or_else(|| AskDbError::introspection(&qualified, "SHOW CREATE TABLE returned no rows"))?;

    // Column 0 is the name, column 1 the statement ("Create Table" or "Create View")
    match row.get_opt::<String, _>(1) {
        Some(Ok(ddl)) => Ok(ddl),
        Some(Err(e)) => Err(AskDbError::introspection(&qualified, e.to_string())),
        None => Err(AskDbError::introspection(&qualified, "missing DDL column")),
    }
}

/// Execute query and return `QueryResult`
async fn execute_query(conn: &mut Conn, query: &str) -> Result<QueryResult> {
    let result = conn
        .query_iter(query)
        .await
        .map_err(|e| AskDbError::query_failed(format!("Failed to execute query: {e}")))?;

    // Result metadata is present even when no rows come back
    let columns: Vec<String> =
        result.columns_ref().iter().map(|col| col.name_str().to_string()).collect();
    let column_types: Vec<ColumnType> =
        result.columns_ref().iter().map(mysql_async::Column::column_type).collect();
    let affected = result.affected_rows();

    let rows: Vec<Row> = result
        .collect_and_drop()
        .await
        .map_err(|e| AskDbError::query_failed(format!("Failed to read query results: {e}")))?;

    if columns.is_empty() {
        return Ok(QueryResult::affected(affected));
    }

    let mut rows_data = Vec::with_capacity(rows.len());
    for row in &rows {
        let mut values = Vec::with_capacity(columns.len());
        for (idx, column_type) in column_types.iter().enumerate() {
            values.push(mysql_value_to_json(row, idx, *column_type)?);
        }
        rows_data.push(values);
    }

    Ok(QueryResult { columns, rows: rows_data, rows_affected: None })
}

fn float_to_json(v: f64) -> serde_json::Value {
    // NaN/Infinity become null
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Text-protocol values arrive as bytes; use the column type to restore numbers
fn bytes_to_json(bytes: &[u8], column_type: ColumnType) -> serde_json::Value {
    let Ok(text) = std::str::from_utf8(bytes) else {
        // Binary data - encode as Base64
        use base64::Engine;
        return serde_json::Value::String(base64::engine::general_purpose::STANDARD.encode(bytes));
    };

    match column_type {
        ColumnType::MYSQL_TYPE_TINY
        | ColumnType::MYSQL_TYPE_SHORT
        | ColumnType::MYSQL_TYPE_INT24
        | ColumnType::MYSQL_TYPE_LONG
        | ColumnType::MYSQL_TYPE_LONGLONG
        | ColumnType::MYSQL_TYPE_YEAR => text
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| text.parse::<u64>().map(serde_json::Value::from))
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
        ColumnType::MYSQL_TYPE_FLOAT | ColumnType::MYSQL_TYPE_DOUBLE => text
            .parse::<f64>()
            .map_or_else(|_| serde_json::Value::String(text.to_string()), float_to_json),
        ColumnType::MYSQL_TYPE_JSON => serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::Value::String(text.to_string())),
        // DECIMAL stays a string to keep its precision
        _ => serde_json::Value::String(text.to_string()),
    }
}

/// Convert MySQL value to JSON value
fn mysql_value_to_json(row: &Row, idx: usize, column_type: ColumnType) -> Result<serde_json::Value> {
    let value = row
        .as_ref(idx)
        .ok_or_else(|| AskDbError::query_failed(format!("Failed to get value at index {idx}")))?;

    let json_value = match value {
        Value::NULL => serde_json::Value::Null,

        Value::Bytes(bytes) => bytes_to_json(bytes, column_type),

        Value::Int(i) => serde_json::Value::from(*i),

        Value::UInt(u) => serde_json::Value::from(*u),

        Value::Float(f) => float_to_json(f64::from(*f)),

        Value::Double(d) => float_to_json(*d),

        Value::Date(year, month, day, hour, minute, second, micro) => serde_json::Value::String(
            format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}.{micro:06}"),
        ),

        Value::Time(is_negative, days, hours, minutes, seconds, microseconds) => {
            let sign = if *is_negative { "-" } else { "" };
            let total_hours = days * 24 + u32::from(*hours);
            serde_json::Value::String(format!(
                "{sign}{total_hours}:{minutes:02}:{seconds:02}.{microseconds:06}"
            ))
        }
    };

    Ok(json_value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::TcpTarget;

    fn endpoint() -> Endpoint {
        Endpoint::new(DatabaseTarget::MySql, TcpTarget::new("localhost", 3306, "root", "password"))
    }

    #[test]
    fn test_system_schemas_hidden() {
        for name in ["information_schema", "mysql", "performance_schema", "sys", "mysql_innodb_cluster_metadata"] {
            assert!(is_system_schema(name), "{name} should be hidden");
        }
        for name in ["sakila", "analytics", "mysqlish", "system"] {
            assert!(!is_system_schema(name), "{name} should be visible");
        }
    }

    #[test]
    fn test_system_tables_hidden() {
        assert!(is_system_table("mysql_audit"));
        assert!(is_system_table("sys_config"));
        assert!(is_system_table("performance_schema_stats"));
        assert!(!is_system_table("actor"));
        assert!(!is_system_table("system_events"));
    }

    #[test]
    fn test_quote_identifier_escapes_backticks() {
        assert_eq!(quote_identifier("orders"), "`orders`");
        assert_eq!(quote_identifier("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_text_values_restore_numbers() {
        assert_eq!(bytes_to_json(b"42", ColumnType::MYSQL_TYPE_LONG), serde_json::json!(42));
        assert_eq!(
            bytes_to_json(b"18446744073709551615", ColumnType::MYSQL_TYPE_LONGLONG),
            serde_json::json!(18_446_744_073_709_551_615_u64)
        );
        assert_eq!(bytes_to_json(b"2.5", ColumnType::MYSQL_TYPE_DOUBLE), serde_json::json!(2.5));
        assert_eq!(
            bytes_to_json(b"12.3400", ColumnType::MYSQL_TYPE_NEWDECIMAL),
            serde_json::json!("12.3400")
        );
        assert_eq!(
            bytes_to_json(br#"{"a":1}"#, ColumnType::MYSQL_TYPE_JSON),
            serde_json::json!({"a": 1})
        );
    }

    #[test]
    fn test_binary_values_base64() {
        let value = bytes_to_json(&[0xff, 0xfe, 0x00], ColumnType::MYSQL_TYPE_BLOB);
        assert_eq!(value, serde_json::json!("//4A"));
    }

    #[test]
    fn test_build_opts_rejects_postgres_target() {
        let endpoint = Endpoint::new(
            DatabaseTarget::Postgres { database: "postgres".to_string() },
            TcpTarget::new("localhost", 5432, "postgres", "pw"),
        );
        let err = build_mysql_opts(&endpoint).unwrap_err();
        assert!(err.message().contains("Expected MySQL target"));
    }

    #[test]
    fn test_build_opts_requires_host() {
        let endpoint = Endpoint::new(DatabaseTarget::MySql, TcpTarget::new("", 3306, "root", "pw"));
        let err = build_mysql_opts(&endpoint).unwrap_err();
        assert!(err.message().contains("MySQL requires 'host' parameter"));
    }

    #[tokio::test]
    async fn test_connection_to_closed_port_is_false() {
        let endpoint =
            Endpoint::new(DatabaseTarget::MySql, TcpTarget::new("127.0.0.1", 1, "root", "pw"));
        assert!(!MySqlEngine::test_connection(&endpoint).await);
    }

    // Note: Integration tests require a running MySQL instance
    // They are marked with #[ignore] and should be run with:
    // cargo test --features mysql -- --ignored

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_live_connection() {
        assert!(MySqlEngine::test_connection(&endpoint()).await);
    }

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_live_schemas_exclude_system() {
        let schemas = MySqlEngine::list_accessible_schemas(&endpoint()).await.unwrap();
        assert!(schemas.iter().all(|s| !is_system_schema(s)));
    }

    #[tokio::test]
    #[ignore = "Requires running MySQL instance"]
    async fn test_live_empty_result_keeps_columns() {
        let result = MySqlEngine::execute(&endpoint(), "SELECT 1 AS one, 2 AS two FROM DUAL WHERE 1 = 0")
            .await
            .unwrap();
        assert_eq!(result.columns, vec!["one", "two"]);
        assert!(result.rows.is_empty());
    }
}
