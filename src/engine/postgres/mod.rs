//! `PostgreSQL` Database Engine Implementation
//!
//! This module implements the `DatabaseEngine` trait for `PostgreSQL` databases.
//!
//! # Features
//! - Client-server connections via TCP
//! - Grant-based discovery via `information_schema.role_table_grants`
//! - `CREATE TABLE` synthesis from `pg_catalog` metadata (`PostgreSQL` has no
//!   native "show create table")
//! - Rich type system support (JSON/JSONB, timestamps, numerics, arrays)
//!
//! # Implementation Notes
//! - Uses `tokio-postgres` (async driver, requires tokio runtime)
//! - Every public operation opens its own connection and closes it before
//!   returning; the driver task is awaited on close
//! - All catalog queries are parameterised
//! - BYTEA data is Base64-encoded for JSON safety
//! - NUMERIC values are returned as strings to keep their precision

use std::fmt::Write as _;
use tokio::task::JoinHandle;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info, warn};

use crate::engine::{DatabaseEngine, DatabaseTarget, Endpoint, QueryResult};
use crate::error::{AskDbError, Result};

/// `PostgreSQL` database engine implementation
pub struct PostgresEngine;

impl DatabaseEngine for PostgresEngine {
    async fn test_connection(endpoint: &Endpoint) -> bool {
        let session = match PgSession::open(endpoint).await {
            Ok(session) => session,
            Err(e) => {
                warn!(host = %endpoint.tcp.host, port = endpoint.tcp.port, error = %e, "postgres connection test failed");
                return false;
            }
        };

        let verified = session.client.simple_query("SELECT 1").await;
        session.close().await;

        match verified {
            Ok(_) => {
                info!(host = %endpoint.tcp.host, port = endpoint.tcp.port, "postgres connection established");
                true
            }
            Err(e) => {
                warn!(error = %e, "postgres connection opened but verification query failed");
                false
            }
        }
    }

    async fn list_accessible_schemas(endpoint: &Endpoint) -> Result<Vec<String>> {
        let session = PgSession::open(endpoint).await?;
        let result = list_schemas_postgres(&session.client, &endpoint.tcp.user).await;
        session.close().await;
        result
    }

    async fn list_tables(endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        let session = PgSession::open(endpoint).await?;
        let result = list_tables_postgres(&session.client, &endpoint.tcp.user, schema).await;
        session.close().await;
        result
    }

    async fn table_ddl(endpoint: &Endpoint, schema: &str, table: &str) -> Result<String> {
        let session = PgSession::open(endpoint).await?;
        let result = fetch_table_definition(&session.client, schema, table).await;
        session.close().await;
        result.map(|definition| definition.to_ddl())
    }

    async fn schema_ddl(endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        let session = PgSession::open(endpoint).await?;

        let tables = match list_tables_postgres(&session.client, &endpoint.tcp.user, schema).await {
            Ok(tables) => tables,
            Err(e) => {
                session.close().await;
                return Err(e);
            }
        };

        let mut ddls = Vec::with_capacity(tables.len());
        for table in &tables {
            debug!(schema, table = %table, "fetching table definition");
            match fetch_table_definition(&session.client, schema, table).await {
                Ok(definition) => ddls.push(definition.to_ddl()),
                Err(e) => warn!(schema, table = %table, error = %e, "skipping table, DDL unavailable"),
            }
        }

        session.close().await;
        Ok(ddls)
    }

    async fn execute(endpoint: &Endpoint, sql: &str) -> Result<QueryResult> {
        if sql.trim().is_empty() {
            return Err(AskDbError::invalid_input("Query cannot be empty"));
        }

        let session = PgSession::open(endpoint).await?;
        debug!(sql, "executing query");
        let result = execute_query(&session.client, sql).await;
        session.close().await;
        result
    }
}

/// One open connection plus the task driving its socket
struct PgSession {
    client: Client,
    driver: JoinHandle<()>,
}

impl PgSession {
    async fn open(endpoint: &Endpoint) -> Result<Self> {
        let pg_config = build_pg_config(endpoint)?;

        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| {
            AskDbError::connectivity(format!(
                "Failed to connect to PostgreSQL at {}:{}: {e}",
                endpoint.tcp.host, endpoint.tcp.port
            ))
        })?;

        // Connection errors are not logged with parameters to prevent credential leakage
        let driver = tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!(error = %e, "postgres connection closed with error");
            }
        });

        Ok(Self { client, driver })
    }

    /// Drop the client and wait for the socket task to finish
    async fn close(self) {
        drop(self.client);
        let _ = self.driver.await;
    }
}

/// Build `PostgreSQL` connection config from an `Endpoint`
fn build_pg_config(endpoint: &Endpoint) -> Result<Config> {
    let DatabaseTarget::Postgres { database } = &endpoint.target else {
        return Err(AskDbError::invalid_input(format!(
            "Expected PostgreSQL target, got {}",
            endpoint.engine()
        )));
    };

    if endpoint.tcp.host.trim().is_empty() {
        return Err(AskDbError::invalid_input("PostgreSQL requires 'host' parameter"));
    }
    if database.trim().is_empty() {
        return Err(AskDbError::invalid_input("PostgreSQL requires 'database' parameter"));
    }

    let mut pg_config = Config::new();
    pg_config
        .host(&endpoint.tcp.host)
        .port(endpoint.tcp.port)
        .user(&endpoint.tcp.user)
        .password(&endpoint.tcp.password)
        .dbname(database)
        .connect_timeout(std::time::Duration::from_secs(10));

    Ok(pg_config)
}

/// Schemas holding at least one table the user may SELECT from
async fn list_schemas_postgres(client: &Client, user: &str) -> Result<Vec<String>> {
    debug!(user, "fetching database schemas");

    let query = "
        SELECT DISTINCT table_schema::text
        FROM information_schema.role_table_grants
        WHERE privilege_type = 'SELECT'
          AND grantee = $1
        ORDER BY 1";

    let rows = client.query(query, &[&user]).await.map_err(|e| {
        AskDbError::connectivity(format!("Failed to list schemas: {e}"))
    })?;

    let schemas: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
    if schemas.is_empty() {
        warn!(user, "no database schemas found for user");
    } else {
        debug!(user, count = schemas.len(), "schemas found");
    }

    Ok(schemas)
}

/// Tables in `schema` the user may SELECT from
async fn list_tables_postgres(client: &Client, user: &str, schema: &str) -> Result<Vec<String>> {
    let query = "
        SELECT DISTINCT table_name::text
        FROM information_schema.role_table_grants
        WHERE privilege_type = 'SELECT'
          AND grantee = $1
          AND table_schema = $2
        ORDER BY 1";

    let rows = client.query(query, &[&user, &schema]).await.map_err(|e| {
        AskDbError::connectivity(format!("Failed to list tables in schema '{schema}': {e}"))
    })?;

    let tables: Vec<String> = rows.iter().map(|row| row.get(0)).collect();
    if tables.is_empty() {
        warn!(user, schema, "no selectable tables found");
    }

    Ok(tables)
}

/// Column as reported by `pg_attribute`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    /// Output of `format_type`, e.g. `character varying(15)`
    pub data_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    pub comment: Option<String>,
}

/// One column of a foreign key constraint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForeignKeyDef {
    pub constraint: String,
    pub column: String,
    pub foreign_schema: String,
    pub foreign_table: String,
    pub foreign_column: String,
}

/// Everything needed to synthesize a `CREATE TABLE` statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinition {
    pub schema: String,
    pub table: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub comment: Option<String>,
}

impl TableDefinition {
    /// Render the definition as DDL text
    ///
    /// Column lines come first, then the primary key, then one constraint
    /// line per foreign key column. Table and column comments follow the
    /// statement as `COMMENT ON` statements.
    #[must_use]
    pub fn to_ddl(&self) -> String {
        let qualified = format!("{}.{}", self.schema, self.table);
        let mut lines: Vec<String> = Vec::with_capacity(self.columns.len() + 2);

        for column in &self.columns {
            let mut line = format!("    \"{}\" {}", column.name, column.data_type);
            if let Some(default) = &column.default {
                let _ = write!(line, " DEFAULT {default}");
            }
            if column.not_null {
                line.push_str(" NOT NULL");
            }
            lines.push(line);
        }

        if !self.primary_key.is_empty() {
            let quoted: Vec<String> = self.primary_key.iter().map(|c| format!("\"{c}\"")).collect();
            lines.push(format!("    PRIMARY KEY ({})", quoted.join(", ")));
        }

        for fk in &self.foreign_keys {
            lines.push(format!(
                "    CONSTRAINT \"{}\" FOREIGN KEY (\"{}\") REFERENCES {}.{}(\"{}\")",
                fk.constraint, fk.column, fk.foreign_schema, fk.foreign_table, fk.foreign_column
            ));
        }

        let mut ddl = format!("CREATE TABLE {qualified} (\n{}\n);\n", lines.join(",\n"));

        if let Some(comment) = self.comment.as_deref().filter(|c| !c.is_empty()) {
            let _ = write!(ddl, "\nCOMMENT ON TABLE {qualified} IS '{}';", escape_literal(comment));
        }

        for column in &self.columns {
            if let Some(comment) = column.comment.as_deref().filter(|c| !c.is_empty()) {
                let _ = write!(
                    ddl,
                    "\nCOMMENT ON COLUMN {qualified}.\"{}\" IS '{}';",
                    column.name,
                    escape_literal(comment)
                );
            }
        }

        ddl
    }
}

fn escape_literal(text: &str) -> String {
    text.replace('\'', "''")
}

/// Gather catalog metadata for one table
async fn fetch_table_definition(
    client: &Client,
    schema: &str,
    table: &str,
) -> Result<TableDefinition> {
    let qualified = format!("{schema}.{table}");
    let fail = |what: &str, e: tokio_postgres::Error| {
        AskDbError::introspection(&qualified, format!("Failed to query {what}: {e}"))
    };

    let column_query = "
        SELECT
            a.attname::text AS column_name,
            pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
            a.attnotnull AS not_null,
            pg_catalog.pg_get_expr(ad.adbin, ad.adrelid) AS default_value,
            d.description AS column_comment
        FROM pg_catalog.pg_attribute a
        JOIN pg_catalog.pg_class c ON a.attrelid = c.oid
        JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
        LEFT JOIN pg_catalog.pg_attrdef ad ON a.attrelid = ad.adrelid AND a.attnum = ad.adnum
        LEFT JOIN pg_catalog.pg_description d ON d.objoid = a.attrelid AND d.objsubid = a.attnum
        WHERE c.relname = $1
          AND n.nspname = $2
          AND a.attnum > 0
          AND NOT a.attisdropped
        ORDER BY a.attnum";

    let columns: Vec<ColumnDef> = client
        .query(column_query, &[&table, &schema])
        .await
        .map_err(|e| fail("columns", e))?
        .iter()
        .map(|row| ColumnDef {
            name: row.get(0),
            data_type: row.get(1),
            not_null: row.get(2),
            default: row.get(3),
            comment: row.get(4),
        })
        .collect();

    if columns.is_empty() {
        return Err(AskDbError::introspection(&qualified, "table not found or has no visible columns"));
    }

    let pk_query = "
        SELECT kcu.column_name::text
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON tc.constraint_name = kcu.constraint_name
          AND tc.constraint_schema = kcu.constraint_schema
        WHERE tc.constraint_type = 'PRIMARY KEY'
          AND tc.table_name = $1
          AND tc.table_schema = $2
        ORDER BY kcu.ordinal_position";

    let primary_key: Vec<String> = client
        .query(pk_query, &[&table, &schema])
        .await
        .map_err(|e| fail("primary key", e))?
        .iter()
        .map(|row| row.get(0))
        .collect();

    let fk_query = "
        SELECT
            tc.constraint_name::text,
            kcu.column_name::text,
            ccu.table_schema::text AS foreign_table_schema,
            ccu.table_name::text AS foreign_table,
            ccu.column_name::text AS foreign_column
        FROM information_schema.table_constraints tc
        JOIN information_schema.key_column_usage kcu
          ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema
        JOIN information_schema.constraint_column_usage ccu
          ON tc.constraint_name = ccu.constraint_name AND tc.table_schema = ccu.constraint_schema
        WHERE tc.constraint_type = 'FOREIGN KEY'
          AND tc.table_name = $1
          AND tc.table_schema = $2
        ORDER BY tc.constraint_name, kcu.ordinal_position";

    let foreign_keys: Vec<ForeignKeyDef> = client
        .query(fk_query, &[&table, &schema])
        .await
        .map_err(|e| fail("foreign keys", e))?
        .iter()
        .map(|row| ForeignKeyDef {
            constraint: row.get(0),
            column: row.get(1),
            foreign_schema: row.get(2),
            foreign_table: row.get(3),
            foreign_column: row.get(4),
        })
        .collect();

    let comment_query = "
        SELECT d.description
        FROM pg_catalog.pg_description d
        JOIN pg_catalog.pg_class c ON d.objoid = c.oid
        JOIN pg_catalog.pg_namespace n ON c.relnamespace = n.oid
        WHERE c.relname = $1
          AND n.nspname = $2
          AND d.objsubid = 0";

    let comment: Option<String> = client
        .query_opt(comment_query, &[&table, &schema])
        .await
        .map_err(|e| fail("table comment", e))?
        .and_then(|row| row.get(0));

    Ok(TableDefinition {
        schema: schema.to_string(),
        table: table.to_string(),
        columns,
        primary_key,
        foreign_keys,
        comment,
    })
}

/// Execute query and return `QueryResult`
async fn execute_query(client: &Client, query: &str) -> Result<QueryResult> {
    let stmt = client
        .prepare(query)
        .await
        .map_err(|e| AskDbError::query_failed(format!("Failed to prepare query: {e}")))?;

    if stmt.columns().is_empty() {
        let rows_affected = client
            .execute(&stmt, &[])
            .await
            .map_err(|e| AskDbError::query_failed(format!("Failed to execute query: {e}")))?;
        return Ok(QueryResult::affected(rows_affected));
    }

    let rows = client
        .query(&stmt, &[])
        .await
        .map_err(|e| AskDbError::query_failed(format!("Failed to execute query: {e}")))?;

    // Statement metadata carries aliases and exists even for empty results
    let columns: Vec<String> = stmt.columns().iter().map(|c| c.name().to_string()).collect();

    let mut rows_data = Vec::with_capacity(rows.len());
    for row in &rows {
        rows_data.push(row_to_json(row)?);
    }

    Ok(QueryResult { columns, rows: rows_data, rows_affected: None })
}

/// Convert a `PostgreSQL` row to JSON values in column order
fn row_to_json(row: &Row) -> Result<Vec<serde_json::Value>> {
    (0..row.len()).map(|idx| postgres_value_to_json(row, idx)).collect()
}

fn get_opt<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<Option<T>> {
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        AskDbError::query_failed(format!("Failed to read column {}: {e}", row.columns()[idx].name()))
    })
}

fn float_to_json(v: f64) -> serde_json::Value {
    // NaN/Infinity become null
    serde_json::Number::from_f64(v).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

/// Convert `PostgreSQL` value to JSON value
fn postgres_value_to_json(row: &Row, idx: usize) -> Result<serde_json::Value> {
    use serde_json::Value;

    let col_type = row.columns()[idx].type_().clone();

    let value = match col_type {
        Type::BOOL => get_opt::<bool>(row, idx)?.map(Value::Bool),
        Type::INT2 => get_opt::<i16>(row, idx)?.map(Value::from),
        Type::INT4 => get_opt::<i32>(row, idx)?.map(Value::from),
        Type::INT8 => get_opt::<i64>(row, idx)?.map(Value::from),
        Type::OID => get_opt::<u32>(row, idx)?.map(Value::from),
        Type::FLOAT4 => get_opt::<f32>(row, idx)?.map(|v| float_to_json(f64::from(v))),
        Type::FLOAT8 => get_opt::<f64>(row, idx)?.map(float_to_json),
        Type::NUMERIC => {
            get_opt::<rust_decimal::Decimal>(row, idx)?.map(|v| Value::String(v.to_string()))
        }
        Type::VARCHAR | Type::TEXT | Type::BPCHAR | Type::NAME => {
            get_opt::<String>(row, idx)?.map(Value::String)
        }
        Type::JSON | Type::JSONB => get_opt::<Value>(row, idx)?,
        Type::BYTEA => get_opt::<Vec<u8>>(row, idx)?.map(|v| {
            use base64::Engine;
            Value::String(base64::engine::general_purpose::STANDARD.encode(v))
        }),
        Type::TIMESTAMP => get_opt::<chrono::NaiveDateTime>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        Type::TIMESTAMPTZ => {
            get_opt::<chrono::DateTime<chrono::Utc>>(row, idx)?.map(|v| Value::String(v.to_rfc3339()))
        }
        Type::DATE => get_opt::<chrono::NaiveDate>(row, idx)?
            .map(|v| Value::String(v.format("%Y-%m-%d").to_string())),
        Type::TIME => get_opt::<chrono::NaiveTime>(row, idx)?
            .map(|v| Value::String(v.format("%H:%M:%S%.f").to_string())),
        Type::UUID => get_opt::<uuid::Uuid>(row, idx)?.map(|v| Value::String(v.to_string())),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            get_opt::<Vec<Option<String>>>(row, idx)?.map(|v| serde_json::json!(v))
        }
        Type::INT4_ARRAY => get_opt::<Vec<Option<i32>>>(row, idx)?.map(|v| serde_json::json!(v)),
        Type::INT8_ARRAY => get_opt::<Vec<Option<i64>>>(row, idx)?.map(|v| serde_json::json!(v)),
        ref other => match row.try_get::<_, Option<String>>(idx) {
            Ok(v) => v.map(Value::String),
            Err(_) => {
                warn!(pg_type = other.name(), "unsupported column type, returning null");
                None
            }
        },
    };

    Ok(value.unwrap_or(Value::Null))
}
