//! Database Engine Traits and Core Types
//!
//! This module defines the core abstractions for database engines.
//! Each engine (`PostgreSQL`, `MySQL`) implements the `DatabaseEngine` trait.
//!
//! # Stateless Design
//! All trait methods are stateless and take an `&Endpoint` as input.
//! Connections are opened, used, and closed within each method call.
//!
//! # Engine Isolation
//! Each engine implementation is completely independent.
//! No shared SQL helpers or cross-engine abstractions. Engine-specific
//! connection parameters (the Postgres database name) live in
//! [`DatabaseTarget`] instead of on the shared TCP target.
//!
//! [`EngineAdapter`] is the `&self` seam used by the service layer. The
//! production implementation, [`NativeAdapter`], dispatches on the engine
//! type to the compiled-in drivers.

use serde::{Deserialize, Serialize};
use std::future::Future;

use crate::error::{AskDbError, Result};

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

/// Supported database engine types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `PostgreSQL` database
    Postgres,
    /// `MySQL` database (includes `MariaDB`)
    MySQL,
}

impl DatabaseType {
    /// Get the engine name as a string
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySQL => "mysql",
        }
    }

    /// Human readable product name
    #[must_use]
    pub const fn display_name(&self) -> &'static str {
        match self {
            Self::Postgres => "PostgreSQL",
            Self::MySQL => "MySQL",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DatabaseType {
    type Err = AskDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySQL),
            other => Err(AskDbError::invalid_input(format!("Unsupported database type: {other}"))),
        }
    }
}

/// Engine selection plus the parameters only that engine understands
///
/// `PostgreSQL` distinguishes databases from schemas, so a database name is
/// mandatory there; `MySQL` treats schemas as databases and takes none.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum DatabaseTarget {
    Postgres { database: String },
    #[serde(rename = "mysql")]
    MySql,
}

impl DatabaseTarget {
    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        match self {
            Self::Postgres { .. } => DatabaseType::Postgres,
            Self::MySql => DatabaseType::MySQL,
        }
    }

    /// Database name, present only for `PostgreSQL`
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        match self {
            Self::Postgres { database } => Some(database),
            Self::MySql => None,
        }
    }
}

/// Host/port/credentials of a database server
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TcpTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// WARNING: Sensitive data, do not log or include in error messages
    pub password: String,
}

impl TcpTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), port, user: user.into(), password: password.into() }
    }
}

impl std::fmt::Debug for TcpTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// A reachable database endpoint
///
/// When the profile uses an SSH transport this is the tunnel-rewritten
/// target (`127.0.0.1:<assigned port>`), never the remote host.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub target: DatabaseTarget,
    pub tcp: TcpTarget,
}

impl Endpoint {
    #[must_use]
    pub const fn new(target: DatabaseTarget, tcp: TcpTarget) -> Self {
        Self { target, tcp }
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        self.target.engine()
    }
}

/// Query execution result
///
/// `columns` reflects aliases used in the query; every row has exactly
/// `columns.len()` values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names in result set
    pub columns: Vec<String>,

    /// Result rows, positionally aligned with `columns`
    pub rows: Vec<Vec<serde_json::Value>>,

    /// Number of rows affected (for INSERT/UPDATE/DELETE)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows_affected: Option<u64>,
}

impl QueryResult {
    #[must_use]
    pub const fn affected(rows_affected: u64) -> Self {
        Self { columns: Vec::new(), rows: Vec::new(), rows_affected: Some(rows_affected) }
    }
}

/// Database engine trait
///
/// All database engines implement this trait.
/// Each method is stateless and takes an endpoint as input.
pub trait DatabaseEngine {
    /// Open, verify and close a connection
    ///
    /// The connection is always closed before returning, on success and on
    /// failure. Failures are logged and reported as `false`.
    fn test_connection(endpoint: &Endpoint) -> impl Future<Output = bool> + Send;

    /// Schemas the endpoint user can read, ordered by name
    ///
    /// Returns an empty list (never an error) when grants yield nothing.
    fn list_accessible_schemas(
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Tables in `schema` the endpoint user can read
    fn list_tables(
        endpoint: &Endpoint,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// DDL text for a single table
    fn table_ddl(
        endpoint: &Endpoint,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    /// DDL for every readable table of `schema` over one connection
    ///
    /// A table whose DDL cannot be fetched is logged and skipped; the batch
    /// itself only fails when the connection or the table listing fails.
    fn schema_ddl(
        endpoint: &Endpoint,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Execute arbitrary SQL
    ///
    /// Driver failures come back as `AskDbError::QueryFailed`.
    fn execute(endpoint: &Endpoint, sql: &str) -> impl Future<Output = Result<QueryResult>> + Send;
}

/// Object-level capability set used by the service layer
///
/// Mirrors [`DatabaseEngine`] but dispatches at runtime on the endpoint's
/// engine type. Alternative implementations exist in tests to count
/// introspection calls.
pub trait EngineAdapter: Send + Sync {
    fn test_connection(&self, endpoint: &Endpoint) -> impl Future<Output = bool> + Send;

    fn list_accessible_schemas(
        &self,
        endpoint: &Endpoint,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn list_tables(
        &self,
        endpoint: &Endpoint,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn table_ddl(
        &self,
        endpoint: &Endpoint,
        schema: &str,
        table: &str,
    ) -> impl Future<Output = Result<String>> + Send;

    fn schema_ddl(
        &self,
        endpoint: &Endpoint,
        schema: &str,
    ) -> impl Future<Output = Result<Vec<String>>> + Send;

    fn execute(
        &self,
        endpoint: &Endpoint,
        sql: &str,
    ) -> impl Future<Output = Result<QueryResult>> + Send;
}

/// Adapter backed by the compiled-in native drivers
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeAdapter;

#[allow(unreachable_patterns)]
impl EngineAdapter for NativeAdapter {
    async fn test_connection(&self, endpoint: &Endpoint) -> bool {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => postgres::PostgresEngine::test_connection(endpoint).await,
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::test_connection(endpoint).await,
            other => {
                tracing::error!(engine = %other, "engine support not compiled in");
                false
            }
        }
    }

    async fn list_accessible_schemas(&self, endpoint: &Endpoint) -> Result<Vec<String>> {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                postgres::PostgresEngine::list_accessible_schemas(endpoint).await
            }
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::list_accessible_schemas(endpoint).await,
            other => Err(AskDbError::engine_unavailable(other.as_str())),
        }
    }

    async fn list_tables(&self, endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => postgres::PostgresEngine::list_tables(endpoint, schema).await,
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::list_tables(endpoint, schema).await,
            other => Err(AskDbError::engine_unavailable(other.as_str())),
        }
    }

    async fn table_ddl(&self, endpoint: &Endpoint, schema: &str, table: &str) -> Result<String> {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => {
                postgres::PostgresEngine::table_ddl(endpoint, schema, table).await
            }
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::table_ddl(endpoint, schema, table).await,
            other => Err(AskDbError::engine_unavailable(other.as_str())),
        }
    }

    async fn schema_ddl(&self, endpoint: &Endpoint, schema: &str) -> Result<Vec<String>> {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => postgres::PostgresEngine::schema_ddl(endpoint, schema).await,
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::schema_ddl(endpoint, schema).await,
            other => Err(AskDbError::engine_unavailable(other.as_str())),
        }
    }

    async fn execute(&self, endpoint: &Endpoint, sql: &str) -> Result<QueryResult> {
        match endpoint.engine() {
            #[cfg(feature = "postgres")]
            DatabaseType::Postgres => postgres::PostgresEngine::execute(endpoint, sql).await,
            #[cfg(feature = "mysql")]
            DatabaseType::MySQL => mysql::MySqlEngine::execute(endpoint, sql).await,
            other => Err(AskDbError::engine_unavailable(other.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_type_serialization() {
        assert_eq!(serde_json::to_string(&DatabaseType::Postgres).unwrap(), r#""postgres""#);
        assert_eq!(serde_json::to_string(&DatabaseType::MySQL).unwrap(), r#""mysql""#);
    }

    #[test]
    fn test_database_type_parsing() {
        assert_eq!("PostgreSQL".parse::<DatabaseType>().unwrap(), DatabaseType::Postgres);
        assert_eq!(" mysql ".parse::<DatabaseType>().unwrap(), DatabaseType::MySQL);
        assert!("oracle".parse::<DatabaseType>().is_err());
    }

    #[test]
    fn test_database_target_shapes() {
        let pg = DatabaseTarget::Postgres { database: "northwind".to_string() };
        assert_eq!(pg.engine(), DatabaseType::Postgres);
        assert_eq!(pg.database(), Some("northwind"));

        let my = DatabaseTarget::MySql;
        assert_eq!(my.engine(), DatabaseType::MySQL);
        assert_eq!(my.database(), None);

        assert_eq!(
            serde_json::to_value(&pg).unwrap(),
            serde_json::json!({"engine": "postgres", "database": "northwind"})
        );
        assert_eq!(serde_json::to_value(&my).unwrap(), serde_json::json!({"engine": "mysql"}));
    }

    #[test]
    fn test_tcp_target_debug_hides_password() {
        let tcp = TcpTarget::new("db.internal", 5432, "analyst", "hunter2");
        let rendered = format!("{tcp:?}");
        assert!(rendered.contains("db.internal"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_query_result_affected() {
        let result = QueryResult::affected(3);
        assert!(result.columns.is_empty());
        assert!(result.rows.is_empty());
        assert_eq!(result.rows_affected, Some(3));
    }
}
