//! Connection service
//!
//! The process-wide entry point for everything that talks to a database
//! on behalf of a profile: it resolves the tunnel for the duration of one
//! call, consults the shared [`MetadataCache`], and delegates to the
//! [`EngineAdapter`].
//!
//! Caching rules:
//! - failures are never cached
//! - empty schema and table lists are never cached, so a grant added later
//!   shows up on the next call
//! - only row-returning query results are cached

use std::sync::Arc;
use tracing::{debug, warn};

use crate::cache::{IntrospectionKey, MetadataCache, ObjectKind, QueryKey};
use crate::engine::{EngineAdapter, NativeAdapter, QueryResult};
use crate::error::{AskDbError, Result};
use crate::profile::ConnectionParams;
use crate::tunnel::TunnelManager;

/// Shared handle used by every conversation
pub struct ConnectionService<A: EngineAdapter = NativeAdapter> {
    adapter: A,
    cache: Arc<MetadataCache>,
    tunnels: TunnelManager,
}

impl<A: EngineAdapter> ConnectionService<A> {
    pub const fn new(adapter: A, cache: Arc<MetadataCache>, tunnels: TunnelManager) -> Self {
        Self { adapter, cache, tunnels }
    }

    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Open-verify-close against the profile's server
    ///
    /// Tunnel failures count as a failed test.
    pub async fn test_connection(&self, params: &ConnectionParams) -> bool {
        match self.tunnels.resolve(params).await {
            Ok(resolved) => self.adapter.test_connection(&resolved.endpoint).await,
            Err(e) => {
                warn!(error = %e, "connection test failed before reaching the database");
                false
            }
        }
    }

    /// Schemas the profile's user can read
    pub async fn list_schemas(&self, params: &ConnectionParams) -> Result<Vec<String>> {
        let key = IntrospectionKey::new(&params.fingerprint(), "", ObjectKind::Schemas, "");
        if let Some(schemas) = self.cache.introspection(&key) {
            return Ok(schemas);
        }

        let resolved = self.tunnels.resolve(params).await?;
        let schemas = self.adapter.list_accessible_schemas(&resolved.endpoint).await?;
        drop(resolved);

        if schemas.is_empty() {
            warn!(user = %params.tcp.user, engine = %params.engine(), "no accessible schemas");
        } else {
            self.cache.store_introspection(key, schemas.clone());
        }
        Ok(schemas)
    }

    pub async fn list_tables(&self, params: &ConnectionParams, schema: &str) -> Result<Vec<String>> {
        let key = IntrospectionKey::new(&params.fingerprint(), schema, ObjectKind::Tables, "");
        if let Some(tables) = self.cache.introspection(&key) {
            return Ok(tables);
        }

        let resolved = self.tunnels.resolve(params).await?;
        let tables = self.adapter.list_tables(&resolved.endpoint, schema).await?;
        drop(resolved);

        if tables.is_empty() {
            warn!(schema, "no readable tables in schema");
        } else {
            self.cache.store_introspection(key, tables.clone());
        }
        Ok(tables)
    }

    /// DDL of one table, exactly as the engine produced it
    pub async fn table_ddl(
        &self,
        params: &ConnectionParams,
        schema: &str,
        table: &str,
    ) -> Result<String> {
        let key = IntrospectionKey::new(&params.fingerprint(), schema, ObjectKind::TableDdl, table);
        if let Some(ddl) = self.cache.introspection(&key).and_then(|v| v.into_iter().next()) {
            return Ok(ddl);
        }

        let resolved = self.tunnels.resolve(params).await?;
        let ddl = self.adapter.table_ddl(&resolved.endpoint, schema, table).await?;
        drop(resolved);

        self.cache.store_introspection(key, vec![ddl.clone()]);
        Ok(ddl)
    }

    /// Compacted DDL of every readable table in `schema`
    ///
    /// Tables whose DDL cannot be read are skipped by the engine.
    pub async fn get_metadata(&self, params: &ConnectionParams, schema: &str) -> Result<Vec<String>> {
        let key = IntrospectionKey::new(&params.fingerprint(), schema, ObjectKind::SchemaDdl, "");
        if let Some(ddls) = self.cache.introspection(&key) {
            return Ok(ddls);
        }

        let resolved = self.tunnels.resolve(params).await?;
        let ddls = self.adapter.schema_ddl(&resolved.endpoint, schema).await?;
        drop(resolved);

        let compacted: Vec<String> = ddls.iter().map(|ddl| compact_ddl(ddl)).collect();
        debug!(schema, tables = compacted.len(), "schema metadata loaded");
        if !compacted.is_empty() {
            self.cache.store_introspection(key, compacted.clone());
        }
        Ok(compacted)
    }

    /// Run generated SQL against the profile's server
    pub async fn execute(&self, params: &ConnectionParams, sql: &str) -> Result<QueryResult> {
        if sql.trim().is_empty() {
            return Err(AskDbError::invalid_input("Query cannot be empty"));
        }

        let key = QueryKey { sql: sql.to_string(), fingerprint: params.fingerprint() };
        if let Some(result) = self.cache.query(&key) {
            return Ok(result);
        }

        let resolved = self.tunnels.resolve(params).await?;
        let result = self.adapter.execute(&resolved.endpoint, sql).await?;
        drop(resolved);

        if !result.columns.is_empty() {
            self.cache.store_query(key, result.clone());
        }
        Ok(result)
    }
}

impl ConnectionService<NativeAdapter> {
    /// Service over the compiled-in drivers
    pub fn native(cache: Arc<MetadataCache>, tunnels: TunnelManager) -> Self {
        Self::new(NativeAdapter, cache, tunnels)
    }
}

/// Trim every line and drop blank ones to keep prompts small
#[must_use]
pub fn compact_ddl(ddl: &str) -> String {
    ddl.lines().map(str::trim).filter(|line| !line.is_empty()).collect::<Vec<_>>().join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_ddl() {
        let ddl = "CREATE TABLE s.t (\n    \"a\" integer NOT NULL,\n    \"b\" text\n);\n\nCOMMENT ON TABLE s.t IS 'x';";
        assert_eq!(
            compact_ddl(ddl),
            "CREATE TABLE s.t (\n\"a\" integer NOT NULL,\n\"b\" text\n);\nCOMMENT ON TABLE s.t IS 'x';"
        );
    }

    #[test]
    fn test_compact_ddl_is_idempotent() {
        let once = compact_ddl("  a  \n\n\t b\n");
        assert_eq!(compact_ddl(&once), once);
        assert_eq!(compact_ddl("   \n\n"), "");
    }
}
