//! Introspection and query-result caches
//!
//! Two independent namespaces share one structure: a TTL check layered over
//! an LRU map behind a `parking_lot` mutex. Entries expire purely by age;
//! nothing invalidates them early. Concurrent misses on the same key may
//! both compute and both insert, last writer wins.
//!
//! Time is read from `tokio::time::Instant` so tests can drive expiry with
//! a paused clock.

use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::config::CacheConfig;
use crate::engine::QueryResult;

/// Stable identity of a database server connection
///
/// Built from the logical (pre-tunnel) parameters, so a reconnect with the
/// same host/port/user/root hits the same entries even though the tunnel
/// port changes on every operation. The SSH hop is part of the identity:
/// `localhost:5432` behind two bastions is two servers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// Postgres database name; empty for MySQL where schemas are the root
    pub root: String,
    /// SSH server host and port when reached through a tunnel
    pub ssh: Option<(String, u16)>,
}

impl Fingerprint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        root: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), port, user: user.into(), root: root.into(), ssh: None }
    }

    #[must_use]
    pub fn via(mut self, ssh_host: impl Into<String>, ssh_port: u16) -> Self {
        self.ssh = Some((ssh_host.into(), ssh_port));
        self
    }
}

/// Which introspection call produced a cached value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Schemas,
    Tables,
    TableDdl,
    SchemaDdl,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IntrospectionKey {
    pub fingerprint: Fingerprint,
    pub schema: String,
    pub kind: ObjectKind,
    /// Table name for `TableDdl`, empty otherwise
    pub name: String,
}

impl IntrospectionKey {
    pub fn new(
        fingerprint: &Fingerprint,
        schema: impl Into<String>,
        kind: ObjectKind,
        name: impl Into<String>,
    ) -> Self {
        Self { fingerprint: fingerprint.clone(), schema: schema.into(), kind, name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub sql: String,
    pub fingerprint: Fingerprint,
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

/// LRU map whose entries also expire after a fixed time-to-live
pub struct TtlCache<K: Hash + Eq, V> {
    ttl: Duration,
    entries: Mutex<LruCache<K, Entry<V>>>,
}

impl<K: Hash + Eq, V: Clone> TtlCache<K, V> {
    /// A capacity of zero is treated as one
    #[must_use]
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self { ttl, entries: Mutex::new(LruCache::new(capacity)) }
    }

    /// Fresh value for `key`, promoting it in LRU order
    ///
    /// An expired entry is removed on sight.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let fresh = entries.get(key).map(|entry| {
            (entry.stored_at.elapsed() < self.ttl).then(|| entry.value.clone())
        })?;
        if fresh.is_none() {
            entries.pop(key);
        }
        fresh
    }

    pub fn insert(&self, key: K, value: V) {
        self.entries.lock().put(key, Entry { value, stored_at: Instant::now() });
    }

    /// Entries currently held, expired ones included until touched
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Process-wide cache shared by every conversation
pub struct MetadataCache {
    introspection: TtlCache<IntrospectionKey, Vec<String>>,
    queries: TtlCache<QueryKey, QueryResult>,
}

impl MetadataCache {
    #[must_use]
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            introspection: TtlCache::new(
                Duration::from_secs(config.metadata_ttl_secs),
                config.metadata_capacity,
            ),
            queries: TtlCache::new(Duration::from_secs(config.query_ttl_secs), config.query_capacity),
        }
    }

    pub fn introspection(&self, key: &IntrospectionKey) -> Option<Vec<String>> {
        let hit = self.introspection.get(key);
        debug!(schema = %key.schema, kind = ?key.kind, hit = hit.is_some(), "introspection cache lookup");
        hit
    }

    pub fn store_introspection(&self, key: IntrospectionKey, value: Vec<String>) {
        self.introspection.insert(key, value);
    }

    pub fn query(&self, key: &QueryKey) -> Option<QueryResult> {
        let hit = self.queries.get(key);
        debug!(hit = hit.is_some(), "query cache lookup");
        hit
    }

    pub fn store_query(&self, key: QueryKey, value: QueryResult) {
        self.queries.insert(key, value);
    }

    /// Number of live introspection entries, for diagnostics
    pub fn introspection_len(&self) -> usize {
        self.introspection.len()
    }

    pub fn query_len(&self) -> usize {
        self.queries.len()
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}
