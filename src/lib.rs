//! askdb - Conversational Database Connectivity
//!
//! askdb lets a user talk to an unfamiliar relational database: it finds
//! out which schemas and tables the user may read, produces their DDL as
//! context for an SQL-writing assistant, and runs the SQL that comes back.
//!
//! # Core Principles
//! - One contract over `PostgreSQL` and `MySQL` despite different catalogs
//! - Connections and SSH tunnels are opened per operation and always closed
//! - Introspection is cached by connection fingerprint with a bounded TTL
//! - Logs go to stderr; the CLI prints JSON only on stdout
//!
//! # Module Organization
//! - [`error`] - Error types and codes
//! - [`output`] - JSON output envelope types
//! - [`config`] - Settings file and environment overrides
//! - [`engine`] - Engine trait, shared types and the native drivers
//! - [`cache`] - TTL/LRU caches for introspection and query results
//! - [`tunnel`] - SSH local port forwarding
//! - [`profile`] - Connection profiles and their SQLite store
//! - [`service`] - Cached, tunnel-aware operations on a profile
//! - [`wizard`] - Interactive connection and schema selection
//! - [`context`] - Hand-off helpers for the SQL-writing assistant

pub mod cache;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod output;
pub mod profile;
pub mod service;
pub mod tunnel;
pub mod wizard;

pub use cache::{Fingerprint, MetadataCache};
pub use config::AppConfig;
pub use context::{extract_sql, SchemaContext};
pub use engine::{
    DatabaseEngine, DatabaseTarget, DatabaseType, EngineAdapter, Endpoint, NativeAdapter,
    QueryResult, TcpTarget,
};
pub use error::{AskDbError, Result};
pub use output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
pub use profile::{
    ConnectionParams, ConnectionProfile, ProfileStore, SqliteProfileStore, SshTarget, Transport,
};
pub use service::ConnectionService;
pub use tunnel::TunnelManager;
pub use wizard::{AbortReason, ActiveSession, ConnectionWizard, Dialogue, Reply};
