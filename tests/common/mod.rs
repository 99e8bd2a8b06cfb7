//! Shared fakes for integration tests
//!
//! - `FakeAdapter`: an `EngineAdapter` with scripted answers and call counters
//! - `ScriptedDialogue`: a `Dialogue` that replays a fixed list of replies

#![allow(dead_code)]

use askdb::config::{CacheConfig, TunnelConfig};
use askdb::engine::{EngineAdapter, Endpoint, QueryResult};
use askdb::profile::{ConnectionParams, SshTarget};
use askdb::wizard::{Dialogue, Reply};
use askdb::{AskDbError, ConnectionService, DatabaseTarget, MetadataCache, Result, TcpTarget, TunnelManager};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Engine fake
// ============================================================================

#[derive(Default)]
pub struct Calls {
    pub test_connection: AtomicUsize,
    pub list_schemas: AtomicUsize,
    pub list_tables: AtomicUsize,
    pub table_ddl: AtomicUsize,
    pub schema_ddl: AtomicUsize,
    pub execute: AtomicUsize,
}

impl Calls {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

pub struct FakeAdapter {
    pub schemas: Mutex<Vec<String>>,
    pub tables: Vec<String>,
    pub ddl: Vec<String>,
    /// Results handed out by `test_connection` in order; `true` once exhausted
    pub connection_results: Mutex<VecDeque<bool>>,
    /// When set, every introspection and query call fails
    pub fail: Mutex<bool>,
    pub calls: Calls,
}

impl Default for FakeAdapter {
    fn default() -> Self {
        Self {
            schemas: Mutex::new(vec!["public".to_string(), "sales".to_string()]),
            tables: vec!["customers".to_string(), "orders".to_string()],
            ddl: vec![
                "CREATE TABLE public.customers (\n    \"id\" integer NOT NULL,\n\n    PRIMARY KEY (\"id\")\n);\n"
                    .to_string(),
                "CREATE TABLE public.orders (\n    \"id\" integer NOT NULL\n);\n".to_string(),
            ],
            connection_results: Mutex::new(VecDeque::new()),
            fail: Mutex::new(false),
            calls: Calls::default(),
        }
    }
}

impl FakeAdapter {
    pub fn with_connection_results(results: &[bool]) -> Self {
        let adapter = Self::default();
        *adapter.connection_results.lock() = results.iter().copied().collect();
        adapter
    }

    pub fn with_schemas(schemas: &[&str]) -> Self {
        let adapter = Self::default();
        *adapter.schemas.lock() = schemas.iter().map(|s| (*s).to_string()).collect();
        adapter
    }

    fn check(&self) -> Result<()> {
        if *self.fail.lock() {
            Err(AskDbError::connectivity("connection refused"))
        } else {
            Ok(())
        }
    }
}

impl EngineAdapter for FakeAdapter {
    async fn test_connection(&self, _endpoint: &Endpoint) -> bool {
        self.calls.test_connection.fetch_add(1, Ordering::SeqCst);
        self.connection_results.lock().pop_front().unwrap_or(true)
    }

    async fn list_accessible_schemas(&self, _endpoint: &Endpoint) -> Result<Vec<String>> {
        self.calls.list_schemas.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.schemas.lock().clone())
    }

    async fn list_tables(&self, _endpoint: &Endpoint, _schema: &str) -> Result<Vec<String>> {
        self.calls.list_tables.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.tables.clone())
    }

    async fn table_ddl(&self, _endpoint: &Endpoint, _schema: &str, table: &str) -> Result<String> {
        self.calls.table_ddl.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.ddl
            .iter()
            .find(|ddl| ddl.contains(&format!(".{table} (")))
            .cloned()
            .ok_or_else(|| AskDbError::introspection(table, "no such table"))
    }

    async fn schema_ddl(&self, _endpoint: &Endpoint, _schema: &str) -> Result<Vec<String>> {
        self.calls.schema_ddl.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.ddl.clone())
    }

    async fn execute(&self, _endpoint: &Endpoint, sql: &str) -> Result<QueryResult> {
        self.calls.execute.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            Ok(QueryResult {
                columns: vec!["n".to_string()],
                rows: vec![vec![serde_json::json!(1)]],
                rows_affected: None,
            })
        } else {
            Ok(QueryResult::affected(1))
        }
    }
}

pub fn service(adapter: FakeAdapter) -> ConnectionService<FakeAdapter> {
    ConnectionService::new(
        adapter,
        Arc::new(MetadataCache::new(&CacheConfig::default())),
        TunnelManager::new(&TunnelConfig { connect_timeout_secs: 2 }),
    )
}

pub fn pg_params() -> ConnectionParams {
    ConnectionParams::new(
        DatabaseTarget::Postgres { database: "northwind".to_string() },
        TcpTarget::new("db.internal", 5432, "analyst", "s3cret"),
        None,
    )
}

pub fn mysql_params() -> ConnectionParams {
    ConnectionParams::new(DatabaseTarget::MySql, TcpTarget::new("10.0.0.5", 3306, "root", "pw"), None)
}

/// SSH profile whose SSH server refuses connections
pub fn unreachable_ssh_params() -> ConnectionParams {
    ConnectionParams::new(
        DatabaseTarget::MySql,
        TcpTarget::new("10.0.0.5", 3306, "root", "pw"),
        Some(SshTarget::new("127.0.0.1", 1, "ops", "tunnelpw")),
    )
}

// ============================================================================
// Dialogue fake
// ============================================================================

#[derive(Debug, Clone)]
pub enum Scripted {
    Text(Reply<String>),
    Choice(Reply<usize>),
}

pub fn text(answer: &str) -> Scripted {
    Scripted::Text(Reply::Answer(answer.to_string()))
}

pub fn choice(index: usize) -> Scripted {
    Scripted::Choice(Reply::Answer(index))
}

pub fn no_text() -> Scripted {
    Scripted::Text(Reply::NoAnswer)
}

pub fn no_choice() -> Scripted {
    Scripted::Choice(Reply::NoAnswer)
}

pub fn cancel_choice() -> Scripted {
    Scripted::Choice(Reply::Cancelled)
}

/// Answers for a direct Postgres connection, in prompt order
pub fn postgres_answers(host: &str, name: &str) -> Vec<Scripted> {
    vec![
        text(host),
        text("5432"),
        choice(0),
        text("northwind"),
        text("analyst"),
        text("s3cret"),
        text(name),
    ]
}

#[derive(Default)]
pub struct ScriptedDialogue {
    script: Mutex<VecDeque<Scripted>>,
    pub prompts: Mutex<Vec<String>>,
    pub notes: Mutex<Vec<String>>,
}

impl ScriptedDialogue {
    pub fn new(script: Vec<Scripted>) -> Self {
        Self { script: Mutex::new(script.into()), ..Self::default() }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().len()
    }

    pub fn notes_containing(&self, needle: &str) -> usize {
        self.notes.lock().iter().filter(|n| n.contains(needle)).count()
    }

    fn next(&self, prompt: &str) -> Option<Scripted> {
        self.prompts.lock().push(prompt.to_string());
        self.script.lock().pop_front()
    }
}

impl Dialogue for ScriptedDialogue {
    async fn ask_text(&self, prompt: &str) -> Reply<String> {
        match self.next(prompt) {
            Some(Scripted::Text(reply)) => reply,
            Some(other) => panic!("prompt '{prompt}' expected text, script had {other:?}"),
            None => Reply::Cancelled,
        }
    }

    async fn choose(&self, prompt: &str, options: &[String]) -> Reply<usize> {
        assert!(!options.is_empty(), "prompt '{prompt}' offered no options");
        match self.next(prompt) {
            Some(Scripted::Choice(reply)) => reply,
            Some(other) => panic!("prompt '{prompt}' expected a choice, script had {other:?}"),
            None => Reply::Cancelled,
        }
    }

    async fn notify(&self, message: &str) {
        self.notes.lock().push(message.to_string());
    }
}
