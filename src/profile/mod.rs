//! Connection Profiles
//!
//! A profile is a named, persisted way of reaching one database server for
//! one owner. Profiles are created after a successful connection test,
//! listed for reconnecting, and deleted explicitly; they are never updated
//! in place.
//!
//! # Storage
//! [`SqliteProfileStore`] keeps two tables:
//! - `connection_profiles`: one flat row per profile, `UNIQUE(owner, display_name)`
//! - `threads`: conversation thread names per owner
//!
//! Each method runs a single statement; no transaction spans calls. Deleting
//! a profile also removes the owner's thread records whose name contains the
//! profile's display name. That second statement is best-effort: if it fails
//! the profile stays deleted and the failure is logged.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::Fingerprint;
use crate::engine::{DatabaseTarget, DatabaseType, Endpoint, TcpTarget};
use crate::error::{AskDbError, Result};

/// How the database server is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Ssh,
}

impl Transport {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Ssh => "ssh",
        }
    }
}

/// SSH server used to forward traffic to the database host
#[derive(Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    /// WARNING: Sensitive data, do not log or include in error messages
    pub password: String,
}

impl SshTarget {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self { host: host.into(), port, user: user.into(), password: password.into() }
    }
}

impl std::fmt::Debug for SshTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Everything needed to reach a server, with or without a stored profile
///
/// `tcp` is the database server as seen from the SSH host when `ssh` is set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub target: DatabaseTarget,
    pub tcp: TcpTarget,
    pub ssh: Option<SshTarget>,
}

impl ConnectionParams {
    #[must_use]
    pub const fn new(target: DatabaseTarget, tcp: TcpTarget, ssh: Option<SshTarget>) -> Self {
        Self { target, tcp, ssh }
    }

    #[must_use]
    pub const fn transport(&self) -> Transport {
        if self.ssh.is_some() {
            Transport::Ssh
        } else {
            Transport::Tcp
        }
    }

    #[must_use]
    pub const fn engine(&self) -> DatabaseType {
        self.target.engine()
    }

    /// Cache identity, computed from the logical target plus the SSH hop
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        let fingerprint = Fingerprint::new(
            &self.tcp.host,
            self.tcp.port,
            &self.tcp.user,
            self.target.database().unwrap_or_default(),
        );
        match &self.ssh {
            Some(ssh) => fingerprint.via(&ssh.host, ssh.port),
            None => fingerprint,
        }
    }

    /// Endpoint used when no tunnel is involved
    #[must_use]
    pub fn direct_endpoint(&self) -> Endpoint {
        Endpoint::new(self.target.clone(), self.tcp.clone())
    }

    /// Reject parameter sets that can never connect
    pub fn validate(&self) -> Result<()> {
        if self.tcp.host.trim().is_empty() {
            return Err(AskDbError::invalid_input("Database host cannot be empty"));
        }
        if self.tcp.port == 0 {
            return Err(AskDbError::invalid_input("Database port must be between 1 and 65535"));
        }
        if self.tcp.user.trim().is_empty() {
            return Err(AskDbError::invalid_input("Database user cannot be empty"));
        }
        if let DatabaseTarget::Postgres { database } = &self.target {
            if database.trim().is_empty() {
                return Err(AskDbError::invalid_input("PostgreSQL requires a database name"));
            }
        }
        if let Some(ssh) = &self.ssh {
            if ssh.host.trim().is_empty() || ssh.user.trim().is_empty() {
                return Err(AskDbError::invalid_input("SSH host and user cannot be empty"));
            }
            if ssh.port == 0 {
                return Err(AskDbError::invalid_input("SSH port must be between 1 and 65535"));
            }
        }
        Ok(())
    }
}

/// A named, persisted connection owned by one identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionProfile {
    pub id: Uuid,
    pub owner: String,
    pub display_name: String,
    pub params: ConnectionParams,
    pub created_at: DateTime<Utc>,
}

impl ConnectionProfile {
    pub fn new(
        owner: impl Into<String>,
        display_name: impl Into<String>,
        params: ConnectionParams,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner: owner.into(),
            display_name: display_name.into(),
            params,
            created_at: Utc::now(),
        }
    }

    /// Credential-free view for listings
    #[must_use]
    pub fn summary(&self) -> ProfileSummary {
        ProfileSummary {
            id: self.id,
            display_name: self.display_name.clone(),
            transport: self.params.transport(),
            engine: self.params.engine(),
            host: self.params.tcp.host.clone(),
            port: self.params.tcp.port,
            database: self.params.target.database().map(str::to_string),
            user: self.params.tcp.user.clone(),
            ssh_host: self.params.ssh.as_ref().map(|s| s.host.clone()),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub id: Uuid,
    pub display_name: String,
    pub transport: Transport,
    pub engine: DatabaseType,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    pub user: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Persistence for profiles and thread names
///
/// Implementations must be safe to share between conversations.
pub trait ProfileStore: Send + Sync {
    /// Fails with `DuplicateProfile` if the owner already uses the name
    fn insert(&self, profile: &ConnectionProfile) -> Result<()>;

    /// Profiles of `owner`, oldest first
    fn list_by_owner(&self, owner: &str) -> Result<Vec<ConnectionProfile>>;

    fn find_by_name(&self, owner: &str, display_name: &str) -> Result<Option<ConnectionProfile>>;

    /// Delete and return the profile, `None` when it does not exist
    fn delete_by_name(&self, owner: &str, display_name: &str) -> Result<Option<ConnectionProfile>>;

    /// Create or rename a conversation thread
    fn record_thread_name(&self, owner: &str, thread_id: &str, name: &str) -> Result<()>;

    fn thread_name(&self, owner: &str, thread_id: &str) -> Result<Option<String>>;

    /// Thread names of `owner`, sorted
    fn thread_names(&self, owner: &str) -> Result<Vec<String>>;
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS connection_profiles (
    id           TEXT PRIMARY KEY,
    owner        TEXT NOT NULL,
    display_name TEXT NOT NULL,
    engine       TEXT NOT NULL,
    host         TEXT NOT NULL,
    port         INTEGER NOT NULL,
    database     TEXT,
    db_user      TEXT NOT NULL,
    db_password  TEXT NOT NULL,
    ssh_host     TEXT,
    ssh_port     INTEGER,
    ssh_user     TEXT,
    ssh_password TEXT,
    created_at   TEXT NOT NULL,
    UNIQUE (owner, display_name)
);
CREATE INDEX IF NOT EXISTS idx_connection_profiles_owner ON connection_profiles (owner);
CREATE TABLE IF NOT EXISTS threads (
    id    TEXT NOT NULL,
    owner TEXT NOT NULL,
    name  TEXT NOT NULL,
    PRIMARY KEY (owner, id)
);
";

const SELECT_PROFILE: &str = "
SELECT id, owner, display_name, engine, host, port, database, db_user, db_password,
       ssh_host, ssh_port, ssh_user, ssh_password, created_at
FROM connection_profiles";

/// `ProfileStore` backed by a SQLite file
pub struct SqliteProfileStore {
    conn: Mutex<Connection>,
}

impl SqliteProfileStore {
    /// Open (creating if needed) the store at `path`
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                AskDbError::store(format!("Could not create store directory: {e}"))
            })?;
        }
        let conn = Connection::open(path)?;
        debug!(path = %path.display(), "opened profile store");
        Self::with_connection(conn)
    }

    /// Store that lives only as long as the value
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

/// Raw column values before invariants are checked
struct ProfileRow {
    id: String,
    owner: String,
    display_name: String,
    engine: String,
    host: String,
    port: i64,
    database: Option<String>,
    user: String,
    password: String,
    ssh_host: Option<String>,
    ssh_port: Option<i64>,
    ssh_user: Option<String>,
    ssh_password: Option<String>,
    created_at: String,
}

impl ProfileRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            owner: row.get(1)?,
            display_name: row.get(2)?,
            engine: row.get(3)?,
            host: row.get(4)?,
            port: row.get(5)?,
            database: row.get(6)?,
            user: row.get(7)?,
            password: row.get(8)?,
            ssh_host: row.get(9)?,
            ssh_port: row.get(10)?,
            ssh_user: row.get(11)?,
            ssh_password: row.get(12)?,
            created_at: row.get(13)?,
        })
    }
}

fn stored_port(value: i64, what: &str) -> Result<u16> {
    u16::try_from(value).map_err(|_| AskDbError::store(format!("Stored {what} port {value} is out of range")))
}

impl TryFrom<ProfileRow> for ConnectionProfile {
    type Error = AskDbError;

    fn try_from(row: ProfileRow) -> Result<Self> {
        let corrupt = |detail: &str| {
            AskDbError::store(format!("Profile '{}' is corrupt: {detail}", row.display_name))
        };

        let engine = row.engine.parse::<DatabaseType>().map_err(|_| corrupt("unknown engine"))?;
        let target = match engine {
            DatabaseType::Postgres => DatabaseTarget::Postgres {
                database: row.database.clone().ok_or_else(|| corrupt("postgres without database"))?,
            },
            DatabaseType::MySQL => DatabaseTarget::MySql,
        };

        let ssh = match (&row.ssh_host, row.ssh_port, &row.ssh_user, &row.ssh_password) {
            (None, None, None, None) => None,
            (Some(host), Some(port), Some(user), Some(password)) => {
                Some(SshTarget::new(host, stored_port(port, "ssh")?, user, password))
            }
            _ => return Err(corrupt("partial ssh target")),
        };

        let id = Uuid::parse_str(&row.id).map_err(|e| corrupt(&format!("bad id: {e}")))?;
        let created_at = DateTime::parse_from_rfc3339(&row.created_at)
            .map_err(|e| corrupt(&format!("bad timestamp: {e}")))?
            .with_timezone(&Utc);
        let tcp = TcpTarget::new(&row.host, stored_port(row.port, "database")?, &row.user, &row.password);

        Ok(Self {
            id,
            owner: row.owner,
            display_name: row.display_name,
            params: ConnectionParams::new(target, tcp, ssh),
            created_at,
        })
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl ProfileStore for SqliteProfileStore {
    fn insert(&self, profile: &ConnectionProfile) -> Result<()> {
        let p = &profile.params;
        let ssh = p.ssh.as_ref();
        let conn = self.conn.lock();

        conn.execute(
            "INSERT INTO connection_profiles
                (id, owner, display_name, engine, host, port, database, db_user, db_password,
                 ssh_host, ssh_port, ssh_user, ssh_password, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                profile.id.to_string(),
                profile.owner,
                profile.display_name,
                p.engine().as_str(),
                p.tcp.host,
                p.tcp.port,
                p.target.database(),
                p.tcp.user,
                p.tcp.password,
                ssh.map(|s| s.host.as_str()),
                ssh.map(|s| s.port),
                ssh.map(|s| s.user.as_str()),
                ssh.map(|s| s.password.as_str()),
                profile.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                AskDbError::duplicate_profile(format!(
                    "'{}' already exists for this owner",
                    profile.display_name
                ))
            } else {
                e.into()
            }
        })?;

        info!(owner = %profile.owner, name = %profile.display_name, engine = %p.engine(), "connection profile saved");
        Ok(())
    }

    fn list_by_owner(&self, owner: &str) -> Result<Vec<ConnectionProfile>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare(&format!("{SELECT_PROFILE} WHERE owner = ?1 ORDER BY rowid"))?;
        let rows = stmt
            .query_map(params![owner], ProfileRow::read)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ConnectionProfile::try_from).collect()
    }

    fn find_by_name(&self, owner: &str, display_name: &str) -> Result<Option<ConnectionProfile>> {
        let conn = self.conn.lock();
        conn.query_row(
            &format!("{SELECT_PROFILE} WHERE owner = ?1 AND display_name = ?2"),
            params![owner, display_name],
            ProfileRow::read,
        )
        .optional()?
        .map(ConnectionProfile::try_from)
        .transpose()
    }

    fn delete_by_name(&self, owner: &str, display_name: &str) -> Result<Option<ConnectionProfile>> {
        let Some(profile) = self.find_by_name(owner, display_name)? else {
            debug!(owner, name = display_name, "profile to delete not found");
            return Ok(None);
        };

        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM connection_profiles WHERE owner = ?1 AND display_name = ?2",
            params![owner, display_name],
        )?;
        if deleted == 0 {
            // Removed concurrently between lookup and delete
            return Ok(None);
        }
        info!(owner, name = display_name, "connection profile deleted");

        match conn.execute(
            "DELETE FROM threads WHERE owner = ?1 AND instr(name, ?2) > 0",
            params![owner, display_name],
        ) {
            Ok(threads) => debug!(owner, threads, "removed thread names referencing profile"),
            Err(e) => warn!(owner, name = display_name, error = %e, "thread cleanup failed after profile delete"),
        }

        Ok(Some(profile))
    }

    fn record_thread_name(&self, owner: &str, thread_id: &str, name: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO threads (id, owner, name) VALUES (?1, ?2, ?3)
             ON CONFLICT (owner, id) DO UPDATE SET name = excluded.name",
            params![thread_id, owner, name],
        )?;
        Ok(())
    }

    fn thread_name(&self, owner: &str, thread_id: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .lock()
            .query_row(
                "SELECT name FROM threads WHERE owner = ?1 AND id = ?2",
                params![owner, thread_id],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn thread_names(&self, owner: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT name FROM threads WHERE owner = ?1 ORDER BY name")?;
        let names = stmt
            .query_map(params![owner], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }
}
