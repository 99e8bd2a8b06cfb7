//! askdb CLI Entry Point
//!
//! Subcommands:
//! - `connect` - Interactive wizard: pick or create a connection, then a schema
//! - `profiles` - List saved connections
//! - `delete` - Delete a saved connection
//! - `schemas` - Schemas readable through a saved connection
//! - `metadata` - Compacted DDL of every table in a schema
//! - `query` - Run SQL (Markdown fences are stripped first)
//! - `context` - Bundle schema DDL and a question for an SQL-writing assistant
//!
//! All output to stdout is JSON-only. Logs and prompts go to stderr.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use askdb::output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
use askdb::profile::ProfileSummary;
use askdb::wizard::terminal::TerminalDialogue;
use askdb::{
    extract_sql, AbortReason, AppConfig, AskDbError, ConnectionProfile, ConnectionService,
    ConnectionWizard, MetadataCache, ProfileStore, SchemaContext, SqliteProfileStore,
    TunnelManager,
};

/// askdb - Ask questions of an unfamiliar database
#[derive(Parser)]
#[command(name = "askdb")]
#[command(about = "Discover, describe and query PostgreSQL and MySQL databases")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Choose or create a connection and a schema interactively
    Connect {
        #[arg(long)]
        owner: String,
        /// Conversation thread to name after the connection
        #[arg(long)]
        thread: Option<String>,
    },

    /// List saved connections
    Profiles {
        #[arg(long)]
        owner: String,
    },

    /// Delete a saved connection and the thread names referring to it
    Delete {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
    },

    /// List readable schemas
    Schemas {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
    },

    /// Print the DDL of every readable table in a schema
    Metadata {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        schema: String,
    },

    /// Execute SQL
    Query {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        sql: String,
    },

    /// Build the assistant context for a question
    Context {
        #[arg(long)]
        owner: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        schema: String,
        #[arg(long)]
        question: String,
    },
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "connect",
            Self::Profiles { .. } => "profiles",
            Self::Delete { .. } => "delete",
            Self::Schemas { .. } => "schemas",
            Self::Metadata { .. } => "metadata",
            Self::Query { .. } => "query",
            Self::Context { .. } => "context",
        }
    }
}

/// What a command produced, before wrapping in an envelope
struct Output {
    engine: String,
    data: serde_json::Value,
    rows: Option<usize>,
}

impl Output {
    fn new(engine: impl Into<String>, data: impl Serialize) -> Result<Self, Failure> {
        let data = serde_json::to_value(data)
            .map_err(|e| Failure::error("", AskDbError::invalid_input(e.to_string())))?;
        Ok(Self { engine: engine.into(), data, rows: None })
    }
}

enum Failure {
    Error { engine: String, error: AskDbError },
    Aborted(AbortReason),
}

impl Failure {
    fn error(engine: impl Into<String>, error: AskDbError) -> Self {
        Self::Error { engine: engine.into(), error }
    }
}

impl From<AskDbError> for Failure {
    fn from(error: AskDbError) -> Self {
        Self::error("", error)
    }
}

#[derive(Serialize)]
struct SessionData {
    profile: ProfileSummary,
    schema: String,
}

fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn emit(value: &impl Serialize) -> anyhow::Result<()> {
    let json = serde_json::to_string(value).context("could not serialize output")?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("could not write output")?;
    stdout.flush().context("could not flush output")?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();
    let command = cli.command.name();

    let config = match askdb::config::load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing("info");
            emit(&ErrorEnvelope::from_error("", command, &e))?;
            return Ok(ExitCode::FAILURE);
        }
    };
    init_tracing(&config.log_filter);

    let started = Instant::now();
    let result = run(cli.command, &config).await;
    let execution_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match result {
        Ok(output) => {
            let meta = output
                .rows
                .map_or_else(|| Metadata::new(execution_ms), |rows| Metadata::with_rows(execution_ms, rows));
            emit(&SuccessEnvelope::new(output.engine, command, output.data, meta))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(Failure::Error { engine, error }) => {
            emit(&ErrorEnvelope::from_error(engine, command, &error))?;
            Ok(ExitCode::FAILURE)
        }
        Err(Failure::Aborted(reason)) => {
            let info = ErrorInfo::new(reason.error_code(), format!("Connection setup stopped: {reason}"));
            emit(&ErrorEnvelope::new("", command, info))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

fn load_profile(store: &SqliteProfileStore, owner: &str, name: &str) -> Result<ConnectionProfile, Failure> {
    store
        .find_by_name(owner, name)?
        .ok_or_else(|| AskDbError::profile_not_found(format!("'{name}'")).into())
}

async fn run(command: Commands, config: &AppConfig) -> Result<Output, Failure> {
    let store = SqliteProfileStore::open(&config.store_path)?;
    let service = ConnectionService::native(
        Arc::new(MetadataCache::new(&config.cache)),
        TunnelManager::new(&config.tunnel),
    );

    match command {
        Commands::Connect { owner, thread } => {
            let dialogue = TerminalDialogue;
            let wizard = ConnectionWizard::new(&service, &store, &dialogue, &config.wizard);
            let session = wizard
                .resolve_connection_and_schema(&owner, thread.as_deref())
                .await
                .map_err(Failure::Aborted)?;
            let engine = session.profile.params.engine();
            Output::new(
                engine.as_str(),
                SessionData { profile: session.profile.summary(), schema: session.schema },
            )
        }

        Commands::Profiles { owner } => {
            let summaries: Vec<ProfileSummary> =
                store.list_by_owner(&owner)?.iter().map(ConnectionProfile::summary).collect();
            Output::new("", summaries)
        }

        Commands::Delete { owner, name } => {
            let deleted = store
                .delete_by_name(&owner, &name)?
                .ok_or_else(|| AskDbError::profile_not_found(format!("'{name}'")))?;
            Output::new(deleted.params.engine().as_str(), deleted.summary())
        }

        Commands::Schemas { owner, name } => {
            let profile = load_profile(&store, &owner, &name)?;
            let engine = profile.params.engine().as_str();
            let schemas = service
                .list_schemas(&profile.params)
                .await
                .map_err(|e| Failure::error(engine, e))?;
            if schemas.is_empty() {
                return Err(Failure::error(
                    engine,
                    AskDbError::no_schemas_found(format!("user '{}' cannot read any schema", profile.params.tcp.user)),
                ));
            }
            Output::new(engine, schemas)
        }

        Commands::Metadata { owner, name, schema } => {
            let profile = load_profile(&store, &owner, &name)?;
            let engine = profile.params.engine().as_str();
            let ddl = service
                .get_metadata(&profile.params, &schema)
                .await
                .map_err(|e| Failure::error(engine, e))?;
            Output::new(engine, ddl)
        }

        Commands::Query { owner, name, sql } => {
            let profile = load_profile(&store, &owner, &name)?;
            let engine = profile.params.engine().as_str();
            let sql = extract_sql(&sql);
            if sql.is_empty() {
                return Err(Failure::error(engine, AskDbError::invalid_input("No SQL statement found")));
            }
            let result = service
                .execute(&profile.params, &sql)
                .await
                .map_err(|e| Failure::error(engine, e))?;
            let rows = result.rows.len();
            let mut output = Output::new(engine, result)?;
            output.rows = Some(rows);
            Ok(output)
        }

        Commands::Context { owner, name, schema, question } => {
            let profile = load_profile(&store, &owner, &name)?;
            let engine = profile.params.engine();
            let ddl = service
                .get_metadata(&profile.params, &schema)
                .await
                .map_err(|e| Failure::error(engine.as_str(), e))?;
            Output::new(engine.as_str(), SchemaContext::new(ddl, question, engine, schema))
        }
    }
}
