//! Connection wizard
//!
//! Resolves "which database, which schema" for one conversation by talking
//! to the user through a [`Dialogue`]. The flow is an explicit state
//! machine:
//!
//! ```text
//! ChooseAction ─┬─ NewConnection ──────────────┐
//!               ├─ Reconnect ── (none saved) ──┤─> SelectSchema ─> ActiveSession
//!               │      └───────────────────────┘
//!               └─ DeleteConnection ─> ChooseAction
//! ```
//!
//! Every prompt is one request/response exchange. Unanswered prompts are
//! re-issued up to a configured number of attempts; an explicit cancel from
//! the user ends the run immediately. No connection or tunnel is held open
//! while waiting on the user.

pub mod terminal;

use std::future::Future;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::WizardConfig;
use crate::engine::{DatabaseTarget, EngineAdapter, TcpTarget};
use crate::error::AskDbError;
use crate::profile::{ConnectionParams, ConnectionProfile, ProfileStore, SshTarget, Transport};
use crate::service::ConnectionService;

/// Outcome of a single prompt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply<T> {
    Answer(T),
    /// The channel timed out or returned nothing; safe to ask again
    NoAnswer,
    /// The user asked to stop
    Cancelled,
}

/// Conversational channel used by the wizard
pub trait Dialogue: Send + Sync {
    fn ask_text(&self, prompt: &str) -> impl Future<Output = Reply<String>> + Send;

    /// Like `ask_text` but the answer should not be echoed
    fn ask_secret(&self, prompt: &str) -> impl Future<Output = Reply<String>> + Send {
        self.ask_text(prompt)
    }

    /// Pick one of `options`, answering with its index
    fn choose(&self, prompt: &str, options: &[String]) -> impl Future<Output = Reply<usize>> + Send;

    fn notify(&self, message: &str) -> impl Future<Output = ()> + Send;
}

/// Why the wizard stopped without a session
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortReason {
    #[error("cancelled by the user")]
    Cancelled,

    #[error("no answer received")]
    Unanswered,

    #[error("no accessible schemas found")]
    NoSchemasFound,

    #[error("profile store failure: {0}")]
    Store(String),
}

impl AbortReason {
    /// Error code used in JSON output
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Cancelled => "CANCELLED",
            Self::Unanswered => "UNANSWERED",
            Self::NoSchemasFound => "NO_SCHEMAS_FOUND",
            Self::Store(_) => "STORE_ERROR",
        }
    }
}

impl From<AskDbError> for AbortReason {
    fn from(err: AskDbError) -> Self {
        Self::Store(err.message())
    }
}

/// A resolved conversation target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSession {
    pub profile: ConnectionProfile,
    pub schema: String,
}

type Step<T> = std::result::Result<T, AbortReason>;

enum State {
    ChooseAction,
    NewConnection,
    Reconnect,
    DeleteConnection,
    SelectSchema(ConnectionProfile),
}

const ACTIONS: [&str; 3] = [
    "Connect to a new database",
    "Reconnect to a saved connection",
    "Delete a saved connection",
];

/// One wizard run for one owner
pub struct ConnectionWizard<'a, A, S, D>
where
    A: EngineAdapter,
    S: ProfileStore + ?Sized,
    D: Dialogue,
{
    service: &'a ConnectionService<A>,
    store: &'a S,
    dialogue: &'a D,
    max_attempts: u32,
}

impl<'a, A, S, D> ConnectionWizard<'a, A, S, D>
where
    A: EngineAdapter,
    S: ProfileStore + ?Sized,
    D: Dialogue,
{
    pub fn new(
        service: &'a ConnectionService<A>,
        store: &'a S,
        dialogue: &'a D,
        config: &WizardConfig,
    ) -> Self {
        Self { service, store, dialogue, max_attempts: config.max_prompt_attempts.max(1) }
    }

    /// Drive the dialogue until a profile and schema are chosen
    ///
    /// When `thread_id` is given the conversation thread is named after the
    /// profile, and after the schema once one is picked.
    pub async fn resolve_connection_and_schema(
        &self,
        owner: &str,
        thread_id: Option<&str>,
    ) -> Step<ActiveSession> {
        let mut state = State::ChooseAction;
        loop {
            state = match state {
                State::ChooseAction => self.choose_action().await?,
                State::NewConnection => State::SelectSchema(self.new_connection(owner).await?),
                State::Reconnect => self.reconnect(owner).await?,
                State::DeleteConnection => self.delete_connection(owner).await?,
                State::SelectSchema(profile) => {
                    return self.select_schema(profile, owner, thread_id).await;
                }
            };
        }
    }

    async fn choose_action(&self) -> Step<State> {
        let options: Vec<String> = ACTIONS.iter().map(|a| (*a).to_string()).collect();
        let state = match self.choose("What would you like to do?", &options).await? {
            0 => State::NewConnection,
            1 => State::Reconnect,
            _ => State::DeleteConnection,
        };
        Ok(state)
    }

    async fn new_connection(&self, owner: &str) -> Step<ConnectionProfile> {
        let transports = vec!["Direct TCP connection".to_string(), "Through an SSH tunnel".to_string()];
        let transport = if self.choose("How is the database reached?", &transports).await? == 0 {
            Transport::Tcp
        } else {
            Transport::Ssh
        };

        loop {
            let params = self.collect_params(transport).await?;
            let display_name = self.ask_required("Name for this connection").await?;

            if let Err(e) = params.validate() {
                self.dialogue.notify(&format!("{}. Please enter the details again.", e.message())).await;
                continue;
            }

            if !self.service.test_connection(&params).await {
                info!(owner, engine = %params.engine(), transport = transport.as_str(), "connection test failed, asking again");
                self.dialogue
                    .notify("Could not connect with these details. Please check them and try again.")
                    .await;
                continue;
            }

            return self.persist(owner, display_name, params).await;
        }
    }

    /// Save the tested profile, re-asking only the name on a collision
    async fn persist(
        &self,
        owner: &str,
        mut display_name: String,
        params: ConnectionParams,
    ) -> Step<ConnectionProfile> {
        loop {
            let profile = ConnectionProfile::new(owner, &display_name, params.clone());
            match self.store.insert(&profile) {
                Ok(()) => {
                    self.dialogue.notify(&format!("Connection '{display_name}' saved.")).await;
                    return Ok(profile);
                }
                Err(AskDbError::DuplicateProfile(_)) => {
                    self.dialogue
                        .notify(&format!("You already have a connection named '{display_name}'."))
                        .await;
                    display_name = self.ask_required("Choose another name for this connection").await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn collect_params(&self, transport: Transport) -> Step<ConnectionParams> {
        let ssh = match transport {
            Transport::Tcp => None,
            Transport::Ssh => Some(SshTarget::new(
                self.ask_required("SSH host").await?,
                self.ask_port("SSH port").await?,
                self.ask_required("SSH user").await?,
                self.ask_secret("SSH password").await?,
            )),
        };

        let host = self.ask_required("Database host").await?;
        let port = self.ask_port("Database port").await?;

        let engines = vec!["PostgreSQL".to_string(), "MySQL".to_string()];
        let target = if self.choose("Database engine", &engines).await? == 0 {
            DatabaseTarget::Postgres { database: self.ask_required("Database name").await? }
        } else {
            DatabaseTarget::MySql
        };

        let user = self.ask_required("Database user").await?;
        let password = self.ask_secret("Database password").await?;

        Ok(ConnectionParams::new(target, TcpTarget::new(host, port, user, password), ssh))
    }

    async fn reconnect(&self, owner: &str) -> Step<State> {
        let profiles = self.store.list_by_owner(owner)?;
        if profiles.is_empty() {
            self.dialogue
                .notify("You have no saved connections. Let's create a new one.")
                .await;
            return Ok(State::NewConnection);
        }

        let names: Vec<String> = profiles.iter().map(|p| p.display_name.clone()).collect();
        let index = self.choose("Which connection?", &names).await?;
        let profile = profiles[index].clone();

        if !self.service.test_connection(&profile.params).await {
            warn!(owner, name = %profile.display_name, "saved connection is unreachable");
            self.dialogue
                .notify(&format!("Could not reach '{}'. Please try again or create a new connection.", profile.display_name))
                .await;
            return Ok(State::ChooseAction);
        }

        Ok(State::SelectSchema(profile))
    }

    async fn delete_connection(&self, owner: &str) -> Step<State> {
        let profiles = self.store.list_by_owner(owner)?;
        if profiles.is_empty() {
            self.dialogue.notify("You have no saved connections.").await;
            return Ok(State::ChooseAction);
        }

        let names: Vec<String> = profiles.iter().map(|p| p.display_name.clone()).collect();
        let index = self.choose("Which connection should be deleted?", &names).await?;
        let name = &names[index];

        let message = match self.store.delete_by_name(owner, name)? {
            Some(_) => format!("Connection '{name}' deleted."),
            None => format!("Connection '{name}' no longer exists."),
        };
        self.dialogue.notify(&message).await;
        Ok(State::ChooseAction)
    }

    async fn select_schema(
        &self,
        profile: ConnectionProfile,
        owner: &str,
        thread_id: Option<&str>,
    ) -> Step<ActiveSession> {
        self.name_thread(owner, thread_id, &profile.display_name);

        let schemas = match self.service.list_schemas(&profile.params).await {
            Ok(schemas) => schemas,
            Err(e) => {
                warn!(owner, name = %profile.display_name, error = %e, "schema listing failed");
                self.dialogue.notify(&e.message()).await;
                Vec::new()
            }
        };

        if schemas.is_empty() {
            self.dialogue
                .notify("No accessible schemas were found for this connection.")
                .await;
            return Err(AbortReason::NoSchemasFound);
        }

        let index = self.choose("Which schema?", &schemas).await?;
        let schema = schemas[index].clone();

        self.name_thread(owner, thread_id, &format!("{} - {schema}", profile.display_name));
        self.dialogue
            .notify(&format!("Connected to '{}' using schema '{schema}'.", profile.display_name))
            .await;
        info!(owner, name = %profile.display_name, schema = %schema, "schema selected");

        Ok(ActiveSession { profile, schema })
    }

    /// Thread names are cosmetic; failures are logged only
    fn name_thread(&self, owner: &str, thread_id: Option<&str>, name: &str) {
        if let Some(thread_id) = thread_id {
            if let Err(e) = self.store.record_thread_name(owner, thread_id, name) {
                warn!(owner, thread_id, error = %e, "could not record thread name");
            }
        }
    }

    async fn ask_required(&self, prompt: &str) -> Step<String> {
        self.ask(prompt, false).await
    }

    async fn ask_secret(&self, prompt: &str) -> Step<String> {
        self.ask(prompt, true).await
    }

    /// Secrets are returned verbatim, empty included (passwordless logins);
    /// plain answers are trimmed and must be non-blank.
    async fn ask(&self, prompt: &str, secret: bool) -> Step<String> {
        for attempt in 1..=self.max_attempts {
            let reply = if secret {
                self.dialogue.ask_secret(prompt).await
            } else {
                self.dialogue.ask_text(prompt).await
            };

            match reply {
                Reply::Answer(text) if secret => return Ok(text),
                Reply::Answer(text) if !text.trim().is_empty() => {
                    return Ok(text.trim().to_string());
                }
                Reply::Answer(_) | Reply::NoAnswer => {
                    debug!(prompt, attempt, "prompt unanswered");
                }
                Reply::Cancelled => return Err(AbortReason::Cancelled),
            }
        }
        Err(AbortReason::Unanswered)
    }

    /// Port numbers that do not parse are re-asked and count as attempts
    async fn ask_port(&self, prompt: &str) -> Step<u16> {
        for attempt in 1..=self.max_attempts {
            match self.dialogue.ask_text(prompt).await {
                Reply::Answer(text) if !text.trim().is_empty() => match text.trim().parse::<u16>() {
                    Ok(port) if port > 0 => return Ok(port),
                    _ => {
                        self.dialogue.notify("Port must be a number between 1 and 65535.").await;
                    }
                },
                Reply::Answer(_) | Reply::NoAnswer => debug!(prompt, attempt, "prompt unanswered"),
                Reply::Cancelled => return Err(AbortReason::Cancelled),
            }
        }
        Err(AbortReason::Unanswered)
    }

    async fn choose(&self, prompt: &str, options: &[String]) -> Step<usize> {
        for attempt in 1..=self.max_attempts {
            match self.dialogue.choose(prompt, options).await {
                Reply::Answer(index) if index < options.len() => return Ok(index),
                Reply::Answer(index) => {
                    warn!(prompt, index, "choice out of range");
                }
                Reply::NoAnswer => debug!(prompt, attempt, "prompt unanswered"),
                Reply::Cancelled => return Err(AbortReason::Cancelled),
            }
        }
        Err(AbortReason::Unanswered)
    }
}
