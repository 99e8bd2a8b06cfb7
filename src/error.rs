//! Error Handling Infrastructure
//!
//! This module defines all error types used throughout askdb.
//! All errors are structured and map to specific error codes for JSON output.
//!
//! # Error Categories
//! - `Connectivity`: TCP/SSH connection could not be opened
//! - `Introspection`: DDL fetch for a single table failed (skipped by batch callers)
//! - `QueryFailed`: SQL failure at execute time
//! - `NoSchemasFound`: Nothing selectable for the user on the server
//! - `ProfileNotFound`: Reconnect/delete target vanished
//! - `DuplicateProfile`: Display name already taken for the owner
//! - `InvalidInput`: Malformed input or missing required parameters
//! - `Store`: Profile store (SQLite) failure
//! - `Config`: Configuration file errors
//! - `EngineUnavailable`: Engine support not compiled in

use thiserror::Error;

/// Main error type for askdb operations
#[derive(Error, Debug)]
pub enum AskDbError {
    /// Cannot open a TCP or SSH connection
    #[error("Connection failed: {0}")]
    Connectivity(String),

    /// DDL for one table could not be fetched
    #[error("Introspection failed for {table}: {detail}")]
    Introspection { table: String, detail: String },

    /// Query execution failed
    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    /// No schema is accessible for the user
    #[error("No schemas found: {0}")]
    NoSchemasFound(String),

    /// Named profile does not exist for the owner
    #[error("Connection profile not found: {0}")]
    ProfileNotFound(String),

    /// (owner, display name) already exists
    #[error("Connection profile already exists: {0}")]
    DuplicateProfile(String),

    /// Invalid input or missing required parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Profile store failure
    #[error("Profile store error: {0}")]
    Store(String),

    /// Configuration error (unreadable file, invalid JSON, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Engine support not compiled into this build
    #[error("Engine not available in this build: {0}")]
    EngineUnavailable(String),
}

impl AskDbError {
    /// Convert error to error code string for JSON output
    ///
    /// Error codes are stable and suitable for programmatic handling.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Connectivity(_) => "CONNECTIVITY_ERROR",
            Self::Introspection { .. } => "INTROSPECTION_ERROR",
            Self::QueryFailed(_) => "QUERY_FAILED",
            Self::NoSchemasFound(_) => "NO_SCHEMAS_FOUND",
            Self::ProfileNotFound(_) => "PROFILE_NOT_FOUND",
            Self::DuplicateProfile(_) => "DUPLICATE_PROFILE",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Store(_) => "STORE_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::EngineUnavailable(_) => "ENGINE_UNAVAILABLE",
        }
    }

    /// Get human-readable error message (no credentials included)
    #[must_use]
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Whether the failure means the server could not be reached at all
    #[must_use]
    pub const fn is_connectivity(&self) -> bool {
        matches!(self, Self::Connectivity(_) | Self::EngineUnavailable(_))
    }

    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity(message.into())
    }

    pub fn introspection(table: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Introspection { table: table.into(), detail: detail.into() }
    }

    pub fn query_failed(message: impl Into<String>) -> Self {
        Self::QueryFailed(message.into())
    }

    pub fn no_schemas_found(message: impl Into<String>) -> Self {
        Self::NoSchemasFound(message.into())
    }

    pub fn profile_not_found(message: impl Into<String>) -> Self {
        Self::ProfileNotFound(message.into())
    }

    pub fn duplicate_profile(message: impl Into<String>) -> Self {
        Self::DuplicateProfile(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn store(message: impl Into<String>) -> Self {
        Self::Store(message.into())
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn engine_unavailable(engine: impl Into<String>) -> Self {
        Self::EngineUnavailable(engine.into())
    }
}

impl From<rusqlite::Error> for AskDbError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(err.to_string())
    }
}

/// Result type alias for askdb operations
pub type Result<T> = std::result::Result<T, AskDbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AskDbError::connectivity("x").error_code(), "CONNECTIVITY_ERROR");
        assert_eq!(AskDbError::introspection("t", "x").error_code(), "INTROSPECTION_ERROR");
        assert_eq!(AskDbError::query_failed("x").error_code(), "QUERY_FAILED");
        assert_eq!(AskDbError::no_schemas_found("x").error_code(), "NO_SCHEMAS_FOUND");
        assert_eq!(AskDbError::profile_not_found("x").error_code(), "PROFILE_NOT_FOUND");
        assert_eq!(AskDbError::duplicate_profile("x").error_code(), "DUPLICATE_PROFILE");
        assert_eq!(AskDbError::invalid_input("x").error_code(), "INVALID_INPUT");
        assert_eq!(AskDbError::store("x").error_code(), "STORE_ERROR");
        assert_eq!(AskDbError::config_error("x").error_code(), "CONFIG_ERROR");
        assert_eq!(AskDbError::engine_unavailable("mysql").error_code(), "ENGINE_UNAVAILABLE");
    }

    #[test]
    fn test_error_messages() {
        let err = AskDbError::introspection("public.orders", "permission denied");
        assert!(err.message().contains("public.orders"));
        assert!(err.message().contains("permission denied"));

        let err = AskDbError::query_failed("syntax error at or near \"SELEC\"");
        assert!(err.message().starts_with("Query execution failed"));
    }

    #[test]
    fn test_connectivity_classification() {
        assert!(AskDbError::connectivity("refused").is_connectivity());
        assert!(AskDbError::engine_unavailable("postgres").is_connectivity());
        assert!(!AskDbError::query_failed("bad sql").is_connectivity());
    }

    #[test]
    fn test_rusqlite_errors_map_to_store() {
        let err: AskDbError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, AskDbError::Store(_)));
    }
}
