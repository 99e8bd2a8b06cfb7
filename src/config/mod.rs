//! Configuration Management
//!
//! This module loads the application settings.
//!
//! # Configuration Location
//! - `<config_dir>/askdb/config.json` (per-user, e.g. `~/.config/askdb/config.json`)
//!
//! A missing file means "all defaults"; a file that exists but does not
//! parse is a configuration error. Every field is optional.
//!
//! # Environment Overrides
//! Applied after the file is read:
//! - `ASKDB_STORE_PATH`: SQLite file holding connection profiles
//! - `ASKDB_LOG`: tracing filter directive (e.g. `askdb=debug`)

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AskDbError, Result};

pub const STORE_PATH_ENV: &str = "ASKDB_STORE_PATH";
pub const LOG_FILTER_ENV: &str = "ASKDB_LOG";

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// SQLite file for the profile store
    pub store_path: PathBuf,

    pub cache: CacheConfig,

    pub wizard: WizardConfig,

    pub tunnel: TunnelConfig,

    /// Default tracing filter when `RUST_LOG` is unset
    pub log_filter: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            cache: CacheConfig::default(),
            wizard: WizardConfig::default(),
            tunnel: TunnelConfig::default(),
            log_filter: "info".to_string(),
        }
    }
}

/// Cache sizing and lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub metadata_ttl_secs: u64,
    pub metadata_capacity: usize,
    pub query_ttl_secs: u64,
    pub query_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            metadata_ttl_secs: 600,
            metadata_capacity: 256,
            query_ttl_secs: 10,
            query_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WizardConfig {
    /// How many times an unanswered prompt is re-issued before giving up
    pub max_prompt_attempts: u32,
}

impl Default for WizardConfig {
    fn default() -> Self {
        Self { max_prompt_attempts: 5 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    /// TCP connect timeout towards the SSH server
    pub connect_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self { connect_timeout_secs: 10 }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("askdb")
        .join("profiles.db")
}

/// Get path to the config file (`<config_dir>/askdb/config.json`)
pub fn config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| AskDbError::config_error("Could not determine user config directory"))?;

    Ok(config_dir.join("askdb").join("config.json"))
}

/// Load settings from a specific file
pub fn load_from(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        // File doesn't exist, use defaults
        return Ok(AppConfig::default());
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| AskDbError::config_error(format!("Could not read config file: {e}")))?;

    serde_json::from_str::<AppConfig>(&contents)
        .map_err(|e| AskDbError::config_error(format!("Invalid config file format: {e}")))
}

/// Apply environment overrides using `lookup` to read variables
pub fn apply_overrides(mut config: AppConfig, lookup: impl Fn(&str) -> Option<String>) -> AppConfig {
    if let Some(path) = lookup(STORE_PATH_ENV).filter(|p| !p.trim().is_empty()) {
        config.store_path = PathBuf::from(path);
    }
    if let Some(filter) = lookup(LOG_FILTER_ENV).filter(|f| !f.trim().is_empty()) {
        config.log_filter = filter;
    }
    config
}

/// Load settings from the default location plus the process environment
pub fn load() -> Result<AppConfig> {
    let config = load_from(&config_path()?)?;
    Ok(apply_overrides(config, |name| std::env::var(name).ok()))
}
