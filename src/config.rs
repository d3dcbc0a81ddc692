// ABOUTME: Connection options for opening SQLite databases
// ABOUTME: Parses TOML option files into ConnectOptions

use crate::database::IsolationLevel;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::time::Duration;

/// Environment variable naming a TOML file of connect options for the CLI
pub const CONFIG_ENV_VAR: &str = "SQLITE_DB_TRANSFER_CONFIG";

/// Default time to wait on a locked database before failing
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings applied to every connection a handle opens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub busy_timeout: Duration,
    /// Initial isolation setting of the handle; `None` means autocommit
    pub isolation_level: Option<IsolationLevel>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            isolation_level: Some(IsolationLevel::Deferred),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ConnectConfig {
    #[serde(default)]
    busy_timeout_ms: Option<u64>,
    #[serde(default)]
    isolation_level: Option<String>,
}

impl ConnectOptions {
    /// Parse options from TOML text
    ///
    /// Missing keys keep their defaults. `isolation_level = "none"` selects
    /// autocommit.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let parsed: ConnectConfig =
            toml::from_str(raw).context("Failed to parse connect options TOML")?;

        let mut options = ConnectOptions::default();
        if let Some(ms) = parsed.busy_timeout_ms {
            options.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = parsed.isolation_level {
            options.isolation_level = if level.trim().eq_ignore_ascii_case("none") {
                None
            } else {
                Some(level.parse()?)
            };
        }

        Ok(options)
    }
}

/// Load options from `path`, or use the defaults when no file is given
pub fn load_connect_options(path: Option<&str>) -> Result<ConnectOptions> {
    match path {
        Some(path) => {
            tracing::debug!("Loading connect options from {}", path);
            load_connect_options_from_file(path)
        }
        None => Ok(ConnectOptions::default()),
    }
}

pub fn load_connect_options_from_file(path: &str) -> Result<ConnectOptions> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path))?;
    ConnectOptions::from_toml_str(&raw)
        .with_context(|| format!("Invalid connect options in {}", path))
}
