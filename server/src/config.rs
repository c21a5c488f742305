//! Server configuration module.
//!
//! Parses configuration from environment variables for the kanbantime timer core.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `KANBANTIME_TOKEN` | Yes* | - | Bearer token for `/messages` and `/ws` |
//! | `KANBANTIME_PORT` | No | 7421 | HTTP port, bound on 127.0.0.1 |
//! | `KANBANTIME_DATA_DIR` | No | platform data dir | Directory holding `state.json` |
//! | `KANBANTIME_SYNC_INTERVAL_SECS` | No | 300 | Periodic sync and stale sweep |
//! | `KANBANTIME_UNSAFE_NO_AUTH` | No | false | Disable authentication (dev only) |
//!
//! *Not required if `KANBANTIME_UNSAFE_NO_AUTH=true`

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use directories::BaseDirs;
use thiserror::Error;
use tracing::warn;

/// Default HTTP server port.
const DEFAULT_PORT: u16 = 7421;

/// Default interval between periodic syncs.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;

/// Errors that can occur when parsing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

impl ConfigError {
    fn invalid(key: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Server configuration parsed from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub port: u16,

    /// Directory holding the state file.
    pub data_dir: PathBuf,

    /// Bearer token expected from clients.
    pub token: Option<String>,

    /// When true, disables authentication (development only).
    pub unsafe_no_auth: bool,

    /// Interval of the periodic sync.
    pub sync_interval: Duration,
}

impl Config {
    /// Parse configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - `KANBANTIME_TOKEN` is missing and `KANBANTIME_UNSAFE_NO_AUTH` is not true
    /// - a numeric variable does not parse or is zero where that makes no sense
    /// - no data directory is configured and the platform has none
    ///
    /// # Example
    ///
    /// ```no_run
    /// use kanbantime_server::config::Config;
    ///
    /// let config = Config::from_env().expect("Failed to load config");
    /// println!("Server will listen on port {}", config.port);
    /// ```
    pub fn from_env() -> Result<Self, ConfigError> {
        let unsafe_no_auth = parse_bool_env("KANBANTIME_UNSAFE_NO_AUTH");
        let port = parse_port()?;
        let data_dir = parse_data_dir()?;
        let token = env::var("KANBANTIME_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let sync_interval = parse_sync_interval()?;

        let config = Self {
            port,
            data_dir,
            token,
            unsafe_no_auth,
            sync_interval,
        };

        config.validate()?;

        if config.unsafe_no_auth {
            warn!(
                "KANBANTIME_UNSAFE_NO_AUTH is enabled - authentication is disabled. \
                 Any local process can drive the timers!"
            );
        }

        Ok(config)
    }

    /// Ensures a token is configured unless authentication is disabled.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.unsafe_no_auth {
            return Ok(());
        }

        if self.token.is_none() {
            return Err(ConfigError::MissingEnvVar("KANBANTIME_TOKEN".to_string()));
        }

        Ok(())
    }
}

/// Returns `true` if the variable is set to "true" (case-insensitive).
fn parse_bool_env(name: &str) -> bool {
    env::var(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_port() -> Result<u16, ConfigError> {
    match env::var("KANBANTIME_PORT") {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid("KANBANTIME_PORT", format!("{e}"))),
        Err(env::VarError::NotPresent) => Ok(DEFAULT_PORT),
        Err(env::VarError::NotUnicode(_)) => Err(ConfigError::invalid("KANBANTIME_PORT", "contains invalid unicode")),
    }
}

/// `KANBANTIME_DATA_DIR`, else `<platform data dir>/kanbantime`.
fn parse_data_dir() -> Result<PathBuf, ConfigError> {
    match env::var("KANBANTIME_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir.trim())),
        _ => BaseDirs::new()
            .map(|dirs| dirs.data_dir().join("kanbantime"))
            .ok_or_else(|| ConfigError::MissingEnvVar("KANBANTIME_DATA_DIR".to_string())),
    }
}

fn parse_sync_interval() -> Result<Duration, ConfigError> {
    let secs = match env::var("KANBANTIME_SYNC_INTERVAL_SECS") {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map_err(|e| ConfigError::invalid("KANBANTIME_SYNC_INTERVAL_SECS", format!("{e}")))?,
        Err(_) => DEFAULT_SYNC_INTERVAL_SECS,
    };
    if secs == 0 {
        return Err(ConfigError::invalid(
            "KANBANTIME_SYNC_INTERVAL_SECS",
            "must be at least 1 second",
        ));
    }
    Ok(Duration::from_secs(secs))
}
