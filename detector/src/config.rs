//! Configuration module for the kanbantime detector.
//!
//! This module handles parsing configuration from environment variables.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `KANBANTIME_SERVER_URL` | No | `http://127.0.0.1:7421` | Timer core URL |
//! | `KANBANTIME_TOKEN` | No | - | Bearer token expected by the timer core |
//! | `KANBANTIME_DEBOUNCE_MS` | No | 1500 | Deduplication window per task |
//! | `KANBANTIME_LEDGER_CAPACITY` | No | 2000 | Task keys kept in the status ledger |
//!
//! # Example
//!
//! ```no_run
//! use kanbantime_detector::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Server URL: {}", config.server_url);
//! ```

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use thiserror::Error;

use crate::dedup::DEFAULT_DEBOUNCE_MS;
use crate::detectors::DEFAULT_LEDGER_CAPACITY;

/// Default timer core address.
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:7421";

/// Upper bound for the debounce window.
const MAX_DEBOUNCE_MS: u64 = 60_000;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Configuration for the detector.
#[derive(Debug, Clone)]
pub struct Config {
    /// Timer core base URL, without trailing slash.
    pub server_url: String,

    /// Bearer token for the timer core, if it requires one.
    pub token: Option<String>,

    /// Deduplication window.
    pub debounce: Duration,

    /// Capacity of the last-known-status ledger.
    pub ledger_capacity: NonZeroUsize,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `KANBANTIME_SERVER_URL` is set but is not an http(s) URL
    /// - `KANBANTIME_DEBOUNCE_MS` is not an integer between 0 and 60000
    /// - `KANBANTIME_LEDGER_CAPACITY` is not a positive integer
    pub fn from_env() -> Result<Self, ConfigError> {
        let server_url = match env::var("KANBANTIME_SERVER_URL") {
            Ok(url) => {
                let url = url.trim().trim_end_matches('/').to_string();
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(ConfigError::InvalidValue {
                        key: "KANBANTIME_SERVER_URL".to_string(),
                        message: format!("expected http(s) URL, got '{url}'"),
                    });
                }
                url
            }
            Err(_) => DEFAULT_SERVER_URL.to_string(),
        };

        let token = env::var("KANBANTIME_TOKEN")
            .ok()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());

        let debounce_ms = match env::var("KANBANTIME_DEBOUNCE_MS") {
            Ok(val) => {
                let ms = val.trim().parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                    key: "KANBANTIME_DEBOUNCE_MS".to_string(),
                    message: format!("expected integer milliseconds, got '{val}'"),
                })?;
                if ms > MAX_DEBOUNCE_MS {
                    return Err(ConfigError::InvalidValue {
                        key: "KANBANTIME_DEBOUNCE_MS".to_string(),
                        message: format!("debounce window must be at most {MAX_DEBOUNCE_MS}ms, got {ms}"),
                    });
                }
                ms
            }
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };

        let ledger_capacity = match env::var("KANBANTIME_LEDGER_CAPACITY") {
            Ok(val) => val
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(NonZeroUsize::new)
                .ok_or_else(|| ConfigError::InvalidValue {
                    key: "KANBANTIME_LEDGER_CAPACITY".to_string(),
                    message: format!("expected positive integer, got '{val}'"),
                })?,
            Err(_) => NonZeroUsize::new(DEFAULT_LEDGER_CAPACITY).unwrap_or(NonZeroUsize::MIN),
        };

        Ok(Self {
            server_url,
            token,
            debounce: Duration::from_millis(debounce_ms),
            ledger_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const VARS: [&str; 4] = [
        "KANBANTIME_SERVER_URL",
        "KANBANTIME_TOKEN",
        "KANBANTIME_DEBOUNCE_MS",
        "KANBANTIME_LEDGER_CAPACITY",
    ];

    /// Runs `f` with all detector variables unset, restoring them afterwards.
    fn with_clean_env<F: FnOnce()>(f: F) {
        let saved: Vec<_> = VARS.iter().map(|k| (*k, env::var(k).ok())).collect();
        for key in VARS {
            env::remove_var(key);
        }
        f();
        for (key, value) in saved {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_unset() {
        with_clean_env(|| {
            let config = Config::from_env().unwrap();
            assert_eq!(config.server_url, DEFAULT_SERVER_URL);
            assert!(config.token.is_none());
            assert_eq!(config.debounce, Duration::from_millis(1500));
            assert_eq!(config.ledger_capacity.get(), 2000);
        });
    }

    #[test]
    #[serial]
    fn server_url_trailing_slash_is_trimmed() {
        with_clean_env(|| {
            env::set_var("KANBANTIME_SERVER_URL", "http://localhost:9000/");
            env::set_var("KANBANTIME_TOKEN", "  secret ");
            let config = Config::from_env().unwrap();
            assert_eq!(config.server_url, "http://localhost:9000");
            assert_eq!(config.token.as_deref(), Some("secret"));
        });
    }

    #[test]
    #[serial]
    fn non_http_server_url_is_rejected() {
        with_clean_env(|| {
            env::set_var("KANBANTIME_SERVER_URL", "localhost:9000");
            let err = Config::from_env().unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "KANBANTIME_SERVER_URL"));
        });
    }

    #[test]
    #[serial]
    fn invalid_numbers_are_rejected() {
        with_clean_env(|| {
            env::set_var("KANBANTIME_DEBOUNCE_MS", "soon");
            assert!(Config::from_env().is_err());

            env::set_var("KANBANTIME_DEBOUNCE_MS", "120000");
            assert!(Config::from_env().is_err());

            env::set_var("KANBANTIME_DEBOUNCE_MS", "800");
            env::set_var("KANBANTIME_LEDGER_CAPACITY", "0");
            let err = Config::from_env().unwrap_err();
            assert_eq!(
                err.to_string(),
                "invalid value for KANBANTIME_LEDGER_CAPACITY: expected positive integer, got '0'"
            );
        });
    }

    #[test]
    #[serial]
    fn custom_values_are_used() {
        with_clean_env(|| {
            env::set_var("KANBANTIME_DEBOUNCE_MS", "0");
            env::set_var("KANBANTIME_LEDGER_CAPACITY", "10");
            let config = Config::from_env().unwrap();
            assert_eq!(config.debounce, Duration::ZERO);
            assert_eq!(config.ledger_capacity.get(), 10);
        });
    }
}
