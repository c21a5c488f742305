//! HTTP relay to the timer core.
//!
//! Accepted observations and baselines are posted one by one to the core's
//! `POST /messages` endpoint with:
//!
//! - Connection pooling via reqwest
//! - Exponential backoff retry on connection errors and 5xx (±25% jitter)
//! - Bearer token authentication when configured
//!
//! When the retry budget is exhausted the core is considered gone: the relay
//! returns [`RelayError::HostUnavailable`] once and pauses itself. A paused
//! relay refuses every later send with [`RelayError::Paused`] instead of
//! silently queueing events the core will never see.
//!
//! # Example
//!
//! ```no_run
//! use kanbantime_detector::relay::{Relay, RelayConfig};
//! use kanbantime_detector::types::OutboundMessage;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = RelayConfig::new("http://127.0.0.1:7421".to_string(), None);
//!     let mut relay = Relay::new(config).unwrap();
//!
//!     let timers = relay.active_timers().await.unwrap();
//!     println!("{} timers running", timers.len());
//! }
//! ```

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::types::{ActiveTimer, OutboundMessage};

/// Jitter factor (±25%).
const JITTER_FACTOR: f64 = 0.25;

/// HTTP request timeout.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Errors that can occur while talking to the timer core.
#[derive(Error, Debug)]
pub enum RelayError {
    /// HTTP request failed for a reason that is not worth retrying.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The core rejected the message.
    #[error("core rejected message: {status} - {message}")]
    Rejected { status: u16, message: String },

    /// Authentication failed (401).
    #[error("authentication failed: check KANBANTIME_TOKEN")]
    AuthFailed,

    /// The core stayed unreachable for the whole retry budget.
    #[error("timer core unavailable after {attempts} attempts")]
    HostUnavailable { attempts: u32 },

    /// The relay paused after the core became unavailable.
    #[error("tracking paused, reload to resume")]
    Paused,

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Token contains characters not allowed in a header.
    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

/// Backoff schedule for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, including the first one.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Millisecond delays and few attempts, for tests against a mock core.
    #[must_use]
    pub fn fast_for_tests() -> Self {
        Self {
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            max_attempts: 3,
        }
    }
}

/// Configuration for the relay.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Core base URL (e.g., `http://127.0.0.1:7421`).
    pub server_url: String,

    /// Bearer token, if the core requires one.
    pub token: Option<String>,

    pub retry: RetryPolicy,
}

impl RelayConfig {
    #[must_use]
    pub fn new(server_url: String, token: Option<String>) -> Self {
        Self {
            server_url,
            token,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// HTTP client for the core's message endpoint.
pub struct Relay {
    config: RelayConfig,
    client: Client,
    current_retry_delay: Duration,
    paused: bool,
}

impl Relay {
    /// Creates a relay with a pooled HTTP client.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Http` if the HTTP client cannot be built.
    pub fn new(config: RelayConfig) -> Result<Self, RelayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .build()?;

        Ok(Self {
            current_retry_delay: config.retry.initial_delay,
            config,
            client,
            paused: false,
        })
    }

    /// Returns true once the core has been declared unavailable.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Sends one message and returns the core's JSON response.
    ///
    /// # Errors
    ///
    /// - `RelayError::Paused` if the relay paused earlier
    /// - `RelayError::HostUnavailable` when retries are exhausted; the relay
    ///   pauses itself
    /// - `RelayError::AuthFailed` / `RelayError::Rejected` for 4xx responses
    pub async fn send(&mut self, message: &OutboundMessage) -> Result<Value, RelayError> {
        if self.paused {
            return Err(RelayError::Paused);
        }

        let url = format!("{}/messages", self.config.server_url);
        let body = serde_json::to_string(message)?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &self.config.token {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
        }

        let mut attempts = 0;

        loop {
            attempts += 1;

            debug!(
                url = %url,
                kind = message.kind(),
                attempt = attempts,
                "Sending message"
            );

            let result = self
                .client
                .post(&url)
                .headers(headers.clone())
                .body(body.clone())
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();

                    match status {
                        _ if status.is_success() => {
                            self.reset_retry_delay();
                            return Ok(response.json::<Value>().await?);
                        }
                        StatusCode::UNAUTHORIZED => {
                            error!("Authentication with timer core failed");
                            return Err(RelayError::AuthFailed);
                        }
                        _ if status.is_server_error() => {
                            let message = response.text().await.unwrap_or_default();
                            warn!(
                                status = status.as_u16(),
                                message = %message,
                                "Core error, will retry"
                            );
                        }
                        _ => {
                            let message = response.text().await.unwrap_or_default();
                            return Err(RelayError::Rejected {
                                status: status.as_u16(),
                                message,
                            });
                        }
                    }
                }
                Err(e) if e.is_timeout() || e.is_connect() => {
                    warn!(error = %e, "Connection error, will retry");
                }
                Err(e) => return Err(RelayError::Http(e)),
            }

            if attempts >= self.config.retry.max_attempts {
                error!(attempts, "Timer core unavailable, pausing tracking");
                self.paused = true;
                self.reset_retry_delay();
                return Err(RelayError::HostUnavailable { attempts });
            }

            self.wait_with_backoff().await;
        }
    }

    /// Queries the timers currently running in the core.
    ///
    /// # Errors
    ///
    /// Same as [`Relay::send`], plus `RelayError::Json` if the response is
    /// not a timer list.
    pub async fn active_timers(&mut self) -> Result<Vec<ActiveTimer>, RelayError> {
        let value = self.send(&OutboundMessage::GetActiveTimers).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Waits for the current retry delay with jitter, then increases the delay.
    async fn wait_with_backoff(&mut self) {
        let delay = add_jitter(self.current_retry_delay);
        debug!(delay_ms = delay.as_millis(), "Waiting before retry");
        sleep(delay).await;
        self.increase_retry_delay();
    }

    /// Doubles the retry delay up to the maximum.
    fn increase_retry_delay(&mut self) {
        self.current_retry_delay = (self.current_retry_delay * 2).min(self.config.retry.max_delay);
    }

    fn reset_retry_delay(&mut self) {
        self.current_retry_delay = self.config.retry.initial_delay;
    }
}

/// Adds ±25% jitter to a duration.
fn add_jitter(duration: Duration) -> Duration {
    let jitter_range = duration.as_secs_f64() * JITTER_FACTOR;
    if jitter_range <= 0.0 {
        return duration;
    }
    let jitter = rand::rng().random_range(-jitter_range..=jitter_range);
    Duration::from_secs_f64((duration.as_secs_f64() + jitter).max(0.0))
}
