//! Error types for the kanbantime timer core.
//!
//! [`ServerError`] is the top-level error of the crate. Route handlers return
//! it directly; its [`IntoResponse`] impl maps each category to a status
//! code and a JSON body `{ "error": ..., "code": ... }`.
//!
//! | Variant | Status |
//! |---------|--------|
//! | `Config` | 500 |
//! | `Auth` | 401 |
//! | `Validation` | 400 |
//! | `Storage` | 500 |
//! | `WebSocket` | 500 |
//! | `Internal` | 500 |

use std::error::Error;
use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::auth::AuthError;
use crate::config::ConfigError;
use crate::persistence::KvError;

/// Top-level error type for the timer core.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration error during startup.
    Config(ConfigError),

    /// Missing or wrong client token.
    Auth(AuthError),

    /// Malformed or unknown message.
    Validation(String),

    /// Durable storage failure.
    Storage(KvError),

    /// WebSocket connection or protocol error.
    WebSocket(String),

    /// Unexpected internal server error.
    Internal(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(err) => write!(f, "configuration error: {err}"),
            Self::Auth(err) => write!(f, "authentication failed: {err}"),
            Self::Validation(msg) => write!(f, "validation error: {msg}"),
            Self::Storage(err) => write!(f, "storage error: {err}"),
            Self::WebSocket(msg) => write!(f, "websocket error: {msg}"),
            Self::Internal(msg) => write!(f, "internal server error: {msg}"),
        }
    }
}

impl Error for ServerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Auth(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ConfigError> for ServerError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<AuthError> for ServerError {
    fn from(err: AuthError) -> Self {
        Self::Auth(err)
    }
}

impl From<KvError> for ServerError {
    fn from(err: KvError) -> Self {
        Self::Storage(err)
    }
}

impl ServerError {
    /// Creates a new validation error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use kanbantime_server::error::ServerError;
    ///
    /// let err = ServerError::validation("unknown message type");
    /// assert!(err.is_client_error());
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn websocket(message: impl Into<String>) -> Self {
        Self::WebSocket(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns `true` if the caller sent something wrong.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Auth(_) | Self::Validation(_))
    }

    /// Returns `true` if the failure is on the server side.
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        !self.is_client_error()
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Auth(_) => StatusCode::UNAUTHORIZED,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code for the response body.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Auth(err) => err.code(),
            Self::Validation(_) => "invalid_message",
            Self::Storage(_) => "storage_error",
            Self::WebSocket(_) => "websocket_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

/// Result type alias for timer core operations.
pub type Result<T> = std::result::Result<T, ServerError>;

// ============================================================================
// HTTP mapping
// ============================================================================

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
        }
    }

    #[must_use]
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Server-side details stay in the log.
        let message = if self.is_server_error() {
            error!(error = %self, "Request failed");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        (status, Json(ErrorResponse::new(message).with_code(self.code()))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            ServerError::validation("missing field `type`").to_string(),
            "validation error: missing field `type`"
        );
        assert_eq!(
            ServerError::from(AuthError::InvalidToken).to_string(),
            "authentication failed: invalid token"
        );
        assert_eq!(
            ServerError::from(ConfigError::MissingEnvVar("KANBANTIME_TOKEN".into())).to_string(),
            "configuration error: missing required environment variable: KANBANTIME_TOKEN"
        );
    }

    #[test]
    fn classification_and_status() {
        let auth = ServerError::from(AuthError::MissingToken);
        assert!(auth.is_client_error());
        assert_eq!(auth.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(auth.code(), "missing_token");

        let storage = ServerError::from(KvError::Unavailable("disk full".into()));
        assert!(storage.is_server_error());
        assert_eq!(storage.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn source_is_preserved() {
        let err = ServerError::from(KvError::Unavailable("disk full".into()));
        assert!(err.source().is_some());
        assert!(ServerError::internal("boom").source().is_none());
    }

    #[tokio::test]
    async fn server_errors_hide_details() {
        let response = ServerError::from(KvError::Unavailable("/home/me/state.json".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: ErrorResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.error, "internal server error");
        assert_eq!(body.code.as_deref(), Some("storage_error"));
    }
}
