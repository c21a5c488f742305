//! Token authentication for local clients.
//!
//! The detector and the banner layer share one token with the timer core.
//! `POST /messages` carries it as `Authorization: Bearer <token>`, `GET /ws`
//! as a `token` query parameter (browsers cannot set headers on WebSocket
//! upgrades). Comparison is constant-time.
//!
//! # Example
//!
//! ```rust
//! use kanbantime_server::auth::{validate_token, AuthError};
//!
//! assert_eq!(validate_token("secret", "secret"), Ok(()));
//! assert_eq!(validate_token("guess", "secret"), Err(AuthError::InvalidToken));
//! assert_eq!(validate_token("", "secret"), Err(AuthError::MissingToken));
//! ```

use axum::http::{header::AUTHORIZATION, HeaderMap};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Reasons a request was not authenticated.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    #[error("missing token")]
    MissingToken,

    #[error("invalid token")]
    InvalidToken,
}

impl AuthError {
    /// Machine-readable code for error bodies.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingToken => "missing_token",
            Self::InvalidToken => "invalid_token",
        }
    }
}

/// Compares a provided token with the expected one in constant time.
///
/// # Errors
///
/// `MissingToken` for an empty token, `InvalidToken` on mismatch.
pub fn validate_token(provided: &str, expected: &str) -> Result<(), AuthError> {
    if provided.is_empty() {
        return Err(AuthError::MissingToken);
    }
    if bool::from(provided.as_bytes().ct_eq(expected.as_bytes())) {
        Ok(())
    } else {
        Err(AuthError::InvalidToken)
    }
}

/// Token of an `Authorization: Bearer <token>` header, if present.
#[must_use]
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}
