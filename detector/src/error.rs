//! Error types for the kanbantime detector.
//!
//! Extraction and detection never fail with an error: they return `Option`
//! and drop what they cannot read. The errors here cover the edges of the
//! process, namely configuration, the page protocol and the relay.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dom::DomError;
use crate::relay::RelayError;

/// Errors that can occur during detector operations.
#[derive(Error, Debug)]
pub enum DetectorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A page patch could not be applied.
    #[error("page model error: {0}")]
    Dom(#[from] DomError),

    /// Communication with the timer core failed.
    #[error("relay error: {0}")]
    Relay(#[from] RelayError),

    /// Reading page events or writing notices failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A page event line was not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A specialized `Result` type for detector operations.
pub type Result<T> = std::result::Result<T, DetectorError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeId;

    #[test]
    fn config_error_display() {
        let err = DetectorError::from(ConfigError::MissingEnvVar("KANBANTIME_TOKEN".to_string()));
        assert_eq!(
            err.to_string(),
            "configuration error: missing required environment variable: KANBANTIME_TOKEN"
        );
    }

    #[test]
    fn dom_error_conversion() {
        let err: DetectorError = DomError::UnknownNode(NodeId(7)).into();
        assert!(matches!(err, DetectorError::Dom(_)));
        assert_eq!(err.to_string(), "page model error: unknown or detached node #7");
    }

    #[test]
    fn json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{ nope").unwrap_err();
        let err: DetectorError = json_err.into();
        assert!(err.to_string().starts_with("JSON error"));
    }

    #[test]
    fn relay_error_keeps_source() {
        use std::error::Error;

        let err: DetectorError = RelayError::AuthFailed.into();
        assert!(err.source().is_some());
    }
}
