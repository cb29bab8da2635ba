//! Error types for TAAR Lite
//!
//! Defines one error enum covering every failure mode below the public
//! recommendation contract. Uses thiserror for ergonomic error handling.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for TAAR Lite operations
pub type Result<T> = std::result::Result<T, TaarLiteError>;

/// Error type for TAAR Lite operations
#[derive(Error, Debug)]
pub enum TaarLiteError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Object missing from the remote store
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Could not take the cross-process fetch lock in time
    #[error("Timed out after {waited:?} waiting for lock {name}")]
    LockTimeout { name: String, waited: Duration },

    /// A graph weight that cannot be ranked
    #[error("Invalid weight {value} for {row} -> {neighbor}")]
    InvalidGraph {
        row: String,
        neighbor: String,
        value: f64,
    },

    /// Variant name that has no recommender behind it
    #[error("Unsupported variant: {0}")]
    UnsupportedVariant(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// SQLite database errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl crate::retry::Transient for TaarLiteError {
    fn is_transient(&self) -> bool {
        match self {
            TaarLiteError::Http(e) => {
                e.is_connect()
                    || e.is_timeout()
                    || e.status().map_or(true, |status| {
                        status.as_u16() == 429 || status.is_server_error()
                    })
            }
            TaarLiteError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut | std::io::ErrorKind::Interrupted
            ),
            // a missing object will still be missing on the next attempt
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::Transient;

    #[test]
    fn test_timeouts_are_transient() {
        let err = TaarLiteError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "read timed out",
        ));
        assert!(err.is_transient());

        let err = TaarLiteError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_missing_object_is_permanent() {
        let err = TaarLiteError::ObjectNotFound {
            bucket: "telemetry-parquet".to_string(),
            key: "taar/lite/guid_coinstallation.json".to_string(),
        };
        assert!(!err.is_transient());
        assert_eq!(
            err.to_string(),
            "Object not found: telemetry-parquet/taar/lite/guid_coinstallation.json"
        );
    }

    #[test]
    fn test_invalid_graph_message() {
        let err = TaarLiteError::InvalidGraph {
            row: "a".to_string(),
            neighbor: "b".to_string(),
            value: -1.0,
        };
        assert_eq!(err.to_string(), "Invalid weight -1 for a -> b");
    }
}
