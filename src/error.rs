//! Portcullis error types

use std::time::Duration;

/// Portcullis error types
#[derive(Debug, thiserror::Error)]
pub enum PortcullisError {
    // Cache backend errors
    #[error("cache backend unavailable: {0}")]
    CacheUnavailable(String),

    #[error("cache operation '{operation}' failed: {message}")]
    Cache {
        operation: &'static str,
        message: String,
    },

    #[error("cache operation '{operation}' timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    // Data errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid key pattern: {0}")]
    InvalidPattern(String),

    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl PortcullisError {
    /// Whether this error came from the cache infrastructure (connection,
    /// command or timeout) rather than from the caller's data.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            PortcullisError::CacheUnavailable(_)
                | PortcullisError::Cache { .. }
                | PortcullisError::Timeout { .. }
        )
    }
}

/// Result type alias for Portcullis operations
pub type Result<T> = std::result::Result<T, PortcullisError>;
