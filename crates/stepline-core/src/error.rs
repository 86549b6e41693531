//! Error types for state store and event publisher operations

use thiserror::Error;

/// Result type for store and publisher operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while persisting state or publishing events
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection to the storage backend failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The backend is not configured or not reachable
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Backend-specific command failure (Redis, etc.)
    #[error("Backend error: {0}")]
    Backend(String),

    /// A value could not be serialized before writing
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// A stored value could not be decoded
    #[error("Deserialization failed for '{key}': {reason}")]
    Deserialization { key: String, reason: String },

    /// The operation has no stored record
    #[error("Operation not found: {0}")]
    NotFound(String),

    /// A stream id or cursor string was malformed
    #[error("Invalid stream id: {0}")]
    InvalidStreamId(String),

    /// A blocking read was interrupted by its cancellation signal
    #[error("Operation cancelled")]
    Cancelled,

    /// The subscribe loop gave up after repeated read failures
    #[error("Stream read failed after {attempts} attempts: {reason}")]
    ReadRetriesExhausted { attempts: u32, reason: String },
}

impl StoreError {
    /// Build a deserialization error for a given storage key
    pub fn decode(key: impl Into<String>, err: impl std::fmt::Display) -> Self {
        StoreError::Deserialization {
            key: key.into(),
            reason: err.to_string(),
        }
    }

    /// Whether a retry could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::ConnectionFailed(_) | StoreError::Backend(_) | StoreError::Unavailable(_)
        )
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
