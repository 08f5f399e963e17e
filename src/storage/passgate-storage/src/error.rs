//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be opened or reached.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A read or write statement failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// A stored value could not be (de)serialized.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Caller supplied an invalid argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
