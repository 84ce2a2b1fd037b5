//! Error types for accept-state

use thiserror::Error;

/// Errors that can occur in the memoization layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Database connection error
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// Backend query or transaction error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Schema setup error
    #[error("Schema setup failed: {0}")]
    SchemaSetup(String),

    /// Key arguments could not be encoded canonically
    #[error("Invalid memo key: {0}")]
    InvalidKey(String),

    /// A stored value could not be decoded
    #[error("Corrupt memo entry {key}: {reason}")]
    Corrupt { key: String, reason: String },

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}
