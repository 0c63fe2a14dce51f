//! Common error types for BinSight

use thiserror::Error;

/// Common result type for BinSight operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across the BinSight services
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or out-of-range input, rejected before any write
    #[error("Validation failed for '{field}': {message}")]
    Validation { field: String, message: String },

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Storage momentarily unavailable after retry
    #[error("Transient storage error: {0}")]
    Transient(String),

    /// Subscriber-side connection failure, drives the reconnect state machine
    #[error("Connection error: {0}")]
    Connection(String),

    /// Delivery to a single subscriber failed, logged and swallowed by callers
    #[error("Broadcast delivery error: {0}")]
    Broadcast(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error (wraps serde_json::Error)
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Shorthand for a field-level validation failure
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}
