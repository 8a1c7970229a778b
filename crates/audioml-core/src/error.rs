//! Error types for audioml.

use thiserror::Error;

/// Result type alias using audioml's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for audioml operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Conflicting state: illegal status transition or version collision
    #[error("Conflict: {0}")]
    Conflict(String),

    /// External tool (ffmpeg, feature extractor, trainer) failed
    #[error("Tool error: {0}")]
    Tool(String),

    /// Object store operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Event channel publish/fetch/ack failed
    #[error("Channel error: {0}")]
    Channel(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// True for [`Error::Conflict`].
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
