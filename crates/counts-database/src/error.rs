//! Counts database error types.

use thiserror::Error;

/// Counts database error type.
#[derive(Error, Debug)]
pub enum CountsError {
    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Connection or executor error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Misconfigured count table (bad identifiers, empty squash key, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Migration error
    #[error("Migration error: {0}")]
    Migration(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid data error (key or filter does not fit the table)
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using CountsError.
pub type CountsResult<T> = Result<T, CountsError>;
