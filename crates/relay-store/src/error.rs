//! Store errors.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by a [`MessageStore`](crate::MessageStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// A message referenced a channel that does not exist.
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    /// Backend failure (connection, query, constraint).
    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}
