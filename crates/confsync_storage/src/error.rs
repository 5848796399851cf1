//! Error types for storage operations.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A record read by the transaction was committed by another one first.
    ///
    /// Nothing was written; running the whole unit of work again may succeed.
    #[error("transaction conflict on {0}")]
    Conflict(String),

    /// The backend is temporarily unavailable.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}
