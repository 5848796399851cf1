//! Error types for the sync pipeline.

use crate::transport::QueueError;
use confsync_storage::StorageError;
use thiserror::Error;

/// Result type for pipeline operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur while handling a trigger.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Invalid trigger parameters.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Upstream manifest fetch failed.
    #[error("upstream error: {message}")]
    Upstream {
        /// What went wrong.
        message: String,
    },

    /// A follow-up task could not be scheduled.
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ServerError {
    /// Creates an upstream error.
    pub fn upstream(message: impl Into<String>) -> Self {
        ServerError::Upstream {
            message: message.into(),
        }
    }

    /// Returns the HTTP status code reported for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ServerError::InvalidRequest(_) => 400,
            ServerError::Upstream { .. } => 502,
            ServerError::Storage(_) | ServerError::Queue(_) => 500,
        }
    }

    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }

    /// Returns true if this is a server error (5xx).
    ///
    /// Server errors make the task queue deliver the trigger again.
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(ServerError::InvalidRequest("bad".into()).is_client_error());
        assert!(ServerError::from(StorageError::Conflict("user u1".into())).is_server_error());
        assert!(!ServerError::InvalidRequest("bad".into()).is_server_error());
        assert!(ServerError::Queue(QueueError::new("full")).is_server_error());
    }

    #[test]
    fn status_codes() {
        assert_eq!(ServerError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(ServerError::upstream("timeout").status_code(), 502);
        assert_eq!(
            ServerError::from(StorageError::Unavailable("down".into())).status_code(),
            500
        );
    }

    #[test]
    fn error_display() {
        let err = ServerError::upstream("manifest returned 503");
        assert_eq!(err.to_string(), "upstream error: manifest returned 503");
    }
}
