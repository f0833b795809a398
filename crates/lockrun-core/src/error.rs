//! Error types for locking system operations.

use thiserror::Error;

/// Errors that can occur while coordinating a lock.
#[derive(Error, Debug)]
pub enum LockError {
    /// The operation was cancelled before it completed.
    #[error("lock operation was cancelled")]
    Cancelled,

    /// The backend could not be reached.
    #[error("connection error: {0}")]
    Connection(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The backend rejected our credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Flags or backend parameters are malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The lock was lost after acquisition.
    #[error("lock was lost: {0}")]
    LockLost(String),

    /// The backend does not implement this operation.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Backend-specific error.
    #[error("backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl LockError {
    /// Wraps a message as a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(Box::new(std::io::Error::other(message.into())))
    }

    /// Wraps a message as a backend error.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(Box::new(std::io::Error::other(message.into())))
    }
}

/// Result type for lock operations.
pub type LockResult<T> = Result<T, LockError>;
