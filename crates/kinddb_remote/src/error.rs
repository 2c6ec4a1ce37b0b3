//! Error types for the store service boundary.

use kinddb_core::CoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for store service calls.
pub type ServiceResult<T> = Result<T, ServiceError>;

/// Errors reported by a store service or the transport in front of it.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceError {
    /// The backend aborted a transaction because of contention.
    #[error("aborted: {0}")]
    Aborted(String),

    /// The backend is temporarily unable to serve the call.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The call's deadline expired before the backend answered.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The backend rejected the request as malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The backend does not know the referenced transaction.
    #[error("not found: {0}")]
    NotFound(String),

    /// The request could not be delivered, or its reply was lost.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },

    /// A request or reply body could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The backend failed internally.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Whether a failed call could have changed stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Lookups, queries, id allocation, begin and rollback.
    Read,
    /// Commits, transactional or not.
    Write,
}

impl ServiceError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if the call may be repeated safely.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Aborted(_) | Self::Unavailable(_) | Self::DeadlineExceeded
        )
    }

    /// Converts into a core error.
    ///
    /// A write whose reply never arrived may or may not have been applied,
    /// so it becomes an ambiguous `Unavailable`.
    pub fn into_core(self, call: CallKind) -> CoreError {
        let ambiguous = call == CallKind::Write;
        match self {
            Self::Aborted(message) => CoreError::conflict(message),
            Self::Unavailable(message) => CoreError::unavailable(message),
            Self::DeadlineExceeded if ambiguous => CoreError::ambiguous("deadline exceeded"),
            Self::DeadlineExceeded => CoreError::deadline_exceeded(),
            Self::InvalidArgument(message) => CoreError::invalid_argument(message),
            Self::NotFound(message) => CoreError::invalid_operation(message),
            Self::Transport { message } | Self::Internal(message) => CoreError::Unavailable {
                message,
                ambiguous,
            },
            Self::Protocol(message) => CoreError::codec(message),
        }
    }
}
