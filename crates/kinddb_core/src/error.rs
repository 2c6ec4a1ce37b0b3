//! Error types for kinddb core.

use crate::key::Key;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in kinddb core operations.
///
/// Adapters never recover errors silently. The transaction manager only
/// recovers [`CoreError::Conflict`] raised by `commit`, up to its retry
/// budget; everything else propagates to the caller.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A lookup of a specific key found nothing.
    #[error("entity not found: {key}")]
    NotFound {
        /// The key that was looked up.
        key: Key,
    },

    /// Malformed key, query descriptor, or ordering constraint. Never retried.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Transient transport failure or expired deadline.
    ///
    /// `ambiguous` is set when a write may or may not have been applied.
    #[error("backend unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// Whether the outcome of a write is unknown.
        ambiguous: bool,
    },

    /// Optimistic concurrency violation.
    #[error("conflict: {message}")]
    Conflict {
        /// Description of the conflict.
        message: String,
    },

    /// A transactional unit of work ran out of retries.
    #[error("transaction retries exceeded after {attempts} attempts: {source}")]
    RetriesExceeded {
        /// Total number of attempts, including the first.
        attempts: u32,
        /// The last conflict that caused a retry.
        #[source]
        source: Box<CoreError>,
    },

    /// The transaction was rolled back instead of committed.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for the abort.
        reason: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// A record, key or cursor could not be encoded or decoded.
    #[error("codec error: {message}")]
    Codec {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates a not found error.
    pub fn not_found(key: Key) -> Self {
        Self::NotFound { key }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an unavailable error for a call that is known not to have applied.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            ambiguous: false,
        }
    }

    /// Creates an unavailable error for a write whose outcome is unknown.
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            ambiguous: true,
        }
    }

    /// Creates a deadline expiry error.
    pub fn deadline_exceeded() -> Self {
        Self::unavailable("deadline exceeded")
    }

    /// Creates a conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a codec error.
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec {
            message: message.into(),
        }
    }

    /// Returns true for optimistic concurrency failures.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Returns true if the caller may retry the failed call.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Unavailable { ambiguous, .. } => !ambiguous,
            Self::Conflict { .. } => true,
            _ => false,
        }
    }
}
