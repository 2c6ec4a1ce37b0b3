//! Error types for the cache layer.

use kinddb_core::CoreError;
use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors that can occur in cache operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// The cache could not be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// A slot payload could not be encoded or decoded.
    #[error("cache codec error: {0}")]
    Codec(String),

    /// A slot no longer holds the lock its writer placed there.
    ///
    /// Resolved by evicting the slot; never returned to callers.
    #[error("cache slot {slot} changed while locked")]
    Inconsistency {
        /// Slot name.
        slot: String,
    },
}

impl From<CacheError> for CoreError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Unavailable(message) => CoreError::unavailable(message),
            CacheError::Codec(message) => CoreError::codec(message),
            CacheError::Inconsistency { slot } => {
                CoreError::invalid_operation(format!("cache slot {slot} changed while locked"))
            }
        }
    }
}
