//! Error types for remote store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while talking to a remote tree store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A path segment is empty or contains a reserved character.
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidPath {
        /// The offending segment.
        segment: String,
        /// Why the segment was rejected.
        reason: &'static str,
    },

    /// The store rejected a write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// The connection to the store is gone.
    #[error("store disconnected")]
    Disconnected,

    /// No listener is registered under the given id.
    #[error("unknown listener {0}")]
    UnknownListener(u64),

    /// The connection URL could not be used.
    #[error("invalid store url {url:?}: {reason}")]
    InvalidUrl {
        /// The URL that was given.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl StoreError {
    /// Returns true if retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Disconnected)
    }
}
