//! Error types for the synchronization engine.

use thiserror::Error;
use treesync_store::{Location, StoreError};

/// Result type for engine operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during synchronization.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Required configuration is missing or invalid. Raised at
    /// construction, before anything is connected.
    #[error("configuration error: {0}")]
    Config(String),

    /// The remote store failed a request.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The remote store rejected a create, update or delete.
    #[error("write to {location} failed: {source}")]
    Write {
        /// Location that was written.
        location: Location,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },

    /// The operation is not supported by a tree store.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),

    /// No schema is registered for the record type.
    #[error("unknown record type {0:?}")]
    UnknownType(String),

    /// The record has no identity yet.
    #[error("record of type {type_name:?} has no identity")]
    MissingIdentity {
        /// Record type.
        type_name: String,
    },

    /// Invalid state transition.
    #[error("invalid state transition from {from:?} to {to:?}")]
    InvalidStateTransition {
        /// Current state.
        from: String,
        /// Attempted target state.
        to: String,
    },

    /// A record location holds something other than an object.
    #[error("malformed record at {location}")]
    Malformed {
        /// Location of the stored value.
        location: Location,
    },

    /// The request did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// A value could not be converted.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Wraps a store error raised by a write.
    pub fn write(location: &Location, source: StoreError) -> Self {
        Self::Write {
            location: location.clone(),
            source,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Store(source) | SyncError::Write { source, .. } => source.is_retryable(),
            SyncError::Timeout => true,
            _ => false,
        }
    }
}
