//! Configuration for the synchronization engine.

use crate::error::{SyncError, SyncResult};
use std::time::Duration;

/// Default field name under which record identities are stored remotely.
pub const DEFAULT_IDENTITY_FIELD: &str = "id";

/// Configuration for a treesync connection.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// URL of the remote store. Required.
    pub url: String,
    /// Field name that carries the record identity in remote payloads.
    pub identity_field: String,
    /// Upper bound on every one-shot read and write.
    pub timeout: Duration,
}

impl SyncConfig {
    /// Creates a new configuration for the store at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            identity_field: DEFAULT_IDENTITY_FIELD.to_string(),
            timeout: Duration::from_secs(30),
        }
    }

    /// Sets the identity field name.
    pub fn with_identity_field(mut self, field: impl Into<String>) -> Self {
        self.identity_field = field.into();
        self
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Checks that every required parameter is present.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the URL or identity field is blank,
    /// or the timeout is zero.
    pub fn validate(&self) -> SyncResult<()> {
        if self.url.trim().is_empty() {
            return Err(SyncError::config("a store url is required"));
        }
        if self.identity_field.trim().is_empty() {
            return Err(SyncError::config("identity field must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(SyncError::config("timeout must be greater than zero"));
        }
        Ok(())
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("")
    }
}
