//! The shared remote store handle.

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use once_cell::sync::OnceCell;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;
use treesync_store::{Connector, RemoteStore};

/// The process-wide handle to the remote store.
///
/// A connection is constructed explicitly, validated immediately, and
/// injected into every component as an `Arc<Connection>`. The underlying
/// store handle is opened lazily on first use and at most once, even when
/// several callers race on that first use.
pub struct Connection {
    config: SyncConfig,
    connector: Box<dyn Connector>,
    store: OnceCell<Arc<dyn RemoteStore>>,
}

impl Connection {
    /// Creates a connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the configuration is incomplete.
    /// Nothing is connected in that case.
    pub fn new(config: SyncConfig, connector: impl Connector + 'static) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector: Box::new(connector),
            store: OnceCell::new(),
        })
    }

    /// Creates a connection around an already opened store.
    pub fn with_store(config: SyncConfig, store: Arc<dyn RemoteStore>) -> SyncResult<Self> {
        config.validate()?;
        let cell = OnceCell::new();
        // A fresh cell cannot already be set.
        let _ = cell.set(Arc::clone(&store));
        Ok(Self {
            config,
            connector: Box::new(FixedConnector(store)),
            store: cell,
        })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Returns the field name carrying record identities.
    pub fn identity_field(&self) -> &str {
        &self.config.identity_field
    }

    /// Returns the store handle, connecting on first use.
    pub fn store(&self) -> SyncResult<&Arc<dyn RemoteStore>> {
        self.store.get_or_try_init(|| {
            debug!(url = %self.config.url, "connecting to remote store");
            self.connector.connect(&self.config.url).map_err(SyncError::from)
        })
    }

    /// Returns true once the store handle has been opened.
    pub fn is_connected(&self) -> bool {
        self.store.get().is_some()
    }

    /// Runs `request` under the configured timeout.
    pub(crate) async fn bounded<T, F>(&self, request: F) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        tokio::time::timeout(self.config.timeout, request)
            .await
            .map_err(|_| SyncError::Timeout)?
    }
}

struct FixedConnector(Arc<dyn RemoteStore>);

impl Connector for FixedConnector {
    fn connect(&self, _url: &str) -> treesync_store::StoreResult<Arc<dyn RemoteStore>> {
        Ok(Arc::clone(&self.0))
    }
}
