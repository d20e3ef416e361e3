//! Remote store capability trait.

use crate::error::StoreResult;
use crate::event::{ChildEvents, ListenerId};
use crate::location::Location;
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

/// The capabilities treesync needs from a remote hierarchical store.
///
/// The store is a JSON tree addressed by [`Location`]. This trait is the
/// whole contract between the synchronization engine and the transport;
/// connection handling, authentication and the wire protocol stay behind
/// it.
///
/// # Invariants
///
/// - Writing `null` (or an empty object) removes the data at a location
/// - Reads never distinguish missing data from `null`
/// - Child events for one listener are delivered in the order the store
///   applied the corresponding writes
/// - Implementations must be `Send + Sync`; one handle is shared by every
///   record
///
/// # Implementors
///
/// - [`super::MemoryStore`] - in-process reference store
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Reads the current value at `location` once.
    async fn read_once(&self, location: &Location) -> StoreResult<Snapshot>;

    /// Starts listening for child added/changed/removed events one level
    /// below `location`.
    ///
    /// The returned stream first yields an `Added` event for every child
    /// already present, in store key order.
    fn subscribe_children(&self, location: &Location) -> StoreResult<ChildEvents>;

    /// Stops a listener. Its event stream ends after any queued events.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnknownListener`](crate::StoreError::UnknownListener)
    /// if the listener was never registered or is already gone.
    fn unsubscribe(&self, listener: ListenerId) -> StoreResult<()>;

    /// Replaces the value at `location`.
    async fn set(&self, location: &Location, value: Value) -> StoreResult<()>;

    /// Merges `values` into the data at `location`.
    ///
    /// Each key is written independently; a key may itself be a
    /// `/`-separated relative path. Keys not mentioned are left alone.
    async fn update(&self, location: &Location, values: Map<String, Value>) -> StoreResult<()>;

    /// Removes the value at `location` (writes `null`).
    async fn remove(&self, location: &Location) -> StoreResult<()> {
        self.set(location, Value::Null).await
    }

    /// Allocates a new child of `parent` under a freshly generated,
    /// never-before-used key. Nothing is written.
    fn push_child(&self, parent: &Location) -> StoreResult<Location>;
}

/// Opens store handles from a connection URL.
pub trait Connector: Send + Sync {
    /// Connects to the store at `url`.
    fn connect(&self, url: &str) -> StoreResult<Arc<dyn RemoteStore>>;
}
