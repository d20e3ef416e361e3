//! # treesync Store
//!
//! Remote tree store capabilities for treesync.
//!
//! This crate describes what the synchronization engine needs from a
//! remote hierarchical real-time store, and nothing more. The store is a
//! JSON tree addressed by `/`-separated [`Location`]s.
//!
//! ## Design Principles
//!
//! - One object-safe trait ([`RemoteStore`]) is the whole contract
//! - Subscriptions are channels ([`ChildEvents`]), not nested callbacks
//! - Missing data and `null` are the same thing
//! - Child keys come from a time-ordered push id generator
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - in-process store for tests, demos and tooling
//!
//! ## Example
//!
//! ```rust
//! use treesync_store::{ChildEvent, Location, MemoryStore, RemoteStore};
//! use serde_json::json;
//!
//! let store = MemoryStore::with_data(json!({"posts": {"p1": {"title": "Hello"}}})).unwrap();
//! let mut events = store.subscribe_children(&Location::parse("posts/p1").unwrap()).unwrap();
//!
//! assert_eq!(
//!     events.try_next(),
//!     Some(ChildEvent::Added { key: "title".into(), value: json!("Hello"), previous: None })
//! );
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod event;
mod location;
mod memory;
mod push_id;
mod snapshot;
mod store;

pub use error::{StoreError, StoreResult};
pub use event::{ChildEvent, ChildEvents, EventKind, ListenerId};
pub use location::{validate_segment, Location};
pub use memory::{MemoryConnector, MemoryStore, MEMORY_SCHEME};
pub use push_id::{PushIdGenerator, PUSH_ID_LEN};
pub use snapshot::{children_of, compare_keys, Snapshot};
pub use store::{Connector, RemoteStore};

/// Re-exported so callers can name values without a direct dependency.
pub use serde_json::{Map, Value};
