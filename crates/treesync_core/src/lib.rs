//! # treesync Core
//!
//! Live-binding synchronization engine for records backed by a remote
//! real-time tree.
//!
//! This crate provides:
//! - Record type schemas and relationship classification
//! - Path resolution with push id allocation
//! - Record serialization into remote payloads
//! - Live bindings reconciling remote child events into local records
//! - A remote gateway for reads, creates, updates and deletes
//! - A repository with an identity map and lifecycle events
//!
//! ## Architecture
//!
//! Records are shared handles. A record of type `T` with identity `id`
//! lives at `{namespace(T)}/{id}` in the remote tree. Once loaded or
//! created, a record of a live type is bound to that location: every
//! child added, changed or removed remotely is reconciled into it.
//! Local mutations go back out through the [`RemoteGateway`].
//!
//! ## Key Invariants
//!
//! - The remote store is authoritative for scalar fields
//! - Relationship fields only grow through reconciliation, without
//!   duplicates
//! - Events for one record are applied in delivery order
//! - A disabled binding never mutates its record again
//! - Write failures are reported through the returned result only

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bindings;
mod config;
mod connection;
mod error;
mod gateway;
mod path;
mod reconciler;
mod record;
mod repository;
mod schema;
mod serializer;

pub use bindings::{Lifecycle, LiveBindings};
pub use config::{SyncConfig, DEFAULT_IDENTITY_FIELD};
pub use connection::Connection;
pub use error::{SyncError, SyncResult};
pub use gateway::RemoteGateway;
pub use path::PathResolver;
pub use reconciler::{BindingState, EventOutcome, LiveBinding, RecordFinder};
pub use record::{FieldValue, Record, RecordHandle, RelatedRecord, RelationState};
pub use repository::Repository;
pub use schema::{RelationshipDescriptor, Schema, TypeSchema};
pub use serializer::{serialize, SerializeOptions};
