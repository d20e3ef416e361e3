//! Remote location resolution for records.
//!
//! A record of type `T` with identity `id` lives at `{namespace(T)}/{id}`.
//! Records without an identity get one allocated from the store's push id
//! capability the first time they are resolved.

use crate::connection::Connection;
use crate::error::{SyncError, SyncResult};
use crate::record::Record;
use crate::schema::Schema;
use std::sync::Arc;
use tracing::trace;
use treesync_store::Location;

/// Maps records to their remote locations.
#[derive(Clone)]
pub struct PathResolver {
    connection: Arc<Connection>,
    schema: Arc<Schema>,
}

impl PathResolver {
    /// Creates a resolver.
    pub fn new(connection: Arc<Connection>, schema: Arc<Schema>) -> Self {
        Self { connection, schema }
    }

    /// Returns the schema registry.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Returns the shared connection.
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Resolves the root location holding every record of `type_name`.
    pub fn namespace_location(&self, type_name: &str) -> SyncResult<Location> {
        let namespace = self.schema.namespace(type_name)?;
        Ok(Location::root().child(namespace)?)
    }

    /// Resolves the location of `record`, allocating an identity if it has
    /// none.
    ///
    /// Calling this again for the same record returns an equal location and
    /// has no further side effect.
    pub fn resolve(&self, record: &mut Record) -> SyncResult<Location> {
        let namespace = self.namespace_location(record.type_name())?;
        if let Some(id) = record.id() {
            return Ok(namespace.child(id)?);
        }

        let location = self.connection.store()?.push_child(&namespace)?;
        // push_child always returns a child of `namespace`.
        let key = location.key().unwrap_or_default().to_string();
        trace!(type_name = record.type_name(), id = %key, "allocated identity");
        record.assign_id(key);
        Ok(location)
    }

    /// Resolves the location of a record that already has an identity.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentity`] if the record has none.
    pub fn resolve_existing(&self, record: &Record) -> SyncResult<Location> {
        let id = record.id().ok_or_else(|| SyncError::MissingIdentity {
            type_name: record.type_name().to_string(),
        })?;
        self.location_of(record.type_name(), id)
    }

    /// Resolves the location of the `type_name` record `id`.
    pub fn location_of(&self, type_name: &str, id: &str) -> SyncResult<Location> {
        Ok(self.namespace_location(type_name)?.child(id)?)
    }
}
