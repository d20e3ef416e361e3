//! Record lifecycle and identity map.
//!
//! [`Repository`] is the persistence-layer collaborator of the engine: it
//! creates, loads, saves and deletes records, keeps one shared handle per
//! `(type, id)`, and emits the lifecycle events that keep records live.

use crate::bindings::{Lifecycle, LiveBindings};
use crate::connection::Connection;
use crate::error::{SyncError, SyncResult};
use crate::gateway::RemoteGateway;
use crate::path::PathResolver;
use crate::reconciler::RecordFinder;
use crate::record::{Record, RecordHandle};
use crate::schema::Schema;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Loads and persists records, keeping them live.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use treesync_core::{Connection, Repository, Schema, SyncConfig, TypeSchema};
/// use treesync_store::MemoryStore;
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let store = Arc::new(MemoryStore::new());
/// let connection = Connection::new(SyncConfig::new("memory://blog"), store.connector()).unwrap();
/// let schema = Schema::new([TypeSchema::new("post", "posts").attribute("title")]).unwrap();
/// let repository = Repository::new(Arc::new(connection), Arc::new(schema));
///
/// let post = repository.new_record("post").unwrap();
/// post.write().set("title", json!("Hello"));
/// repository.save(&post).await.unwrap();
///
/// let id = post.read().id().unwrap().to_string();
/// assert_eq!(store.data()["posts"][&id]["title"], json!("Hello"));
/// # });
/// ```
pub struct Repository {
    resolver: PathResolver,
    gateway: RemoteGateway,
    bindings: Arc<LiveBindings>,
    identity_map: Mutex<HashMap<(String, String), RecordHandle>>,
}

impl Repository {
    /// Creates a repository over `connection` for the types in `schema`.
    pub fn new(connection: Arc<Connection>, schema: Arc<Schema>) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Repository>| {
            let finder: Weak<dyn RecordFinder> = weak.clone();
            let resolver = PathResolver::new(connection, schema);
            let bindings = Arc::new(LiveBindings::new(resolver.clone(), finder));
            Self {
                gateway: RemoteGateway::new(resolver.clone(), Arc::clone(&bindings)),
                resolver,
                bindings,
                identity_map: Mutex::new(HashMap::new()),
            }
        })
    }

    /// Returns the schema registry.
    pub fn schema(&self) -> &Arc<Schema> {
        self.resolver.schema()
    }

    /// Returns the gateway.
    pub fn gateway(&self) -> &RemoteGateway {
        &self.gateway
    }

    /// Returns the live binding registry.
    pub fn bindings(&self) -> &Arc<LiveBindings> {
        &self.bindings
    }

    /// Returns the path resolver.
    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    /// Creates a new, unsaved record of `type_name`.
    pub fn new_record(&self, type_name: &str) -> SyncResult<RecordHandle> {
        Ok(Record::new(self.schema().get(type_name)?).into_handle())
    }

    /// Returns the already loaded `type_name` record `id`, if any.
    pub fn cached(&self, type_name: &str, id: &str) -> Option<RecordHandle> {
        self.identity_map
            .lock()
            .get(&(type_name.to_string(), id.to_string()))
            .cloned()
    }

    /// Finds the `type_name` record `id`.
    ///
    /// Records already loaded are returned as they are. Otherwise the
    /// record is read once, materialized and kept live from then on.
    pub async fn find(&self, type_name: &str, id: &str) -> SyncResult<Option<RecordHandle>> {
        if let Some(record) = self.cached(type_name, id) {
            return Ok(Some(record));
        }
        let Some(value) = self.gateway.find(type_name, id).await? else {
            return Ok(None);
        };
        self.load(type_name, id, value).map(Some)
    }

    /// Finds every record of `type_name`, in store key order.
    pub async fn find_all(&self, type_name: &str) -> SyncResult<Vec<RecordHandle>> {
        let values = self.gateway.find_all(type_name).await?;
        let identity_field = self.resolver.connection().identity_field().to_string();

        let mut records = Vec::with_capacity(values.len());
        for value in values {
            let Some(id) = value.get(&identity_field).and_then(Value::as_str).map(str::to_string)
            else {
                continue;
            };
            match self.cached(type_name, &id) {
                Some(record) => records.push(record),
                None => records.push(self.load(type_name, &id, value)?),
            }
        }
        Ok(records)
    }

    /// Persists `record`: creates it remotely the first time, merges its
    /// fields afterwards.
    ///
    /// On failure the record is left as it was, apart from an identity
    /// that may have been allocated for it.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] for a deleted record.
    pub async fn save(&self, record: &RecordHandle) -> SyncResult<()> {
        if record.read().is_deleted() {
            return Err(SyncError::InvalidStateTransition {
                from: "Deleted".into(),
                to: "Saved".into(),
            });
        }
        if record.read().is_persisted() {
            return self.gateway.update_record(record).await;
        }

        self.gateway.create_record(record).await?;
        record.write().mark_persisted();
        if let Some(key) = key_of(record) {
            self.identity_map.lock().insert(key, Arc::clone(record));
        }
        self.bindings.on_lifecycle(record, Lifecycle::Created)
    }

    /// Deletes `record` remotely and forgets it locally.
    pub async fn delete(&self, record: &RecordHandle) -> SyncResult<()> {
        self.bindings.on_lifecycle(record, Lifecycle::WillDelete)?;
        self.gateway.delete_record(record).await?;
        record.write().mark_deleted();
        if let Some(key) = key_of(record) {
            self.identity_map.lock().remove(&key);
        }
        Ok(())
    }

    /// Builds a record from a remote value and registers it.
    ///
    /// Relationship fields start out empty; the live binding fills them
    /// from the initial child events.
    fn load(&self, type_name: &str, id: &str, value: Value) -> SyncResult<RecordHandle> {
        let schema = self.schema().get(type_name)?;
        let identity_field = self.resolver.connection().identity_field();
        let Value::Object(fields) = value else {
            let location = self.resolver.location_of(type_name, id)?;
            warn!(%location, "stored value is not an object");
            return Err(SyncError::Malformed { location });
        };
        let mut record = Record::with_id(schema, id);
        for (field, value) in fields {
            if field == identity_field || schema.is_relationship(&field) {
                continue;
            }
            record.set(field, value);
        }
        record.mark_persisted();

        let record = {
            let mut map = self.identity_map.lock();
            let key = (type_name.to_string(), id.to_string());
            if let Some(existing) = map.get(&key) {
                // Loaded concurrently by someone else.
                return Ok(Arc::clone(existing));
            }
            let record = record.into_handle();
            map.insert(key, Arc::clone(&record));
            record
        };
        debug!(type_name, id, "loaded");
        if let Err(e) = self.bindings.on_lifecycle(&record, Lifecycle::Loaded) {
            warn!(type_name, id, error = %e, "record loaded without live binding");
        }
        Ok(record)
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        self.bindings.disable_all();
    }
}

#[async_trait]
impl RecordFinder for Repository {
    async fn find_related(&self, type_name: &str, id: &str) -> SyncResult<Option<RecordHandle>> {
        self.find(type_name, id).await
    }
}

fn key_of(record: &RecordHandle) -> Option<(String, String)> {
    let record = record.read();
    Some((record.type_name().to_string(), record.id()?.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::schema::TypeSchema;
    use serde_json::json;
    use treesync_store::{Location, MemoryStore, RemoteStore};

    fn repository(data: Value) -> (Arc<MemoryStore>, Arc<Repository>) {
        let store = Arc::new(MemoryStore::with_data(data).unwrap());
        let connection = Connection::new(SyncConfig::new("memory://blog"), store.connector()).unwrap();
        let schema = Schema::new([
            TypeSchema::new("post", "posts")
                .attribute("title")
                .has_many("comments", "comment"),
            TypeSchema::new("comment", "comments").attribute("body"),
        ])
        .unwrap();
        (store, Repository::new(Arc::new(connection), Arc::new(schema)))
    }

    #[tokio::test]
    async fn find_uses_identity_map() {
        let (_store, repository) = repository(json!({"posts": {"p1": {"title": "Hello", "id": "p1"}}}));

        let first = repository.find("post", "p1").await.unwrap().unwrap();
        let second = repository.find("post", "p1").await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let record = first.read();
        assert_eq!(record.scalar("title"), Some(&json!("Hello")));
        assert!(record.get("id").is_none());
        assert!(record.is_persisted());
    }

    #[tokio::test]
    async fn find_missing_is_none() {
        let (store, repository) = repository(json!({}));
        assert!(repository.find("post", "nope").await.unwrap().is_none());
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn loaded_records_are_live() {
        let (store, repository) = repository(json!({"posts": {"p1": {"title": "Hello"}}}));
        repository.find("post", "p1").await.unwrap();
        assert_eq!(store.listener_count(), 1);
        assert!(repository.bindings().get("post", "p1").is_some());
    }

    #[tokio::test]
    async fn save_creates_then_updates() {
        let (store, repository) = repository(json!({}));
        let post = repository.new_record("post").unwrap();
        post.write().set("title", json!("Draft"));

        repository.save(&post).await.unwrap();
        let id = post.read().id().unwrap().to_string();
        assert!(post.read().is_persisted());
        assert!(Arc::ptr_eq(&repository.cached("post", &id).unwrap(), &post));

        post.write().set("title", json!("Final"));
        repository.save(&post).await.unwrap();
        assert_eq!(store.data()["posts"][&id], json!({"title": "Final", "id": id}));
    }

    #[tokio::test]
    async fn failed_create_is_not_persisted() {
        let (store, repository) = repository(json!({}));
        store.fail_writes(Some("denied".into()));
        let post = repository.new_record("post").unwrap();

        assert!(matches!(repository.save(&post).await, Err(SyncError::Write { .. })));
        assert!(!post.read().is_persisted());
        assert!(repository.bindings().is_empty());
    }

    #[tokio::test]
    async fn delete_forgets_record() {
        let (store, repository) = repository(json!({"posts": {"p1": {"title": "Hello"}}}));
        let post = repository.find("post", "p1").await.unwrap().unwrap();

        repository.delete(&post).await.unwrap();
        assert!(repository.cached("post", "p1").is_none());
        assert!(repository.bindings().is_empty());
        assert!(post.read().is_deleted());
        assert_eq!(store.data(), Value::Null);
    }

    #[tokio::test]
    async fn deleted_record_cannot_be_saved() {
        let (store, repository) = repository(json!({"posts": {"p1": {"title": "Hello"}}}));
        let post = repository.find("post", "p1").await.unwrap().unwrap();
        repository.delete(&post).await.unwrap();

        post.write().set("title", json!("Back"));
        assert!(matches!(
            repository.save(&post).await,
            Err(SyncError::InvalidStateTransition { .. })
        ));
        assert_eq!(store.data(), Value::Null);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn non_object_value_is_malformed() {
        let (store, repository) = repository(json!({"posts": {"p1": "oops"}}));
        let err = repository.find("post", "p1").await.unwrap_err();

        assert!(matches!(&err, SyncError::Malformed { location } if location.to_string() == "posts/p1"));
        assert!(repository.cached("post", "p1").is_none());
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn dropping_repository_stops_listeners() {
        let (store, repository) = repository(json!({"posts": {"a": {"title": "A"}, "b": {"title": "B"}}}));
        let records = repository.find_all("post").await.unwrap();
        assert_eq!(store.listener_count(), 2);
        let binding = repository.bindings().get("post", "a").unwrap();

        drop(repository);
        assert_eq!(store.listener_count(), 0);
        assert!(binding.is_disabled());

        store
            .set(&Location::parse("posts/a/title").unwrap(), json!("Remote"))
            .await
            .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(records[0].read().scalar("title"), Some(&json!("A")));
    }

    #[tokio::test]
    async fn find_all_reuses_loaded_records() {
        let (_store, repository) = repository(json!({"posts": {"a": {"title": "A"}, "b": {"title": "B"}}}));
        let a = repository.find("post", "a").await.unwrap().unwrap();

        let all = repository.find_all("post").await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(Arc::ptr_eq(&all[0], &a));
        assert_eq!(all[1].read().id(), Some("b"));
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let (_store, repository) = repository(json!({}));
        assert!(matches!(repository.new_record("user"), Err(SyncError::UnknownType(_))));
    }
}
