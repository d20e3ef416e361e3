//! Remote reads and writes on behalf of the persistence layer.
//!
//! Every operation maps to exactly one remote request (or one concurrent
//! fan-out of requests for [`RemoteGateway::find_many`]) and completes
//! exactly once, with either a value or an error, bounded by the
//! configured timeout.

use crate::bindings::LiveBindings;
use crate::connection::Connection;
use crate::error::{SyncError, SyncResult};
use crate::path::PathResolver;
use crate::record::RecordHandle;
use crate::serializer::{serialize, SerializeOptions};
use futures::future::try_join_all;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};
use treesync_store::{Location, Snapshot, StoreResult};

/// Translates record operations into remote store requests.
#[derive(Clone)]
pub struct RemoteGateway {
    resolver: PathResolver,
    bindings: Arc<LiveBindings>,
}

impl RemoteGateway {
    /// Creates a gateway.
    pub fn new(resolver: PathResolver, bindings: Arc<LiveBindings>) -> Self {
        Self { resolver, bindings }
    }

    fn connection(&self) -> &Arc<Connection> {
        self.resolver.connection()
    }

    async fn read(&self, location: &Location) -> SyncResult<Snapshot> {
        let store = self.connection().store()?;
        self.connection()
            .bounded(async { Ok::<_, SyncError>(store.read_once(location).await?) })
            .await
    }

    async fn write<F>(&self, location: &Location, request: F) -> SyncResult<()>
    where
        F: Future<Output = StoreResult<()>>,
    {
        self.connection()
            .bounded(async { request.await.map_err(|e| SyncError::write(location, e)) })
            .await
    }

    /// Reads the `type_name` record `id`.
    ///
    /// Returns `None` if nothing is stored there.
    pub async fn find(&self, type_name: &str, id: &str) -> SyncResult<Option<Value>> {
        let location = self.resolver.location_of(type_name, id)?;
        let snapshot = self.read(&location).await?;
        debug!(%location, found = snapshot.exists(), "find");
        Ok(snapshot.into_value())
    }

    /// Reads several records concurrently.
    ///
    /// Results come back in the order of `ids`. If any read fails, the
    /// whole call fails.
    pub async fn find_many<S: AsRef<str>>(
        &self,
        type_name: &str,
        ids: &[S],
    ) -> SyncResult<Vec<Option<Value>>> {
        try_join_all(ids.iter().map(|id| self.find(type_name, id.as_ref()))).await
    }

    /// Reads every record of `type_name`.
    ///
    /// Each record comes back with its key stamped under the identity
    /// field, in store key order. Children that are not objects are
    /// skipped.
    pub async fn find_all(&self, type_name: &str) -> SyncResult<Vec<Value>> {
        let location = self.resolver.namespace_location(type_name)?;
        let snapshot = self.read(&location).await?;
        let identity_field = self.connection().identity_field();

        let mut records = Vec::new();
        for (key, value) in snapshot.children() {
            let Value::Object(mut fields) = value.clone() else {
                warn!(%location, %key, "skipping non-object child");
                continue;
            };
            fields.insert(identity_field.to_string(), Value::String(key));
            records.push(Value::Object(fields));
        }
        debug!(%location, count = records.len(), "find_all");
        Ok(records)
    }

    /// Queries are not supported by a tree store; fetch with
    /// [`find_all`](Self::find_all) and filter locally.
    pub async fn find_query(&self, type_name: &str, query: &Value) -> SyncResult<Vec<Value>> {
        debug!(type_name, %query, "rejecting query");
        Err(SyncError::Unsupported("find_query"))
    }

    /// Queries are not supported by a tree store.
    pub async fn query(&self, type_name: &str, query: &Value) -> SyncResult<Vec<Value>> {
        debug!(type_name, %query, "rejecting query");
        Err(SyncError::Unsupported("query"))
    }

    /// Writes a new record, allocating its identity if it has none.
    ///
    /// The full payload, identity included, replaces whatever is stored at
    /// the record's location. Returns that location.
    pub async fn create_record(&self, record: &RecordHandle) -> SyncResult<Location> {
        let (location, payload) = {
            let mut record = record.write();
            let location = self.resolver.resolve(&mut record)?;
            let payload = serialize(
                &record,
                SerializeOptions::WITH_ID,
                self.connection().identity_field(),
            );
            (location, payload)
        };
        let store = self.connection().store()?;
        self.write(&location, store.set(&location, Value::Object(payload)))
            .await?;
        debug!(%location, "created");
        Ok(location)
    }

    /// Merges the record's current fields into its remote location.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentity`] if the record was never
    /// created.
    pub async fn update_record(&self, record: &RecordHandle) -> SyncResult<()> {
        let (location, payload) = {
            let record = record.read();
            let location = self.resolver.resolve_existing(&record)?;
            let payload = serialize(
                &record,
                SerializeOptions::WITH_ID,
                self.connection().identity_field(),
            );
            (location, payload)
        };
        let store = self.connection().store()?;
        self.write(&location, store.update(&location, payload)).await?;
        debug!(%location, "updated");
        Ok(())
    }

    /// Deletes the record remotely.
    ///
    /// The record's live binding is disabled before the delete is sent, so
    /// the removal echoed back by the store is never applied locally.
    pub async fn delete_record(&self, record: &RecordHandle) -> SyncResult<()> {
        let location = self.resolver.resolve_existing(&record.read())?;
        self.bindings.disable(record);
        let store = self.connection().store()?;
        self.write(&location, store.remove(&location)).await?;
        debug!(%location, "deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::reconciler::RecordFinder;
    use crate::record::Record;
    use crate::schema::{Schema, TypeSchema};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Weak;
    use treesync_store::{MemoryStore, RemoteStore, StoreError};

    struct NoFinder;

    #[async_trait]
    impl RecordFinder for NoFinder {
        async fn find_related(&self, _: &str, _: &str) -> SyncResult<Option<RecordHandle>> {
            Ok(None)
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        gateway: RemoteGateway,
        schema: Arc<Schema>,
        _finder: Arc<NoFinder>,
    }

    fn fixture(data: Value) -> Fixture {
        let store = Arc::new(MemoryStore::with_data(data).unwrap());
        let connection = Connection::with_store(
            SyncConfig::new("memory://test"),
            Arc::clone(&store) as Arc<dyn RemoteStore>,
        )
        .unwrap();
        let schema = Arc::new(
            Schema::new([
                TypeSchema::new("post", "posts")
                    .attribute("title")
                    .has_many("comments", "comment"),
                TypeSchema::new("comment", "comments"),
            ])
            .unwrap(),
        );
        let resolver = PathResolver::new(Arc::new(connection), Arc::clone(&schema));
        let finder = Arc::new(NoFinder);
        let weak = Arc::downgrade(&finder) as Weak<dyn RecordFinder>;
        let bindings = Arc::new(LiveBindings::new(resolver.clone(), weak));
        Fixture {
            store,
            gateway: RemoteGateway::new(resolver, bindings),
            schema,
            _finder: finder,
        }
    }

    #[tokio::test]
    async fn find_present_and_absent() {
        let f = fixture(json!({"posts": {"p1": {"title": "Hello"}}}));
        assert_eq!(
            f.gateway.find("post", "p1").await.unwrap(),
            Some(json!({"title": "Hello"}))
        );
        assert_eq!(f.gateway.find("post", "p2").await.unwrap(), None);
    }

    #[tokio::test]
    async fn find_many_keeps_input_order() {
        let f = fixture(json!({"posts": {"a": {"n": 1}, "b": {"n": 2}}}));
        let found = f.gateway.find_many("post", &["b", "missing", "a"]).await.unwrap();
        assert_eq!(found, vec![Some(json!({"n": 2})), None, Some(json!({"n": 1}))]);
    }

    #[tokio::test]
    async fn find_many_fails_as_a_whole() {
        let f = fixture(json!({}));
        f.store.set_connected(false);
        assert!(f.gateway.find_many("post", &["a", "b"]).await.is_err());
    }

    #[tokio::test]
    async fn find_all_stamps_identity_in_key_order() {
        let f = fixture(json!({"posts": {"b": {"x": 2}, "a": {"x": 1}, "c": "stray"}}));
        let all = f.gateway.find_all("post").await.unwrap();
        assert_eq!(all, vec![json!({"x": 1, "id": "a"}), json!({"x": 2, "id": "b"})]);

        assert!(f.gateway.find_all("comment").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn queries_are_unsupported() {
        let f = fixture(json!({}));
        let query = json!({"title": "Hello"});
        assert!(matches!(
            f.gateway.find_query("post", &query).await,
            Err(SyncError::Unsupported(_))
        ));
        assert!(matches!(
            f.gateway.query("post", &query).await,
            Err(SyncError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn create_allocates_identity_and_writes_payload() {
        let f = fixture(json!({}));
        let mut record = Record::new(f.schema.get("post").unwrap());
        record.set("title", json!("Hello"));
        let record = record.into_handle();

        let location = f.gateway.create_record(&record).await.unwrap();
        let id = record.read().id().unwrap().to_string();
        assert_eq!(location.to_string(), format!("posts/{id}"));
        assert_eq!(
            f.store.data()["posts"][&id],
            json!({"title": "Hello", "id": id})
        );
    }

    #[tokio::test]
    async fn update_merges_fields() {
        let f = fixture(json!({"posts": {"p1": {"title": "Old", "views": 3}}}));
        let mut record = Record::with_id(f.schema.get("post").unwrap(), "p1");
        record.set("title", json!("New"));
        f.gateway.update_record(&record.into_handle()).await.unwrap();

        assert_eq!(
            f.store.data()["posts"]["p1"],
            json!({"title": "New", "views": 3, "id": "p1"})
        );
    }

    #[tokio::test]
    async fn update_requires_identity() {
        let f = fixture(json!({}));
        let record = Record::new(f.schema.get("post").unwrap()).into_handle();
        assert!(matches!(
            f.gateway.update_record(&record).await,
            Err(SyncError::MissingIdentity { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_remote_data() {
        let f = fixture(json!({"posts": {"p1": {"title": "Hello"}, "p2": {"title": "Keep"}}}));
        let record = Record::with_id(f.schema.get("post").unwrap(), "p1").into_handle();
        f.gateway.delete_record(&record).await.unwrap();
        assert_eq!(f.store.data(), json!({"posts": {"p2": {"title": "Keep"}}}));
    }

    #[tokio::test]
    async fn write_failure_surfaces_in_result_only() {
        let f = fixture(json!({}));
        f.store.fail_writes(Some("permission denied".into()));
        let mut record = Record::with_id(f.schema.get("post").unwrap(), "p1");
        record.set("title", json!("Hello"));
        let record = record.into_handle();
        let revision = record.read().revision();

        let err = f.gateway.create_record(&record).await.unwrap_err();
        assert!(matches!(
            &err,
            SyncError::Write { location, source: StoreError::Rejected(_) }
                if location.to_string() == "posts/p1"
        ));
        assert_eq!(record.read().revision(), revision);
        assert_eq!(record.read().scalar("title"), Some(&json!("Hello")));
        assert_eq!(f.store.data(), Value::Null);
    }
}
