//! Live bindings: reconciling remote child events into local records.
//!
//! Each live record owns one [`LiveBinding`]. Subscribing opens a child
//! event stream on the record's location and spawns a task that drains it
//! in arrival order, so events for one record are applied in the order the
//! store delivered them.
//!
//! Reconciliation rules:
//! - The identity key is never reconciled
//! - Relationship fields are additive: each referenced identity missing
//!   locally is fetched through the [`RecordFinder`] and appended
//! - Scalar fields are assigned only when the remote value differs
//! - A removed key empties the field, whatever its kind
//! - A disabled binding ignores everything

use crate::connection::Connection;
use crate::error::{SyncError, SyncResult};
use crate::path::PathResolver;
use crate::record::{RecordHandle, RelatedRecord};
use crate::schema::{RelationshipDescriptor, Schema};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};
use treesync_store::{ChildEvent, ChildEvents, ListenerId, Location};

/// Finds related records on behalf of a live binding.
#[async_trait]
pub trait RecordFinder: Send + Sync {
    /// Finds the `type_name` record `id`, loading it if needed.
    ///
    /// Returns `Ok(None)` if no such record exists.
    async fn find_related(&self, type_name: &str, id: &str) -> SyncResult<Option<RecordHandle>>;
}

/// Subscription state of a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingState {
    /// Created, not listening yet.
    Unsubscribed,
    /// Listening for child events.
    Subscribed,
    /// Stopped for good.
    Disabled,
}

impl BindingState {
    /// Returns true if events are still applied in this state.
    pub fn is_active(&self) -> bool {
        !matches!(self, BindingState::Disabled)
    }
}

/// What handling one event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The record was mutated.
    Applied,
    /// The record already matched the event.
    Unchanged,
    /// This many related records are being fetched and will be appended
    /// when they arrive.
    Fetching(usize),
    /// The binding is disabled.
    Ignored,
}

#[derive(Default)]
struct FetchTracking {
    /// Fetches in flight, keyed by `(field, id)`, with the field
    /// generation they were started in.
    in_flight: HashMap<(String, String), u64>,
    /// Bumped whenever a relationship field is emptied; fetches started in
    /// an older generation are discarded.
    generations: HashMap<String, u64>,
}

impl FetchTracking {
    fn generation(&self, field: &str) -> u64 {
        self.generations.get(field).copied().unwrap_or(0)
    }
}

/// Keeps one record in sync with its remote location.
pub struct LiveBinding {
    record: RecordHandle,
    type_name: String,
    id: String,
    location: Location,
    connection: Arc<Connection>,
    schema: Arc<Schema>,
    finder: Weak<dyn RecordFinder>,
    state: Mutex<BindingState>,
    listener: Mutex<Option<ListenerId>>,
    disabled: AtomicBool,
    tracking: Mutex<FetchTracking>,
}

impl LiveBinding {
    /// Creates an unsubscribed binding for `record`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::MissingIdentity`] if the record has no identity
    /// and [`SyncError::UnknownType`] if its type is not registered.
    pub fn new(
        record: RecordHandle,
        resolver: &PathResolver,
        finder: Weak<dyn RecordFinder>,
    ) -> SyncResult<Arc<Self>> {
        let (type_name, id, location) = {
            let guard = record.read();
            let location = resolver.resolve_existing(&guard)?;
            // resolve_existing fails without an identity.
            let id = guard.id().unwrap_or_default().to_string();
            (guard.type_name().to_string(), id, location)
        };
        Ok(Arc::new(Self {
            record,
            type_name,
            id,
            location,
            connection: Arc::clone(resolver.connection()),
            schema: Arc::clone(resolver.schema()),
            finder,
            state: Mutex::new(BindingState::Unsubscribed),
            listener: Mutex::new(None),
            disabled: AtomicBool::new(false),
            tracking: Mutex::new(FetchTracking::default()),
        }))
    }

    /// Returns the bound record.
    pub fn record(&self) -> &RecordHandle {
        &self.record
    }

    /// Returns the bound record's location.
    pub fn location(&self) -> &Location {
        &self.location
    }

    /// Returns the current state.
    pub fn state(&self) -> BindingState {
        *self.state.lock()
    }

    /// Returns true once disabled.
    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    /// Returns the number of relationship fetches still in flight.
    pub fn pending_fetches(&self) -> usize {
        self.tracking.lock().in_flight.len()
    }

    /// Starts listening for changes at the record's location.
    ///
    /// Subscribing an already subscribed binding does nothing. Must be
    /// called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidStateTransition`] if the binding is
    /// disabled, or the store error if the listener cannot be registered.
    pub fn subscribe(self: &Arc<Self>) -> SyncResult<()> {
        let mut state = self.state.lock();
        match *state {
            BindingState::Subscribed => return Ok(()),
            BindingState::Disabled => {
                return Err(SyncError::InvalidStateTransition {
                    from: format!("{:?}", BindingState::Disabled),
                    to: format!("{:?}", BindingState::Subscribed),
                })
            }
            BindingState::Unsubscribed => {}
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SyncError::config("live bindings require a tokio runtime"))?;
        let events = self
            .connection
            .store()?
            .subscribe_children(&self.location)?;
        *self.listener.lock() = Some(events.id());
        *state = BindingState::Subscribed;
        drop(state);

        debug!(location = %self.location, listener = events.id(), "subscribed");
        runtime.spawn(Arc::clone(self).drain(events));
        Ok(())
    }

    async fn drain(self: Arc<Self>, mut events: ChildEvents) {
        while let Some(event) = events.next().await {
            if self.is_disabled() {
                break;
            }
            self.handle(event);
        }
        trace!(location = %self.location, "event stream closed");
    }

    /// Stops the binding for good.
    ///
    /// The disabled flag is raised before the store listener is removed, so
    /// events still queued are ignored. Disabling twice does nothing.
    pub fn disable(&self) {
        if self.disabled.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.state.lock() = BindingState::Disabled;
        self.tracking.lock().in_flight.clear();

        let Some(listener) = self.listener.lock().take() else {
            debug!(location = %self.location, "disabled before subscribing");
            return;
        };
        match self.connection.store() {
            Ok(store) => {
                if let Err(e) = store.unsubscribe(listener) {
                    debug!(location = %self.location, error = %e, "unsubscribe failed");
                }
            }
            Err(e) => debug!(location = %self.location, error = %e, "store unavailable on disable"),
        }
        debug!(location = %self.location, "disabled");
    }

    /// Applies one child event to the record.
    pub fn handle(self: &Arc<Self>, event: ChildEvent) -> EventOutcome {
        if self.is_disabled() {
            trace!(location = %self.location, key = event.key(), "ignoring event on disabled binding");
            return EventOutcome::Ignored;
        }
        if event.key() == self.connection.identity_field() {
            return EventOutcome::Unchanged;
        }
        trace!(location = %self.location, key = event.key(), kind = ?event.kind(), "child event");

        match event {
            ChildEvent::Added { key, value, .. } | ChildEvent::Changed { key, value } => {
                match self.schema.classify(&self.type_name, &key) {
                    Some(relationship) => self.reconcile_relationship(relationship, &value),
                    None => self.reconcile_scalar(&key, value),
                }
            }
            ChildEvent::Removed { key } => self.reconcile_removal(&key),
        }
    }

    fn reconcile_scalar(&self, key: &str, value: Value) -> EventOutcome {
        let mut record = self.record.write();
        if record.scalar(key) == Some(&value) {
            return EventOutcome::Unchanged;
        }
        record.set(key, value);
        EventOutcome::Applied
    }

    fn reconcile_removal(&self, key: &str) -> EventOutcome {
        let mut tracking = self.tracking.lock();
        if self.schema.classify(&self.type_name, key).is_some() {
            *tracking.generations.entry(key.to_string()).or_insert(0) += 1;
            tracking.in_flight.retain(|(field, _), _| field != key);
        }
        if self.record.write().clear(key) {
            EventOutcome::Applied
        } else {
            EventOutcome::Unchanged
        }
    }

    fn reconcile_relationship(
        self: &Arc<Self>,
        relationship: &RelationshipDescriptor,
        value: &Value,
    ) -> EventOutcome {
        let field = &relationship.field;
        let mut to_fetch = Vec::new();
        {
            let mut tracking = self.tracking.lock();
            let generation = tracking.generation(field);
            let record = self.record.read();
            for id in related_ids(&self.location, field, value) {
                let linked = record
                    .relation(field)
                    .is_some_and(|state| state.contains(&id));
                let key = (field.clone(), id);
                if linked || tracking.in_flight.contains_key(&key) {
                    continue;
                }
                tracking.in_flight.insert(key.clone(), generation);
                to_fetch.push((key.1, generation));
            }
        }

        if to_fetch.is_empty() {
            return EventOutcome::Unchanged;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(location = %self.location, "no runtime to fetch related records on");
            let mut tracking = self.tracking.lock();
            for (id, _) in &to_fetch {
                tracking.in_flight.remove(&(field.clone(), id.clone()));
            }
            return EventOutcome::Unchanged;
        };

        let count = to_fetch.len();
        for (id, generation) in to_fetch {
            let binding = Arc::clone(self);
            let field = field.clone();
            let related_type = relationship.related_type.clone();
            runtime.spawn(async move {
                binding.fetch_and_link(field, related_type, id, generation).await;
            });
        }
        EventOutcome::Fetching(count)
    }

    async fn fetch_and_link(&self, field: String, related_type: String, id: String, generation: u64) {
        let result = match self.finder.upgrade() {
            Some(finder) => finder.find_related(&related_type, &id).await,
            None => Ok(None),
        };

        let mut tracking = self.tracking.lock();
        let key = (field, id);
        if tracking.in_flight.get(&key) == Some(&generation) {
            tracking.in_flight.remove(&key);
        }
        let (field, id) = key;
        if self.is_disabled() || tracking.generation(&field) != generation {
            trace!(location = %self.location, %field, %id, "discarding stale fetch");
            return;
        }

        match result {
            Ok(Some(related)) => {
                if self.record.write().link(&field, RelatedRecord { id, record: related }) {
                    trace!(location = %self.location, %field, "linked related record");
                }
            }
            Ok(None) => debug!(location = %self.location, %field, %id, "related record not found"),
            Err(e) => debug!(location = %self.location, %field, %id, error = %e, "related fetch failed"),
        }
    }
}

/// Extracts the identities referenced by a relationship value.
fn related_ids(location: &Location, field: &str, value: &Value) -> Vec<String> {
    let entries: Vec<&Value> = match value {
        Value::Object(map) => map.values().collect(),
        Value::Array(items) => items.iter().collect(),
        other => vec![other],
    };
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            Value::String(id) if !id.is_empty() => Some(id.clone()),
            Value::Number(n) => Some(n.to_string()),
            other => {
                warn!(%location, field, entry = %other, "skipping non-identity relationship entry");
                None
            }
        })
        .collect()
}

impl fmt::Debug for LiveBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBinding")
            .field("type_name", &self.type_name)
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;
    use crate::record::{Record, RelationState};
    use crate::schema::TypeSchema;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;
    use treesync_store::{MemoryStore, RemoteStore, StoreError};

    #[derive(Default)]
    struct StubFinder {
        records: Mutex<HashMap<String, RecordHandle>>,
        calls: AtomicUsize,
        gate: Option<Arc<Notify>>,
        fail: AtomicBool,
    }

    impl StubFinder {
        fn with_comments(ids: &[&str]) -> Self {
            let finder = Self::default();
            let schema = TypeSchema::new("comment", "comments");
            for id in ids {
                finder
                    .records
                    .lock()
                    .insert(id.to_string(), Record::with_id(&schema, *id).into_handle());
            }
            finder
        }
    }

    #[async_trait]
    impl RecordFinder for StubFinder {
        async fn find_related(&self, _type_name: &str, id: &str) -> SyncResult<Option<RecordHandle>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(SyncError::Store(StoreError::Disconnected));
            }
            Ok(self.records.lock().get(id).cloned())
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        binding: Arc<LiveBinding>,
        record: RecordHandle,
        finder: Arc<StubFinder>,
    }

    fn fixture(finder: StubFinder) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let connection = Connection::with_store(
            SyncConfig::new("memory://test"),
            Arc::clone(&store) as Arc<dyn RemoteStore>,
        )
        .unwrap();
        let schema = Schema::new([
            TypeSchema::new("post", "posts")
                .attribute("title")
                .has_many("comments", "comment"),
            TypeSchema::new("comment", "comments"),
        ])
        .unwrap();
        let resolver = PathResolver::new(Arc::new(connection), Arc::new(schema));
        let record = Record::with_id(resolver.schema().get("post").unwrap(), "p1").into_handle();
        let finder = Arc::new(finder);
        let weak = Arc::downgrade(&finder) as Weak<dyn RecordFinder>;
        let binding = LiveBinding::new(Arc::clone(&record), &resolver, weak).unwrap();
        Fixture {
            store,
            binding,
            record,
            finder,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not met in time");
    }

    fn changed(key: &str, value: Value) -> ChildEvent {
        ChildEvent::Changed {
            key: key.into(),
            value,
        }
    }

    #[tokio::test]
    async fn scalar_assigned_only_when_different() {
        let f = fixture(StubFinder::default());

        assert_eq!(f.binding.handle(changed("title", json!("Hello"))), EventOutcome::Applied);
        let revision = f.record.read().revision();

        assert_eq!(f.binding.handle(changed("title", json!("Hello"))), EventOutcome::Unchanged);
        assert_eq!(f.record.read().revision(), revision);
        assert_eq!(f.record.read().scalar("title"), Some(&json!("Hello")));
    }

    #[tokio::test]
    async fn identity_key_is_never_reconciled() {
        let f = fixture(StubFinder::default());
        assert_eq!(f.binding.handle(changed("id", json!("other"))), EventOutcome::Unchanged);
        assert_eq!(f.record.read().id(), Some("p1"));
        assert!(f.record.read().get("id").is_none());
    }

    #[tokio::test]
    async fn removal_empties_any_field() {
        let f = fixture(StubFinder::with_comments(&["c1"]));
        f.binding.handle(changed("title", json!("Hello")));
        f.binding.handle(changed("comments", json!({"c1": "c1"})));
        wait_until(|| f.record.read().relation("comments").unwrap().len() == 1).await;

        let removed = |key: &str| ChildEvent::Removed { key: key.into() };
        assert_eq!(f.binding.handle(removed("title")), EventOutcome::Applied);
        assert_eq!(f.binding.handle(removed("comments")), EventOutcome::Applied);
        assert_eq!(f.binding.handle(removed("title")), EventOutcome::Unchanged);

        let record = f.record.read();
        assert!(record.get("title").is_none());
        assert!(matches!(record.relation("comments"), Some(RelationState::Empty)));
    }

    #[tokio::test]
    async fn relationship_fetches_missing_identities_once() {
        let gate = Arc::new(Notify::new());
        let finder = StubFinder {
            gate: Some(Arc::clone(&gate)),
            ..StubFinder::with_comments(&["c1"])
        };
        let f = fixture(finder);

        assert_eq!(
            f.binding.handle(changed("comments", json!({"c1": "c1"}))),
            EventOutcome::Fetching(1)
        );
        // Same identity while the first fetch is in flight.
        assert_eq!(
            f.binding.handle(changed("comments", json!({"c1": "c1"}))),
            EventOutcome::Unchanged
        );

        gate.notify_one();
        wait_until(|| f.record.read().relation("comments").unwrap().len() == 1).await;
        assert_eq!(f.finder.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.binding.pending_fetches(), 0);

        assert_eq!(
            f.binding.handle(changed("comments", json!({"c1": "c1"}))),
            EventOutcome::Unchanged
        );
        assert_eq!(f.record.read().relation("comments").unwrap().ids(), vec!["c1"]);
    }

    #[tokio::test]
    async fn links_made_while_loading_are_buffered_then_merged() {
        let f = fixture(StubFinder::with_comments(&["c1", "c2"]));
        f.record.write().begin_loading("comments");

        assert_eq!(
            f.binding.handle(changed("comments", json!({"c1": "c1"}))),
            EventOutcome::Fetching(1)
        );
        wait_until(|| f.binding.pending_fetches() == 0).await;
        {
            let record = f.record.read();
            let comments = record.relation("comments").unwrap();
            assert!(comments.is_loading());
            assert_eq!(comments.ids(), vec!["c1"]);
        }

        let related = |id: &str| RelatedRecord {
            id: id.to_string(),
            record: f.finder.records.lock()[id].clone(),
        };
        f.record
            .write()
            .finish_loading("comments", vec![related("c2"), related("c1")]);

        let record = f.record.read();
        let comments = record.relation("comments").unwrap();
        assert!(matches!(comments, RelationState::Loaded(_)));
        assert_eq!(comments.ids(), vec!["c2", "c1"]);
        drop(record);
        assert_eq!(
            f.binding.handle(changed("comments", json!({"c1": "c1", "c2": "c2"}))),
            EventOutcome::Unchanged
        );
    }

    #[tokio::test]
    async fn non_identity_entries_are_skipped() {
        let f = fixture(StubFinder::with_comments(&["c1", "7"]));
        let outcome = f
            .binding
            .handle(changed("comments", json!({"a": "c1", "b": {"nested": true}, "c": 7})));
        assert_eq!(outcome, EventOutcome::Fetching(2));
        wait_until(|| f.record.read().relation("comments").unwrap().len() == 2).await;
    }

    #[tokio::test]
    async fn failed_and_missing_fetches_are_dropped() {
        let f = fixture(StubFinder::with_comments(&[]));
        assert_eq!(
            f.binding.handle(changed("comments", json!(["ghost"]))),
            EventOutcome::Fetching(1)
        );
        wait_until(|| f.binding.pending_fetches() == 0).await;

        f.finder.fail.store(true, Ordering::SeqCst);
        f.binding.handle(changed("comments", json!(["ghost"])));
        wait_until(|| f.binding.pending_fetches() == 0).await;

        assert!(f.record.read().relation("comments").unwrap().is_empty());
        assert_eq!(f.finder.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn removal_discards_fetch_in_flight() {
        let gate = Arc::new(Notify::new());
        let finder = StubFinder {
            gate: Some(Arc::clone(&gate)),
            ..StubFinder::with_comments(&["c1"])
        };
        let f = fixture(finder);

        f.binding.handle(changed("comments", json!({"c1": "c1"})));
        f.binding.handle(ChildEvent::Removed {
            key: "comments".into(),
        });
        gate.notify_one();

        wait_until(|| f.finder.calls.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(f.record.read().relation("comments").unwrap().is_empty());
    }

    #[tokio::test]
    async fn fetch_completing_after_disable_is_discarded() {
        let gate = Arc::new(Notify::new());
        let finder = StubFinder {
            gate: Some(Arc::clone(&gate)),
            ..StubFinder::with_comments(&["c1"])
        };
        let f = fixture(finder);

        f.binding.handle(changed("comments", json!({"c1": "c1"})));
        let revision = f.record.read().revision();
        f.binding.disable();
        gate.notify_one();

        wait_until(|| f.finder.calls.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(f.record.read().revision(), revision);
    }

    #[tokio::test]
    async fn disabled_binding_ignores_events() {
        let f = fixture(StubFinder::default());
        f.binding.subscribe().unwrap();
        assert_eq!(f.store.listener_count(), 1);

        f.binding.disable();
        f.binding.disable();
        assert_eq!(f.binding.state(), BindingState::Disabled);
        assert_eq!(f.store.listener_count(), 0);

        assert_eq!(f.binding.handle(changed("title", json!("late"))), EventOutcome::Ignored);
        assert!(f.record.read().get("title").is_none());
        assert!(matches!(
            f.binding.subscribe(),
            Err(SyncError::InvalidStateTransition { .. })
        ));
    }

    #[tokio::test]
    async fn subscribe_is_idempotent() {
        let f = fixture(StubFinder::default());
        f.binding.subscribe().unwrap();
        f.binding.subscribe().unwrap();
        assert_eq!(f.binding.state(), BindingState::Subscribed);
        assert_eq!(f.store.listener_count(), 1);
    }

    #[tokio::test]
    async fn remote_writes_are_applied_in_order() {
        let f = fixture(StubFinder::default());
        let location = Location::parse("posts/p1").unwrap();
        f.store.set(&location, json!({"title": "first"})).await.unwrap();
        f.binding.subscribe().unwrap();

        for title in ["second", "third", "fourth"] {
            let mut values = serde_json::Map::new();
            values.insert("title".into(), json!(title));
            f.store.update(&location, values).await.unwrap();
        }

        wait_until(|| f.record.read().scalar("title") == Some(&json!("fourth"))).await;
        assert_eq!(f.record.read().revision(), 4);
    }

    #[test]
    fn subscribe_outside_runtime_fails() {
        let f = fixture(StubFinder::default());
        assert!(matches!(f.binding.subscribe(), Err(SyncError::Config(_))));
        assert_eq!(f.binding.state(), BindingState::Unsubscribed);
    }
}
