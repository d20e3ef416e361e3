//! In-memory reference store.

use crate::error::{StoreError, StoreResult};
use crate::event::{ChildEvent, ChildEvents, ListenerId};
use crate::location::{validate_segment, Location};
use crate::push_id::PushIdGenerator;
use crate::snapshot::{children_of, compare_keys, Snapshot};
use crate::store::{Connector, RemoteStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// URL scheme accepted by [`MemoryConnector`].
pub const MEMORY_SCHEME: &str = "memory://";

struct Listener {
    id: ListenerId,
    location: Location,
    sender: mpsc::UnboundedSender<ChildEvent>,
}

#[derive(Default)]
struct Inner {
    root: Value,
    listeners: Vec<Listener>,
}

/// An in-memory remote store.
///
/// This store keeps the whole tree in memory and is suitable for:
/// - Unit and integration tests
/// - Local demos and tooling
///
/// It reproduces the observable behavior the engine relies on: `null`
/// and empty objects are never stored, arrays are stored as objects keyed
/// by index, child listeners get an initial `Added` per existing child,
/// and every write produces child-level diffs for the listeners it
/// affects.
///
/// # Example
///
/// ```rust
/// use serde_json::json;
/// use treesync_store::{Location, MemoryStore, RemoteStore};
///
/// # tokio_test_block(async {
/// let store = MemoryStore::new();
/// let post = Location::parse("posts/p1").unwrap();
/// store.set(&post, json!({"title": "Hello"})).await.unwrap();
///
/// let snapshot = store.read_once(&post).await.unwrap();
/// assert_eq!(snapshot.value(), Some(&json!({"title": "Hello"})));
/// # });
/// # fn tokio_test_block<F: std::future::Future>(f: F) -> F::Output {
/// #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
/// # }
/// ```
pub struct MemoryStore {
    inner: RwLock<Inner>,
    next_listener: AtomicU64,
    push_ids: PushIdGenerator,
    connected: AtomicBool,
    write_failure: RwLock<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                root: Value::Null,
                listeners: Vec::new(),
            }),
            next_listener: AtomicU64::new(1),
            push_ids: PushIdGenerator::new(),
            connected: AtomicBool::new(true),
            write_failure: RwLock::new(None),
        }
    }

    /// Creates a store holding `data` at the root.
    pub fn with_data(data: Value) -> StoreResult<Self> {
        let store = Self::new();
        store.inner.write().root = normalize(data)?.unwrap_or(Value::Null);
        Ok(store)
    }

    /// Returns a copy of the whole tree.
    pub fn data(&self) -> Value {
        self.inner.read().root.clone()
    }

    /// Returns the number of registered child listeners.
    pub fn listener_count(&self) -> usize {
        self.inner.read().listeners.len()
    }

    /// Makes every subsequent write fail with `message`, or restores
    /// normal writes when `None`.
    pub fn fail_writes(&self, message: Option<String>) {
        *self.write_failure.write() = message;
    }

    /// Sets the connected state. A disconnected store fails every request.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Returns a connector that hands out this store for `memory://` URLs.
    pub fn connector(self: &Arc<Self>) -> MemoryConnector {
        MemoryConnector {
            store: Arc::clone(self),
        }
    }

    fn check_connected(&self) -> StoreResult<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }

    fn check_writable(&self) -> StoreResult<()> {
        self.check_connected()?;
        match self.write_failure.read().as_ref() {
            Some(message) => Err(StoreError::Rejected(message.clone())),
            None => Ok(()),
        }
    }

    /// Applies a batch of writes atomically and notifies listeners.
    fn apply(&self, writes: Vec<(Location, Option<Value>)>) {
        let mut inner = self.inner.write();
        let Inner { root, listeners } = &mut *inner;

        let affected: Vec<usize> = listeners
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                writes
                    .iter()
                    .any(|(at, _)| l.location.contains(at) || at.contains(&l.location))
            })
            .map(|(i, _)| i)
            .collect();

        let before: Vec<BTreeMap<String, Value>> = affected
            .iter()
            .map(|&i| child_map(root, &listeners[i].location))
            .collect();

        for (location, value) in writes {
            trace!(%location, removed = value.is_none(), "applying write");
            match value {
                Some(value) => set_at(root, location.segments(), value),
                None => remove_at(root, location.segments()),
            }
        }

        let mut closed = Vec::new();
        for (&i, old) in affected.iter().zip(before) {
            let listener = &listeners[i];
            let new = child_map(root, &listener.location);
            for event in diff_children(&old, &new) {
                if listener.sender.send(event).is_err() {
                    closed.push(listener.id);
                    break;
                }
            }
        }
        listeners.retain(|l| !closed.contains(&l.id));
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn read_once(&self, location: &Location) -> StoreResult<Snapshot> {
        self.check_connected()?;
        let inner = self.inner.read();
        let value = get_at(&inner.root, location.segments()).cloned();
        Ok(Snapshot::new(location.clone(), value))
    }

    fn subscribe_children(&self, location: &Location) -> StoreResult<ChildEvents> {
        self.check_connected()?;
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        let (sender, receiver) = mpsc::unbounded_channel();

        let mut inner = self.inner.write();
        let mut previous: Option<String> = None;
        for (key, value) in children_of(get_at(&inner.root, location.segments())) {
            // The receiver is alive; it is returned below.
            let _ = sender.send(ChildEvent::Added {
                key: key.clone(),
                value: value.clone(),
                previous: previous.replace(key),
            });
        }
        inner.listeners.push(Listener {
            id,
            location: location.clone(),
            sender,
        });
        trace!(%location, listener = id, "child listener registered");

        Ok(ChildEvents::new(id, receiver))
    }

    fn unsubscribe(&self, listener: ListenerId) -> StoreResult<()> {
        let mut inner = self.inner.write();
        let before = inner.listeners.len();
        inner.listeners.retain(|l| l.id != listener);
        if inner.listeners.len() == before {
            return Err(StoreError::UnknownListener(listener));
        }
        trace!(listener, "child listener removed");
        Ok(())
    }

    async fn set(&self, location: &Location, value: Value) -> StoreResult<()> {
        self.check_writable()?;
        let value = normalize(value)?;
        self.apply(vec![(location.clone(), value)]);
        Ok(())
    }

    async fn update(&self, location: &Location, values: Map<String, Value>) -> StoreResult<()> {
        self.check_writable()?;
        let mut writes = Vec::with_capacity(values.len());
        for (path, value) in values {
            let mut target = location.clone();
            for segment in path.split('/').filter(|s| !s.is_empty()) {
                target = target.child(segment)?;
            }
            writes.push((target, normalize(value)?));
        }
        if !writes.is_empty() {
            self.apply(writes);
        }
        Ok(())
    }

    fn push_child(&self, parent: &Location) -> StoreResult<Location> {
        parent.child(&self.push_ids.next_id())
    }
}

/// Connector for [`MemoryStore`].
///
/// Every `memory://` URL resolves to the same shared store.
#[derive(Clone)]
pub struct MemoryConnector {
    store: Arc<MemoryStore>,
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str) -> StoreResult<Arc<dyn RemoteStore>> {
        if !url.starts_with(MEMORY_SCHEME) {
            return Err(StoreError::InvalidUrl {
                url: url.to_string(),
                reason: format!("expected a {MEMORY_SCHEME} url"),
            });
        }
        Ok(Arc::clone(&self.store) as Arc<dyn RemoteStore>)
    }
}

/// Drops nulls and empty containers, turns arrays into index-keyed
/// objects and validates keys. Returns `None` if nothing remains.
fn normalize(value: Value) -> StoreResult<Option<Value>> {
    let map = match value {
        Value::Null => return Ok(None),
        Value::Object(map) => map,
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (i.to_string(), v))
            .collect(),
        other => return Ok(Some(other)),
    };

    let mut normalized = Map::new();
    for (key, child) in map {
        validate_segment(&key)?;
        if let Some(child) = normalize(child)? {
            normalized.insert(key, child);
        }
    }
    Ok((!normalized.is_empty()).then_some(Value::Object(normalized)))
}

fn get_at<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut node = root;
    for segment in segments {
        node = node.as_object()?.get(segment)?;
    }
    (!node.is_null()).then_some(node)
}

fn set_at(node: &mut Value, segments: &[String], value: Value) {
    let Some((head, rest)) = segments.split_first() else {
        *node = value;
        return;
    };
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    if let Value::Object(map) = node {
        let child = map.entry(head.clone()).or_insert(Value::Null);
        set_at(child, rest, value);
    }
}

fn remove_at(node: &mut Value, segments: &[String]) {
    let Some((head, rest)) = segments.split_first() else {
        *node = Value::Null;
        return;
    };
    if let Value::Object(map) = node {
        if let Some(child) = map.get_mut(head) {
            remove_at(child, rest);
            if child.is_null() {
                map.remove(head);
            }
        }
        if map.is_empty() {
            *node = Value::Null;
        }
    }
}

fn child_map(root: &Value, location: &Location) -> BTreeMap<String, Value> {
    children_of(get_at(root, location.segments()))
        .into_iter()
        .map(|(k, v)| (k, v.clone()))
        .collect()
}

/// Child events turning `old` into `new`: removals, then additions, then
/// changes, each group in store key order.
fn diff_children(old: &BTreeMap<String, Value>, new: &BTreeMap<String, Value>) -> Vec<ChildEvent> {
    let mut removed: Vec<&String> = old.keys().filter(|k| !new.contains_key(*k)).collect();
    removed.sort_by(|a, b| compare_keys(a, b));
    let mut events: Vec<ChildEvent> = removed
        .into_iter()
        .map(|k| ChildEvent::Removed { key: k.clone() })
        .collect();

    let mut new_keys: Vec<&String> = new.keys().collect();
    new_keys.sort_by(|a, b| compare_keys(a, b));

    let mut changed = Vec::new();
    let mut previous: Option<String> = None;
    for key in new_keys {
        let value = &new[key];
        match old.get(key) {
            None => events.push(ChildEvent::Added {
                key: key.clone(),
                value: value.clone(),
                previous: previous.clone(),
            }),
            Some(old_value) if old_value != value => changed.push(ChildEvent::Changed {
                key: key.clone(),
                value: value.clone(),
            }),
            Some(_) => {}
        }
        previous = Some(key.clone());
    }
    events.extend(changed);
    events
}
