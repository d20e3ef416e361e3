//! Child-level change events.

use serde_json::Value;
use tokio::sync::mpsc;

/// Identifier of a registered child listener.
pub type ListenerId = u64;

/// Kind of a child event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A child appeared.
    ChildAdded,
    /// An existing child's value changed.
    ChildChanged,
    /// A child disappeared.
    ChildRemoved,
}

/// A change to one direct child of a subscribed location.
///
/// Events are scoped to a single location and describe its children one
/// level down; for a record location that means one event per field.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildEvent {
    /// A child was added. Delivered once for every child already present
    /// when the subscription starts, then for every later addition.
    Added {
        /// Child key.
        key: String,
        /// Child value.
        value: Value,
        /// Key of the previous sibling in store key order, if any.
        /// Informational only.
        previous: Option<String>,
    },
    /// A child's value changed.
    Changed {
        /// Child key.
        key: String,
        /// New child value.
        value: Value,
    },
    /// A child was removed.
    Removed {
        /// Child key.
        key: String,
    },
}

impl ChildEvent {
    /// Returns the child key the event concerns.
    pub fn key(&self) -> &str {
        match self {
            ChildEvent::Added { key, .. }
            | ChildEvent::Changed { key, .. }
            | ChildEvent::Removed { key } => key,
        }
    }

    /// Returns the event kind.
    pub fn kind(&self) -> EventKind {
        match self {
            ChildEvent::Added { .. } => EventKind::ChildAdded,
            ChildEvent::Changed { .. } => EventKind::ChildChanged,
            ChildEvent::Removed { .. } => EventKind::ChildRemoved,
        }
    }

    /// Returns the new value for added and changed events.
    pub fn value(&self) -> Option<&Value> {
        match self {
            ChildEvent::Added { value, .. } | ChildEvent::Changed { value, .. } => Some(value),
            ChildEvent::Removed { .. } => None,
        }
    }
}

/// A live stream of child events for one location.
///
/// The stream ends once the listener is unsubscribed or the store goes
/// away. Events arrive in the order the store produced them.
#[derive(Debug)]
pub struct ChildEvents {
    id: ListenerId,
    receiver: mpsc::UnboundedReceiver<ChildEvent>,
}

impl ChildEvents {
    /// Wraps a receiver registered under `id`.
    pub fn new(id: ListenerId, receiver: mpsc::UnboundedReceiver<ChildEvent>) -> Self {
        Self { id, receiver }
    }

    /// Returns the listener id to pass to `unsubscribe`.
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Waits for the next event. Returns `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<ChildEvent> {
        self.receiver.recv().await
    }

    /// Returns the next event if one is already queued.
    pub fn try_next(&mut self) -> Option<ChildEvent> {
        self.receiver.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accessors() {
        let added = ChildEvent::Added {
            key: "title".into(),
            value: json!("Hello"),
            previous: None,
        };
        assert_eq!(added.key(), "title");
        assert_eq!(added.kind(), EventKind::ChildAdded);
        assert_eq!(added.value(), Some(&json!("Hello")));

        let removed = ChildEvent::Removed { key: "title".into() };
        assert_eq!(removed.kind(), EventKind::ChildRemoved);
        assert_eq!(removed.value(), None);
    }

    #[tokio::test]
    async fn stream_ends_when_sender_dropped() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut events = ChildEvents::new(3, rx);
        tx.send(ChildEvent::Removed { key: "a".into() }).unwrap();
        drop(tx);

        assert_eq!(events.id(), 3);
        assert_eq!(events.next().await, Some(ChildEvent::Removed { key: "a".into() }));
        assert_eq!(events.next().await, None);
    }
}
