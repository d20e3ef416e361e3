//! Registry of live bindings, driven by record lifecycle events.

use crate::error::SyncResult;
use crate::path::PathResolver;
use crate::reconciler::{LiveBinding, RecordFinder};
use crate::record::RecordHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::trace;

/// Record lifecycle events emitted by the persistence layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The record was materialized from remote data.
    Loaded,
    /// The record was created remotely.
    Created,
    /// The record is about to be deleted.
    WillDelete,
}

type BindingKey = (String, String);

/// Owns one [`LiveBinding`] per live record, keyed by type and identity.
pub struct LiveBindings {
    resolver: PathResolver,
    finder: Weak<dyn RecordFinder>,
    bindings: Mutex<HashMap<BindingKey, Arc<LiveBinding>>>,
}

impl LiveBindings {
    /// Creates an empty registry.
    pub fn new(resolver: PathResolver, finder: Weak<dyn RecordFinder>) -> Self {
        Self {
            resolver,
            finder,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Reacts to a lifecycle event of `record`.
    ///
    /// `Loaded` and `Created` subscribe records of live types;
    /// `WillDelete` disables the record's binding. A record whose binding
    /// was disabled stays unsubscribed whatever events follow.
    pub fn on_lifecycle(&self, record: &RecordHandle, event: Lifecycle) -> SyncResult<()> {
        match event {
            Lifecycle::Loaded | Lifecycle::Created => {
                let type_name = record.read().type_name().to_string();
                if !self.resolver.schema().get(&type_name)?.live {
                    trace!(%type_name, ?event, "type is not live");
                    return Ok(());
                }
                let binding = self.attach(record)?;
                if binding.is_disabled() {
                    trace!(location = %binding.location(), ?event, "binding already disabled");
                    return Ok(());
                }
                binding.subscribe()
            }
            Lifecycle::WillDelete => {
                self.disable(record);
                Ok(())
            }
        }
    }

    /// Returns the binding of `record`, creating an unsubscribed one if
    /// there is none.
    ///
    /// The disabled binding of the same handle is returned as is. A
    /// disabled binding left by another handle with the same identity is
    /// replaced.
    pub fn attach(&self, record: &RecordHandle) -> SyncResult<Arc<LiveBinding>> {
        if let Some(key) = key_of(record) {
            if let Some(binding) = self.bindings.lock().get(&key) {
                if !binding.is_disabled() || Arc::ptr_eq(binding.record(), record) {
                    return Ok(Arc::clone(binding));
                }
            }
        }

        let binding = LiveBinding::new(Arc::clone(record), &self.resolver, self.finder.clone())?;
        // LiveBinding::new fails without an identity.
        let Some(key) = key_of(record) else {
            return Ok(binding);
        };
        let mut bindings = self.bindings.lock();
        match bindings.get(&key) {
            Some(existing) if !existing.is_disabled() || Arc::ptr_eq(existing.record(), record) => {
                Ok(Arc::clone(existing))
            }
            _ => {
                bindings.insert(key, Arc::clone(&binding));
                Ok(binding)
            }
        }
    }

    /// Returns the binding for the `type_name` record `id`.
    pub fn get(&self, type_name: &str, id: &str) -> Option<Arc<LiveBinding>> {
        self.bindings
            .lock()
            .get(&(type_name.to_string(), id.to_string()))
            .cloned()
    }

    /// Disables the binding of `record`, if any.
    ///
    /// The disabled binding stays registered, so later lifecycle events
    /// for the same record cannot subscribe it again.
    pub fn disable(&self, record: &RecordHandle) {
        let Some(key) = key_of(record) else {
            return;
        };
        let binding = self.bindings.lock().get(&key).cloned();
        if let Some(binding) = binding {
            binding.disable();
        }
    }

    /// Disables every binding.
    pub fn disable_all(&self) {
        let bindings: Vec<_> = self.bindings.lock().values().cloned().collect();
        for binding in bindings {
            binding.disable();
        }
    }

    /// Number of bindings that are not disabled.
    pub fn len(&self) -> usize {
        self.bindings
            .lock()
            .values()
            .filter(|binding| !binding.is_disabled())
            .count()
    }

    /// Returns true if every binding is disabled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn key_of(record: &RecordHandle) -> Option<BindingKey> {
    let record = record.read();
    Some((record.type_name().to_string(), record.id()?.to_string()))
}
