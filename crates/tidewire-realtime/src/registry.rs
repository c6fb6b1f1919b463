//! Per-channel callback registry.
//!
//! Holds the change, broadcast, and presence callbacks registered on a
//! channel along with the filters the server acknowledged on join.
//! Dispatch clones the matching callbacks out under the lock and invokes
//! them after releasing it, so a callback may register or remove
//! callbacks on the same registry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;

use crate::change::ChangeEvent;
use crate::presence::PresenceDiff;
use crate::protocol::ChangeFilter;
use crate::sync::lock;

/// Identifies one registered callback. Unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackId(u64);

impl CallbackId {
    pub fn get(self) -> u64 {
        self.0
    }
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;
pub type BroadcastCallback = Arc<dyn Fn(&Value) + Send + Sync>;
pub type PresenceCallback = Arc<dyn Fn(&PresenceDiff) + Send + Sync>;

#[derive(Clone)]
enum Callback {
    Change {
        filter: ChangeFilter,
        f: ChangeCallback,
    },
    Broadcast {
        event: String,
        f: BroadcastCallback,
    },
    Presence(PresenceCallback),
}

#[derive(Default)]
pub struct CallbackRegistry {
    next_id: AtomicU64,
    callbacks: Mutex<BTreeMap<CallbackId, Callback>>,
    server_filters: Mutex<Vec<ChangeFilter>>,
}

impl std::fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("callbacks", &self.len())
            .field("server_filters", &lock(&self.server_filters).len())
            .finish()
    }
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, callback: Callback) -> CallbackId {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        lock(&self.callbacks).insert(id, callback);
        id
    }

    // -----------------------------------------------------------------------
    // Registration
    // -----------------------------------------------------------------------

    pub fn register_change(&self, filter: ChangeFilter, f: ChangeCallback) -> CallbackId {
        self.insert(Callback::Change { filter, f })
    }

    pub fn register_broadcast(&self, event: impl Into<String>, f: BroadcastCallback) -> CallbackId {
        self.insert(Callback::Broadcast {
            event: event.into(),
            f,
        })
    }

    pub fn register_presence(&self, f: PresenceCallback) -> CallbackId {
        self.insert(Callback::Presence(f))
    }

    /// Returns `true` if the id was registered.
    pub fn unregister(&self, id: CallbackId) -> bool {
        lock(&self.callbacks).remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        lock(&self.callbacks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        lock(&self.callbacks).clear();
        lock(&self.server_filters).clear();
    }

    /// Replace the filters acknowledged by the server on the last join.
    pub fn set_server_filters(&self, filters: Vec<ChangeFilter>) {
        *lock(&self.server_filters) = filters;
    }

    pub fn server_filters(&self) -> Vec<ChangeFilter> {
        lock(&self.server_filters).clone()
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Deliver a row change to every callback whose filter matches one of
    /// the acknowledged filters named by `ids` and accepts the change kind.
    /// Returns the number of callbacks invoked.
    pub fn dispatch_change(&self, ids: &[u64], event: &ChangeEvent) -> usize {
        let targeted: Vec<ChangeFilter> = lock(&self.server_filters)
            .iter()
            .filter(|f| f.id.is_some_and(|id| ids.contains(&id)))
            .cloned()
            .collect();
        if targeted.is_empty() {
            return 0;
        }

        let kind = event.kind();
        let matched: Vec<ChangeCallback> = lock(&self.callbacks)
            .values()
            .filter_map(|cb| match cb {
                Callback::Change { filter, f }
                    if filter.accepts(kind) && targeted.iter().any(|t| filter.matches(t)) =>
                {
                    Some(Arc::clone(f))
                }
                _ => None,
            })
            .collect();

        for f in &matched {
            f(event);
        }
        matched.len()
    }

    pub fn dispatch_broadcast(&self, event: &str, payload: &Value) -> usize {
        let matched: Vec<BroadcastCallback> = lock(&self.callbacks)
            .values()
            .filter_map(|cb| match cb {
                Callback::Broadcast { event: e, f } if e == event => Some(Arc::clone(f)),
                _ => None,
            })
            .collect();

        for f in &matched {
            f(payload);
        }
        matched.len()
    }

    pub fn dispatch_presence(&self, diff: &PresenceDiff) -> usize {
        let matched: Vec<PresenceCallback> = lock(&self.callbacks)
            .values()
            .filter_map(|cb| match cb {
                Callback::Presence(f) => Some(Arc::clone(f)),
                _ => None,
            })
            .collect();

        for f in &matched {
            f(diff);
        }
        matched.len()
    }
}
