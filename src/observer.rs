//! Observer registry: which listeners watch which container.
//!
//! Listeners are stored type-erased (`Fn()`); the typed wrapper created by
//! [`Injected::observe`](crate::Injected::observe) reads the container's
//! snapshot when called. Notification clones the listener list before calling
//! out, so a listener may subscribe or release observers (its own included)
//! without deadlocking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use papaya::HashMap as PapayaHashMap;
use parking_lot::RwLock;

use crate::arena::NodeId;
use crate::injected::AnyInjected;

pub(crate) type Listener = Arc<dyn Fn() + Send + Sync>;

#[derive(Clone)]
struct ObserverEntry {
    id: u64,
    listener: Listener,
    auto_clean: bool,
}

/// What was left behind after removing an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Removed {
    pub(crate) auto_clean: bool,
    pub(crate) remaining: usize,
}

pub(crate) struct ObserverRegistry {
    // Lock-free map so notification never contends with unrelated containers.
    entries: PapayaHashMap<NodeId, RwLock<Vec<ObserverEntry>>>,
    next_id: AtomicU64,
}

impl ObserverRegistry {
    pub(crate) fn new() -> Self {
        Self {
            entries: PapayaHashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn add(&self, node: NodeId, listener: Listener, auto_clean: bool) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let guard = self.entries.pin();
        guard
            .get_or_insert_with(node, || RwLock::new(Vec::new()))
            .write()
            .push(ObserverEntry {
                id,
                listener,
                auto_clean,
            });
        id
    }

    /// Remove one observer. `None` if it was already gone.
    pub(crate) fn remove(&self, node: NodeId, id: u64) -> Option<Removed> {
        let guard = self.entries.pin();
        let (entry, remaining) = {
            let mut list = guard.get(&node)?.write();
            let position = list.iter().position(|entry| entry.id == id)?;
            let entry = list.remove(position);
            (entry, list.len())
        };
        Some(Removed {
            auto_clean: entry.auto_clean,
            remaining,
        })
    }

    pub(crate) fn count(&self, node: NodeId) -> usize {
        let guard = self.entries.pin();
        guard.get(&node).map_or(0, |list| list.read().len())
    }

    pub(crate) fn clear(&self, node: NodeId) {
        let guard = self.entries.pin();
        guard.remove(&node);
    }

    /// Call every listener of `node` once, in subscription order.
    pub(crate) fn notify(&self, node: NodeId) {
        let listeners: Vec<Listener> = {
            let guard = self.entries.pin();
            match guard.get(&node) {
                Some(list) => list.read().iter().map(|e| e.listener.clone()).collect(),
                None => return,
            }
        };
        for listener in listeners {
            listener();
        }
    }
}

/// Detachable handle returned by [`Injected::observe`](crate::Injected::observe).
///
/// - [`release`](Self::release) removes the observer. If it was the
///   container's last observer and the container auto-disposes, the container
///   is disposed.
/// - Dropping an auto-clean handle releases it, so tying the handle to the
///   lifetime of a UI element unsubscribes that element on teardown.
/// - Dropping a persistent handle (auto-clean off) leaves the observer
///   registered until the container is disposed.
#[must_use = "dropping an auto-clean observer handle unsubscribes it"]
pub struct ObserverHandle {
    node: Weak<dyn AnyInjected>,
    id: u64,
    auto_clean: bool,
    released: bool,
}

impl ObserverHandle {
    pub(crate) fn new(node: Weak<dyn AnyInjected>, id: u64, auto_clean: bool) -> Self {
        Self {
            node,
            id,
            auto_clean,
            released: false,
        }
    }

    /// Whether dropping this handle unsubscribes the observer.
    pub fn is_auto_clean(&self) -> bool {
        self.auto_clean
    }

    /// Unsubscribe now.
    pub fn release(mut self) {
        self.release_inner();
    }

    /// Forget the handle but keep the observer registered.
    pub fn detach(mut self) {
        self.released = true;
    }

    fn release_inner(&mut self) {
        if std::mem::replace(&mut self.released, true) {
            return;
        }
        if let Some(node) = self.node.upgrade() {
            node.release_observer(self.id);
        }
    }
}

impl Drop for ObserverHandle {
    fn drop(&mut self) {
        if self.auto_clean {
            self.release_inner();
        }
    }
}

impl std::fmt::Debug for ObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverHandle")
            .field("id", &self.id)
            .field("auto_clean", &self.auto_clean)
            .field("released", &self.released)
            .finish()
    }
}
