// Node arena - storage for per-container graph metadata
//
// Every container owns one slot. The slot keeps:
// - a weak, type-erased pointer back to the container (the typed value lives
//   in the container, not in the arena)
// - the container's upstream set (sources) and dependent set
// - a debug label used in cycle reports and tracing
//
// Edges are always stored on both ends. Every mutation goes through
// `link`/`unlink_sources`/`remove` so the two sides stay in sync.

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use slab::Slab;

use crate::hash::NodeSet;
use crate::injected::AnyInjected;

/// Unique identifier for a container inside its runtime.
///
/// This is a zero-cost wrapper around a slab index. Ids of dropped
/// containers are recycled, so an id is only meaningful while its container
/// is alive.
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) fn new(index: u32) -> Self {
        Self(index)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub(crate) struct NodeMetadata {
    pub(crate) node: Weak<dyn AnyInjected>,
    pub(crate) label: Arc<str>,
    /// Containers this one reads (upstream).
    pub(crate) sources: NodeSet<NodeId>,
    /// Containers that read this one (downstream).
    pub(crate) dependents: NodeSet<NodeId>,
}

#[derive(Default)]
pub(crate) struct NodeArena {
    slots: RwLock<Slab<NodeMetadata>>,
}

impl NodeArena {
    /// Allocate a slot. `init` receives the id so the label can mention it.
    pub(crate) fn insert_with(&self, init: impl FnOnce(NodeId) -> NodeMetadata) -> NodeId {
        let mut slots = self.slots.write();
        let entry = slots.vacant_entry();
        let id = NodeId::new(entry.key() as u32);
        entry.insert(init(id));
        id
    }

    /// Free a slot, detaching it from every neighbour first.
    pub(crate) fn remove(&self, id: NodeId) {
        let mut slots = self.slots.write();
        let Some(metadata) = slots.try_remove(id.index()) else {
            return;
        };
        for source in metadata.sources {
            if let Some(upstream) = slots.get_mut(source.index()) {
                upstream.dependents.swap_remove(&id);
            }
        }
        for dependent in metadata.dependents {
            if let Some(downstream) = slots.get_mut(dependent.index()) {
                downstream.sources.swap_remove(&id);
            }
        }
    }

    pub(crate) fn with<R>(&self, id: NodeId, f: impl FnOnce(&NodeMetadata) -> R) -> Option<R> {
        let slots = self.slots.read();
        slots.get(id.index()).map(f)
    }

    /// Upgrade the type-erased container pointer.
    pub(crate) fn node(&self, id: NodeId) -> Option<Arc<dyn AnyInjected>> {
        self.with(id, |metadata| metadata.node.upgrade()).flatten()
    }

    pub(crate) fn label(&self, id: NodeId) -> String {
        self.with(id, |metadata| metadata.label.to_string())
            .unwrap_or_else(|| id.to_string())
    }

    pub(crate) fn sources(&self, id: NodeId) -> Vec<NodeId> {
        self.with(id, |metadata| metadata.sources.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn dependents(&self, id: NodeId) -> Vec<NodeId> {
        self.with(id, |metadata| metadata.dependents.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_dependents(&self, id: NodeId) -> bool {
        self.with(id, |metadata| !metadata.dependents.is_empty())
            .unwrap_or(false)
    }

    /// Record `dependent -> upstream`. Returns `false` if the edge existed.
    pub(crate) fn link(&self, dependent: NodeId, upstream: NodeId) -> bool {
        let mut slots = self.slots.write();
        if !slots.contains(dependent.index()) || !slots.contains(upstream.index()) {
            return false;
        }
        let inserted = slots[dependent.index()].sources.insert(upstream);
        if inserted {
            slots[upstream.index()].dependents.insert(dependent);
        }
        inserted
    }

    /// Drop every upstream edge of `id`, returning the former sources.
    pub(crate) fn unlink_sources(&self, id: NodeId) -> Vec<NodeId> {
        let mut slots = self.slots.write();
        let Some(metadata) = slots.get_mut(id.index()) else {
            return Vec::new();
        };
        let sources: Vec<NodeId> = metadata.sources.drain(..).collect();
        for source in &sources {
            if let Some(upstream) = slots.get_mut(source.index()) {
                upstream.dependents.swap_remove(&id);
            }
        }
        sources
    }

    /// Every container still alive, in slot order.
    pub(crate) fn live_nodes(&self) -> Vec<Arc<dyn AnyInjected>> {
        let slots = self.slots.read();
        slots
            .iter()
            .filter_map(|(_, metadata)| metadata.node.upgrade())
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.read().len()
    }
}
