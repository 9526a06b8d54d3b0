use parking_lot::Mutex;

use crate::arena::NodeId;
use crate::error::ConfigError;
use crate::graph;
use crate::hash::NodeSet;
use crate::runtime::RuntimeInner;

/// Per-runtime batch depth plus the origins whose propagation was deferred.
#[derive(Default)]
pub(crate) struct BatchState {
    inner: Mutex<Pending>,
}

#[derive(Default)]
struct Pending {
    depth: usize,
    origins: NodeSet<NodeId>,
}

impl BatchState {
    /// Queue `origins` if a batch is open. Returns `false` when propagation
    /// should run right away.
    pub(crate) fn defer(&self, origins: &NodeSet<NodeId>) -> bool {
        let mut pending = self.inner.lock();
        if pending.depth == 0 {
            return false;
        }
        pending.origins.extend(origins.iter().copied());
        true
    }

    pub(crate) fn is_active(&self) -> bool {
        self.inner.lock().depth > 0
    }

    fn enter(&self) {
        self.inner.lock().depth += 1;
    }

    /// Leave one level. The outermost exit hands back the queued origins.
    fn exit(&self) -> Option<NodeSet<NodeId>> {
        let mut pending = self.inner.lock();
        pending.depth = pending.depth.saturating_sub(1);
        (pending.depth == 0).then(|| std::mem::take(&mut pending.origins))
    }
}

/// RAII guard that closes the batch even if the closure panics.
///
/// On the normal path [`close`](Self::close) runs the deferred propagation
/// and reports its error. During unwinding `Drop` still flushes, logging any
/// error instead.
pub(crate) struct BatchGuard<'a> {
    runtime: &'a RuntimeInner,
    open: bool,
}

impl<'a> BatchGuard<'a> {
    pub(crate) fn open(runtime: &'a RuntimeInner) -> Self {
        runtime.batch.enter();
        Self {
            runtime,
            open: true,
        }
    }

    pub(crate) fn close(mut self) -> Result<(), ConfigError> {
        self.open = false;
        flush(self.runtime)
    }
}

impl Drop for BatchGuard<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(error) = flush(self.runtime) {
                tracing::warn!(%error, "propagation after aborted batch failed");
            }
        }
    }
}

fn flush(runtime: &RuntimeInner) -> Result<(), ConfigError> {
    match runtime.batch.exit() {
        Some(origins) if !origins.is_empty() => {
            tracing::trace!(origins = origins.len(), "flushing batch");
            graph::propagate(runtime, origins)
        }
        _ => Ok(()),
    }
}
