use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, Stream, StreamExt};
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::arena::{
    EvaluationGuard, Frame, NodeId, NodeMetadata, RuntimeKey, current_frame, untracked,
};
use crate::async_adapter::{self, InFlight, Settle};
use crate::error::{ConfigError, Escaped, ReadError, StateError, classify};
use crate::gate::{Gate, GateState, OnChange, OnElapsed};
use crate::graph::{self, Upstream};
use crate::observer::{Listener, ObserverHandle};
use crate::runtime::{Runtime, RuntimeInner};
use crate::side_effects::SideEffects;
use crate::snapshot::{ErrorSnapshot, Snapshot, Status};

/// Bound shared by every value a container can hold.
///
/// Equality decides whether a write or a recomputation is a real transition;
/// `Clone` hands values out of the container without holding its lock.
pub trait Value: Clone + PartialEq + Send + Sync + 'static {}

impl<T> Value for T where T: Clone + PartialEq + Send + Sync + 'static {}

/// Type-erased view of a container, used by the graph and the observer
/// registry which do not know `T`.
pub(crate) trait AnyInjected: Send + Sync + 'static {
    fn id(&self) -> NodeId;
    fn runtime_key(&self) -> RuntimeKey;
    fn label(&self) -> Arc<str>;
    fn status(&self) -> Status;
    fn error_snapshot(&self) -> Option<ErrorSnapshot>;
    fn is_initialized(&self) -> bool;
    fn auto_disposes(&self) -> bool;
    /// Lazy first evaluation. No-op once initialized.
    fn initialize(&self) -> Result<(), ConfigError>;
    /// React to an upstream transition. Returns `true` if this container's
    /// snapshot changed as a result.
    fn on_upstream_changed(&self) -> Result<bool, ConfigError>;
    fn dispose(&self);
    fn release_observer(&self, observer: u64);
}

/// Creation function of a container.
pub(crate) enum Body<T> {
    Sync(Box<dyn Fn() -> anyhow::Result<T> + Send + Sync>),
    Future(Box<dyn Fn() -> BoxFuture<'static, anyhow::Result<T>> + Send + Sync>),
    Stream(Box<dyn Fn() -> BoxStream<'static, anyhow::Result<T>> + Send + Sync>),
}

impl<T: Value> Body<T> {
    pub(crate) fn sync<F>(body: F) -> Self
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Body::Sync(Box::new(body))
    }

    pub(crate) fn future<F, Fut>(body: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Body::Future(Box::new(move || body().boxed()))
    }

    pub(crate) fn stream<F, S>(body: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        Body::Stream(Box::new(move || body().boxed()))
    }
}

/// Per-container options collected by the builder.
pub(crate) struct Options<T> {
    pub(crate) label: Option<String>,
    /// `None` means dependencies are discovered from reads.
    pub(crate) depends_on: Option<Vec<Arc<dyn AnyInjected>>>,
    pub(crate) gate: Option<Gate>,
    pub(crate) auto_dispose: Option<bool>,
    pub(crate) catch_upstream_errors: bool,
    pub(crate) side_effects: SideEffects<T>,
}

impl<T> Default for Options<T> {
    fn default() -> Self {
        Self {
            label: None,
            depends_on: None,
            gate: None,
            auto_dispose: None,
            catch_upstream_errors: false,
            side_effects: SideEffects::new(),
        }
    }
}

struct Cell<T> {
    snapshot: Snapshot<T>,
    /// Last Data value, kept through Waiting and Error.
    previous: Option<T>,
    initialized: bool,
    in_flight: InFlight,
    gate: GateState,
}

impl<T: Value> Cell<T> {
    /// Replace the snapshot. Returns `false` for an equal snapshot.
    fn store(&mut self, next: Snapshot<T>) -> bool {
        if self.snapshot == next {
            return false;
        }
        if let Snapshot::Data(value) = &next {
            self.previous = Some(value.clone());
        }
        self.snapshot = next;
        true
    }

    fn cancel_pending(&mut self) {
        self.in_flight.cancel();
        self.gate.cancel();
    }
}

pub(crate) struct InjectedInner<T: Value> {
    runtime: Arc<RuntimeInner>,
    id: NodeId,
    label: Arc<str>,
    this: Weak<InjectedInner<T>>,
    body: Body<T>,
    declared: Option<Vec<Arc<dyn AnyInjected>>>,
    gate: Option<Gate>,
    auto_dispose: bool,
    catch_upstream_errors: bool,
    side_effects: SideEffects<T>,
    cell: Mutex<Cell<T>>,
}

fn to_snapshot<T>(result: anyhow::Result<T>, refresh: bool) -> Result<Snapshot<T>, ConfigError> {
    match result {
        Ok(value) => Ok(Snapshot::Data(value)),
        Err(error) => match classify(error) {
            Escaped::Failed(error) => Ok(Snapshot::Error(ErrorSnapshot::new(error, refresh))),
            Escaped::Pending => Ok(Snapshot::Waiting),
            Escaped::Config(error) => Err(error),
        },
    }
}

impl<T: Value> InjectedInner<T> {
    fn frame(&self) -> Frame {
        Frame {
            runtime: self.runtime.key,
            node: self.id,
            label: self.label.clone(),
            track: self.declared.is_none(),
        }
    }

    fn snapshot(&self) -> Snapshot<T> {
        self.cell.lock().snapshot.clone()
    }

    /// Record `self` as an upstream of the container evaluating on this thread.
    fn track(&self) -> Result<(), ConfigError> {
        let Some(frame) = current_frame() else {
            return Ok(());
        };
        if frame.runtime != self.runtime.key {
            return Err(ConfigError::ForeignRuntime {
                label: self.label.to_string(),
            });
        }
        if frame.track {
            graph::link(&self.runtime, frame.node, self.id)?;
        }
        Ok(())
    }

    fn link_declared(&self) -> Result<(), ConfigError> {
        let Some(declared) = &self.declared else {
            return Ok(());
        };
        for upstream in declared {
            if upstream.runtime_key() != self.runtime.key {
                return Err(ConfigError::ForeignRuntime {
                    label: upstream.label().to_string(),
                });
            }
            graph::link(&self.runtime, self.id, upstream.id())?;
        }
        for upstream in declared {
            upstream.initialize()?;
        }
        Ok(())
    }

    /// Undo a failed initialization so the next read tries again.
    fn abandon_init(&self) {
        self.cell.lock().initialized = false;
        let former = self.runtime.arena.unlink_sources(self.id);
        graph::release_unused(&self.runtime, former);
    }

    /// Initialization without evaluation, used when a write comes first.
    fn mark_initialized(&self) -> Result<(), ConfigError> {
        if std::mem::replace(&mut self.cell.lock().initialized, true) {
            return Ok(());
        }
        tracing::debug!(label = %self.label, "container initialized by write");
        if let Err(error) = self.link_declared() {
            self.abandon_init();
            return Err(error);
        }
        self.side_effects.init();
        Ok(())
    }

    /// Run the body. Returns whether the snapshot changed.
    ///
    /// On a configuration error the upstream edges of the previous
    /// evaluation are restored and the snapshot is left untouched.
    fn evaluate(&self, refresh: bool) -> Result<bool, ConfigError> {
        let former = if self.declared.is_none() {
            self.runtime.arena.unlink_sources(self.id)
        } else {
            Vec::new()
        };

        let changed = match self.run_body(refresh) {
            Ok(changed) => changed,
            Err(error) => {
                self.runtime.arena.unlink_sources(self.id);
                for &source in &former {
                    self.runtime.arena.link(self.id, source);
                }
                return Err(error);
            }
        };

        if !former.is_empty() {
            let current = self.runtime.arena.sources(self.id);
            let dropped = former.into_iter().filter(|id| !current.contains(id)).collect();
            graph::release_unused(&self.runtime, dropped);
        }
        Ok(changed)
    }

    fn run_body(&self, refresh: bool) -> Result<bool, ConfigError> {
        let max_depth = self.runtime.config.max_depth;
        let changed = match &self.body {
            Body::Sync(body) => {
                let result = {
                    let _frame = EvaluationGuard::enter(self.frame(), max_depth)?;
                    body()
                };
                let next = to_snapshot(result, refresh)?;
                let changed = {
                    let mut cell = self.cell.lock();
                    // A fresh result supersedes any async mutation still running.
                    cell.in_flight.cancel();
                    cell.store(next.clone())
                };
                if changed {
                    self.announce(&next);
                }
                changed
            }
            Body::Future(body) => {
                let future = {
                    let _frame = EvaluationGuard::enter(self.frame(), max_depth)?;
                    body()
                };
                self.dispatch(refresh, |this, seq| async_adapter::spawn_future(this, seq, future))?
            }
            Body::Stream(body) => {
                let stream = {
                    let _frame = EvaluationGuard::enter(self.frame(), max_depth)?;
                    body()
                };
                self.dispatch(refresh, |this, seq| async_adapter::spawn_stream(this, seq, stream))?
            }
        };
        Ok(changed)
    }

    /// Start async work and go Waiting. The snapshot is replaced under the
    /// same lock that hands out the sequence number, so a fast completion
    /// cannot be overwritten by the Waiting it follows. The running dispatch
    /// is only superseded once the new task has been spawned.
    fn dispatch<F>(&self, refresh: bool, spawn: F) -> Result<bool, ConfigError>
    where
        F: FnOnce(Weak<Self>, u64) -> Result<JoinHandle<()>, ConfigError>,
    {
        let changed = {
            let mut cell = self.cell.lock();
            let seq = cell.in_flight.upcoming();
            let task = spawn(self.this.clone(), seq)?;
            cell.in_flight.begin(refresh);
            cell.in_flight.attach(seq, task);
            cell.store(Snapshot::Waiting)
        };
        if changed {
            self.announce(&Snapshot::Waiting);
        }
        Ok(changed)
    }

    fn set_snapshot(&self, next: Snapshot<T>) -> bool {
        let changed = self.cell.lock().store(next.clone());
        if changed {
            self.announce(&next);
        }
        changed
    }

    /// Hooks, then observers. Called with no lock held.
    fn announce(&self, snapshot: &Snapshot<T>) {
        tracing::trace!(label = %self.label, status = ?snapshot.status(), "snapshot transition");
        self.side_effects.transition(snapshot);
        self.runtime.observers.notify(self.id);
    }

    fn recompute(&self) -> Result<bool, ConfigError> {
        match graph::upstream_condition(&self.runtime, self.id) {
            Upstream::Waiting => {
                cov_mark::hit!(dependent_waits_for_upstream);
                self.cell.lock().in_flight.cancel();
                Ok(self.set_snapshot(Snapshot::Waiting))
            }
            Upstream::Failed(error) if !self.catch_upstream_errors => {
                cov_mark::hit!(upstream_error_short_circuits);
                self.cell.lock().in_flight.cancel();
                Ok(self.set_snapshot(Snapshot::Error(error)))
            }
            Upstream::Ready | Upstream::Failed(_) => self.evaluate(true),
        }
    }

    fn gate_change(&self, gate: Gate) -> Result<bool, ConfigError> {
        let mut cell = self.cell.lock();
        match cell.gate.on_change(gate) {
            OnChange::Restart => {
                cell.in_flight.cancel();
                if let Err(error) = self.arm_timer(&mut cell, gate) {
                    cell.gate.cancel();
                    return Err(error);
                }
                let changed = cell.store(Snapshot::Waiting);
                drop(cell);
                if changed {
                    self.announce(&Snapshot::Waiting);
                }
                Ok(changed)
            }
            OnChange::Lead => {
                if let Err(error) = self.arm_timer(&mut cell, gate) {
                    cell.gate.cancel();
                    return Err(error);
                }
                drop(cell);
                self.recompute()
            }
            OnChange::Coalesce => Ok(false),
        }
    }

    fn arm_timer(&self, cell: &mut Cell<T>, gate: Gate) -> Result<(), ConfigError> {
        let generation = cell.gate.next_generation();
        // Fixed at arm time so the timer does not drift with task scheduling.
        let deadline = tokio::time::Instant::now() + gate.delay();
        let this = self.this.clone();
        let timer = async_adapter::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(this) = this.upgrade() {
                this.gate_elapsed(gate, generation);
            }
        })?;
        cell.gate.arm(generation, timer);
        Ok(())
    }

    fn gate_elapsed(&self, gate: Gate, generation: u64) {
        let outcome = {
            let mut cell = self.cell.lock();
            let outcome = cell.gate.on_elapsed(gate, generation);
            if outcome == (OnElapsed::Fire { reopen: true }) {
                if let Err(error) = self.arm_timer(&mut cell, gate) {
                    tracing::warn!(label = %self.label, %error, "could not reopen throttle window");
                }
            }
            outcome
        };
        if !matches!(outcome, OnElapsed::Fire { .. }) {
            return;
        }
        tracing::trace!(label = %self.label, ?gate, "gate fired");
        match self.recompute() {
            Ok(true) => {
                if let Err(error) = graph::propagate(&self.runtime, [self.id]) {
                    tracing::warn!(label = %self.label, %error, "propagation after gate failed");
                }
            }
            Ok(false) => {}
            Err(error) => {
                tracing::warn!(label = %self.label, %error, "gated recomputation failed");
            }
        }
    }

    fn write(&self, value: T) -> Result<(), ConfigError> {
        if self.cell.lock().snapshot.data() == Some(&value) {
            cov_mark::hit!(equal_write_suppressed);
            return Ok(());
        }
        self.mark_initialized()?;
        let next = Snapshot::Data(value);
        let changed = {
            let mut cell = self.cell.lock();
            cell.cancel_pending();
            cell.store(next.clone())
        };
        if changed {
            self.announce(&next);
            graph::propagate(&self.runtime, [self.id])?;
        }
        Ok(())
    }

    fn fail(&self, error: StateError) -> Result<(), ConfigError> {
        let next = Snapshot::Error(ErrorSnapshot::new(error, true));
        let changed = {
            let mut cell = self.cell.lock();
            cell.cancel_pending();
            cell.store(next.clone())
        };
        if changed {
            self.announce(&next);
            graph::propagate(&self.runtime, [self.id])?;
        }
        Ok(())
    }

    /// The value a mutation starts from: the current data, or the last good
    /// value while waiting or failed.
    fn mutation_base(&self) -> Result<T, ReadError> {
        self.initialize()?;
        let cell = self.cell.lock();
        match &cell.snapshot {
            Snapshot::Data(value) => Ok(value.clone()),
            Snapshot::Error(error) => cell
                .previous
                .clone()
                .ok_or_else(|| ReadError::Failed(error.error().clone())),
            Snapshot::Idle | Snapshot::Waiting => cell.previous.clone().ok_or(ReadError::Pending),
        }
    }

    fn refresh(&self) -> Result<(), ConfigError> {
        if !self.is_initialized() {
            return self.initialize();
        }
        tracing::debug!(label = %self.label, "refreshing container");
        // Silent reset: the re-evaluation below produces the one
        // notification of this refresh. A Waiting container stays Waiting,
        // so repeated refreshes coalesce.
        let reset = {
            let mut cell = self.cell.lock();
            if cell.snapshot.is_waiting() {
                None
            } else {
                Some(std::mem::take(&mut cell.snapshot))
            }
        };
        if let Err(error) = self.evaluate(true) {
            if let Some(prior) = reset {
                let mut cell = self.cell.lock();
                if cell.snapshot.is_idle() {
                    cell.snapshot = prior;
                }
            }
            return Err(error);
        }
        // Sync bodies and dispatches supersede in-flight work themselves.
        self.cell.lock().gate.cancel();
        graph::propagate_refresh(&self.runtime, self.id)
    }
}

impl<T: Value> AnyInjected for InjectedInner<T> {
    fn id(&self) -> NodeId {
        self.id
    }

    fn runtime_key(&self) -> RuntimeKey {
        self.runtime.key
    }

    fn label(&self) -> Arc<str> {
        self.label.clone()
    }

    fn status(&self) -> Status {
        self.cell.lock().snapshot.status()
    }

    fn error_snapshot(&self) -> Option<ErrorSnapshot> {
        self.cell.lock().snapshot.error().cloned()
    }

    fn is_initialized(&self) -> bool {
        self.cell.lock().initialized
    }

    fn auto_disposes(&self) -> bool {
        self.auto_dispose
    }

    fn initialize(&self) -> Result<(), ConfigError> {
        if std::mem::replace(&mut self.cell.lock().initialized, true) {
            return Ok(());
        }
        tracing::debug!(label = %self.label, "initializing container");
        let result = self.link_declared().and_then(|()| {
            self.side_effects.init();
            self.evaluate(false)
        });
        if let Err(error) = result {
            self.abandon_init();
            return Err(error);
        }
        Ok(())
    }

    fn on_upstream_changed(&self) -> Result<bool, ConfigError> {
        if !self.is_initialized() {
            return Ok(false);
        }
        match self.gate {
            Some(gate) => self.gate_change(gate),
            None => self.recompute(),
        }
    }

    fn dispose(&self) {
        let was_initialized = {
            let mut cell = self.cell.lock();
            cell.cancel_pending();
            cell.snapshot = Snapshot::Idle;
            cell.previous = None;
            std::mem::replace(&mut cell.initialized, false)
        };
        self.runtime.observers.clear(self.id);
        let former = self.runtime.arena.unlink_sources(self.id);
        if was_initialized {
            tracing::debug!(label = %self.label, "disposed container");
            self.side_effects.dispose();
        }
        graph::release_unused(&self.runtime, former);
    }

    fn release_observer(&self, observer: u64) {
        let Some(removed) = self.runtime.observers.remove(self.id, observer) else {
            return;
        };
        if removed.auto_clean && removed.remaining == 0 {
            graph::release_if_unused(&self.runtime, self);
        }
    }
}

impl<T: Value> Settle<T> for InjectedInner<T> {
    fn settle(&self, seq: u64, result: anyhow::Result<T>) -> bool {
        let (next, changed) = {
            let mut cell = self.cell.lock();
            if !cell.in_flight.is_current(seq) {
                cov_mark::hit!(stale_completion_dropped);
                tracing::trace!(label = %self.label, seq, "dropped stale async completion");
                return false;
            }
            let refresh = cell.in_flight.is_refresh();
            let next = to_snapshot(result, refresh).unwrap_or_else(|error| {
                tracing::warn!(label = %self.label, %error, "async computation hit a configuration error");
                Snapshot::Error(ErrorSnapshot::new(StateError::new(error), refresh))
            });
            cell.in_flight.applied();
            let changed = cell.store(next.clone());
            (next, changed)
        };
        if changed {
            self.announce(&next);
            if let Err(error) = graph::propagate(&self.runtime, [self.id]) {
                tracing::warn!(label = %self.label, %error, "propagation after async completion failed");
            }
        }
        true
    }

    fn stream_closed(&self, seq: u64) {
        self.cell.lock().in_flight.finish(seq);
        tracing::trace!(label = %self.label, seq, "stream closed");
    }
}

impl<T: Value> Drop for InjectedInner<T> {
    fn drop(&mut self) {
        self.cell.get_mut().cancel_pending();
        self.runtime.observers.clear(self.id);
        let former = self.runtime.arena.sources(self.id);
        self.runtime.arena.remove(self.id);
        graph::release_unused(&self.runtime, former);
    }
}

/// Reactive state container.
///
/// An `Injected<T>` wraps a creation function (sync, future or stream) and
/// the current [`Snapshot`] of its result. The body runs lazily on the first
/// read. Other containers read inside the body become its upstreams and any
/// change to them recomputes it, in dependency order.
///
/// The handle is cheap to clone; all clones refer to the same container. The
/// container lives as long as any handle does.
///
/// # Example
/// ```ignore
/// let rt = Runtime::new();
/// let counter = rt.inject(|| Ok(0));
/// let doubled = {
///     let counter = counter.clone();
///     rt.inject(move || Ok(counter.read()? * 2))
/// };
///
/// assert_eq!(doubled.read()?, 0);
/// counter.write(21)?;
/// assert_eq!(doubled.read()?, 42);
/// ```
pub struct Injected<T: Value> {
    inner: Arc<InjectedInner<T>>,
}

impl<T: Value> Clone for Injected<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Value> Injected<T> {
    pub(crate) fn create(runtime: &Arc<RuntimeInner>, body: Body<T>, options: Options<T>) -> Self {
        let Options {
            label,
            depends_on,
            gate,
            auto_dispose,
            catch_upstream_errors,
            side_effects,
        } = options;

        let inner = Arc::new_cyclic(|this: &Weak<InjectedInner<T>>| {
            let node: Weak<dyn AnyInjected> = this.clone();
            let mut assigned: Arc<str> = Arc::from("");
            let id = runtime.arena.insert_with(|id| {
                assigned = match label {
                    Some(label) => Arc::from(label),
                    None => Arc::from(format!("{}{id}", std::any::type_name::<T>())),
                };
                NodeMetadata {
                    node,
                    label: assigned.clone(),
                    sources: Default::default(),
                    dependents: Default::default(),
                }
            });
            tracing::trace!(label = %assigned, "container created");

            InjectedInner {
                runtime: runtime.clone(),
                id,
                label: assigned,
                this: this.clone(),
                body,
                declared: depends_on,
                gate: gate.or(runtime.config.gate),
                auto_dispose: auto_dispose.unwrap_or(runtime.config.auto_dispose),
                catch_upstream_errors,
                side_effects,
                cell: Mutex::new(Cell {
                    snapshot: Snapshot::Idle,
                    previous: None,
                    initialized: false,
                    in_flight: InFlight::default(),
                    gate: GateState::default(),
                }),
            }
        });
        Self { inner }
    }

    pub(crate) fn as_node(&self) -> Arc<dyn AnyInjected> {
        self.inner.clone()
    }

    /// Current value.
    ///
    /// Initializes the container on first use. When called from inside
    /// another container's body, records that container as a dependent.
    ///
    /// Fails with [`ReadError::Failed`] carrying the stored error, with
    /// [`ReadError::Pending`] while waiting, or with [`ReadError::Config`]
    /// on a wiring mistake. Forwarding the error with `?` from a body gives
    /// the dependent the very same state.
    pub fn read(&self) -> Result<T, ReadError> {
        match self.load()? {
            Snapshot::Data(value) => Ok(value),
            Snapshot::Error(error) => Err(ReadError::Failed(error.error().clone())),
            Snapshot::Idle | Snapshot::Waiting => Err(ReadError::Pending),
        }
    }

    /// Like [`read`](Self::read), but returns the whole snapshot.
    pub fn load(&self) -> Result<Snapshot<T>, ConfigError> {
        self.inner.track()?;
        self.inner.initialize()?;
        Ok(self.inner.snapshot())
    }

    /// Current snapshot, without initializing or tracking.
    pub fn snapshot(&self) -> Snapshot<T> {
        self.inner.snapshot()
    }

    /// Current status, without initializing or tracking.
    pub fn status(&self) -> Status {
        self.inner.status()
    }

    /// The last Data value, kept while the container waits or holds an error.
    pub fn previous(&self) -> Option<T> {
        self.inner.cell.lock().previous.clone()
    }

    /// Replace the value.
    ///
    /// A value equal to the current data is a no-op. Otherwise any pending
    /// async work or gate is cancelled, observers are notified once and
    /// dependents recompute.
    pub fn write(&self, value: T) -> Result<(), ConfigError> {
        self.inner.write(value)
    }

    /// Write a value derived from the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReadError> {
        let current = untracked(|| self.read())?;
        self.inner.write(f(&current))?;
        Ok(())
    }

    /// Synchronous mutation.
    ///
    /// `f` runs against the current value (or the last good value if the
    /// container is waiting or failed). `Ok` is written like
    /// [`write`](Self::write). An error is stored as an Error snapshot, with
    /// the last good value still available from [`previous`](Self::previous),
    /// and is also returned.
    pub fn mutate<F>(&self, f: F) -> Result<(), ReadError>
    where
        F: FnOnce(&T) -> anyhow::Result<T>,
    {
        let current = self.inner.mutation_base()?;
        match untracked(|| f(&current)) {
            Ok(value) => Ok(self.inner.write(value)?),
            Err(error) => match classify(error) {
                Escaped::Failed(error) => {
                    self.inner.fail(error.clone())?;
                    Err(ReadError::Failed(error))
                }
                Escaped::Pending => Err(ReadError::Pending),
                Escaped::Config(error) => Err(error.into()),
            },
        }
    }

    /// Asynchronous mutation.
    ///
    /// The container goes Waiting (one notification) and settles with the
    /// future's result. A later refresh, write or mutation supersedes it; the
    /// superseded result is dropped.
    pub fn mutate_async<F, Fut>(&self, f: F) -> Result<(), ReadError>
    where
        F: FnOnce(&T) -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let current = self.inner.mutation_base()?;
        let future = untracked(|| f(&current)).boxed();
        let changed = self.inner.dispatch(true, |this, seq| {
            async_adapter::spawn_future(this, seq, future)
        })?;
        if changed {
            graph::propagate(&self.inner.runtime, [self.inner.id])?;
        }
        Ok(())
    }

    /// Discard the snapshot and re-run the creation function.
    ///
    /// Pending async work is cancelled. Every transitive dependent recomputes
    /// once, in dependency order. An uninitialized container is simply
    /// initialized.
    pub fn refresh(&self) -> Result<(), ConfigError> {
        self.inner.refresh()
    }

    /// Register an auto-clean observer.
    ///
    /// The listener receives the new snapshot after every transition.
    pub fn observe<F>(&self, listener: F) -> ObserverHandle
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        self.observe_with(listener, true)
    }

    /// Register an observer. See [`ObserverHandle`] for what `auto_clean`
    /// changes.
    pub fn observe_with<F>(&self, listener: F, auto_clean: bool) -> ObserverHandle
    where
        F: Fn(&Snapshot<T>) + Send + Sync + 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let erased: Listener = {
            let weak = weak.clone();
            Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    listener(&inner.snapshot());
                }
            })
        };
        let id = self.inner.runtime.observers.add(self.inner.id, erased, auto_clean);
        ObserverHandle::new(weak, id, auto_clean)
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.inner.runtime.observers.count(self.inner.id)
    }

    /// Release everything the container holds.
    ///
    /// Pending async work and timers are cancelled, observers are dropped and
    /// the snapshot returns to Idle. The next read initializes it again.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    /// Whether the body has run (or a value was written) since creation or
    /// the last dispose.
    pub fn is_initialized(&self) -> bool {
        self.inner.is_initialized()
    }

    /// Id inside the owning runtime.
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Debug label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The owning runtime.
    pub fn runtime(&self) -> Runtime {
        Runtime::from_inner(self.inner.runtime.clone())
    }
}

impl<T: Value + fmt::Debug> fmt::Debug for Injected<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Injected")
            .field("id", &self.inner.id)
            .field("label", &self.inner.label)
            .field("snapshot", &self.inner.snapshot())
            .finish()
    }
}
