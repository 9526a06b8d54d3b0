//! The runtime: the context every container belongs to.
//!
//! A [`Runtime`] owns the node arena, the observer registry, the batch state
//! and the configuration. Nothing is global, so independent runtimes (one per
//! test, one per window) never see each other's containers.
//!
//! # Example
//! ```ignore
//! use std::time::Duration;
//! use injected::Runtime;
//!
//! let rt = Runtime::builder()
//!     .max_depth(64)
//!     .auto_dispose(true)
//!     .build();
//!
//! let query = rt.inject_value(String::new());
//! let results = rt
//!     .build::<Vec<String>>()
//!     .depends_on(&query)
//!     .debounce(Duration::from_millis(300))
//!     .future(move || lookup(query.read()));
//!
//! // Explicit teardown instead of an ambient singleton going away.
//! rt.teardown();
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures::Stream;

use crate::arena::{NodeArena, NodeId, RuntimeKey};
use crate::batch::{BatchGuard, BatchState};
use crate::builder::InjectBuilder;
use crate::error::ConfigError;
use crate::gate::Gate;
use crate::injected::{Injected, Value};
use crate::observer::ObserverRegistry;

/// Default limit on nested evaluation (a body reading a container whose body
/// reads a container, and so on).
pub const DEFAULT_MAX_DEPTH: usize = 256;

static NEXT_RUNTIME: AtomicU64 = AtomicU64::new(1);

/// Runtime-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Recursion guard for nested evaluation.
    pub max_depth: usize,
    /// Default disposal policy for new containers.
    pub auto_dispose: bool,
    /// Default rate limit for every container's edge-set.
    pub gate: Option<Gate>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            auto_dispose: false,
            gate: None,
        }
    }
}

/// Builder for a [`Runtime`] with custom settings.
///
/// Defaults:
/// - `max_depth`: [`DEFAULT_MAX_DEPTH`]
/// - `auto_dispose`: `false`
/// - no debounce/throttle
#[derive(Debug, Default)]
pub struct RuntimeBuilder {
    config: RuntimeConfig,
}

impl RuntimeBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the recursion guard.
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Set the default disposal policy.
    pub fn auto_dispose(mut self, enabled: bool) -> Self {
        self.config.auto_dispose = enabled;
        self
    }

    /// Debounce every container's upstream changes by default.
    pub fn debounce(mut self, delay: Duration) -> Self {
        self.config.gate = Some(Gate::Debounce(delay));
        self
    }

    /// Throttle every container's upstream changes by default.
    pub fn throttle(mut self, delay: Duration) -> Self {
        self.config.gate = Some(Gate::Throttle(delay));
        self
    }

    /// Create the runtime.
    pub fn build(self) -> Runtime {
        Runtime::with_config(self.config)
    }
}

pub(crate) struct RuntimeInner {
    pub(crate) key: RuntimeKey,
    pub(crate) arena: NodeArena,
    pub(crate) observers: ObserverRegistry,
    pub(crate) batch: BatchState,
    pub(crate) config: RuntimeConfig,
}

/// Context object owning every container created through it.
///
/// Cloning is cheap; clones share the same containers. Containers keep their
/// runtime alive, so a runtime handle may be dropped while containers are
/// still in use.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    /// Create a runtime with default settings.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Start configuring a runtime.
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Create a runtime from a complete configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let key = RuntimeKey(NEXT_RUNTIME.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(runtime = key.0, ?config, "runtime created");
        Self {
            inner: Arc::new(RuntimeInner {
                key,
                arena: NodeArena::default(),
                observers: ObserverRegistry::new(),
                batch: BatchState::default(),
                config,
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<RuntimeInner>) -> Self {
        Self { inner }
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Container with a synchronous creation function and default options.
    pub fn inject<T, F>(&self, body: F) -> Injected<T>
    where
        T: Value,
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        self.build().sync(body)
    }

    /// Container starting from a constant.
    pub fn inject_value<T: Value>(&self, value: T) -> Injected<T> {
        self.build().value(value)
    }

    /// Container backed by a future factory.
    pub fn inject_future<T, F, Fut>(&self, body: F) -> Injected<T>
    where
        T: Value,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.build().future(body)
    }

    /// Container backed by a stream factory.
    pub fn inject_stream<T, F, S>(&self, body: F) -> Injected<T>
    where
        T: Value,
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        self.build().stream(body)
    }

    /// Configure a container before creating it.
    pub fn build<T: Value>(&self) -> InjectBuilder<T> {
        InjectBuilder::new(self.inner.clone())
    }

    /// Group writes into one propagation round.
    ///
    /// Every write inside `f` notifies the written container's observers
    /// right away, but dependents recompute once, when the outermost batch
    /// ends. A diamond fed by two written containers recomputes its bottom
    /// once. The batch is closed even if `f` panics.
    ///
    /// The returned error comes from the deferred propagation.
    pub fn batch<F, R>(&self, f: F) -> Result<R, ConfigError>
    where
        F: FnOnce() -> R,
    {
        let guard = BatchGuard::open(&self.inner);
        let result = f();
        guard.close()?;
        Ok(result)
    }

    /// `true` while a [`batch`](Self::batch) is open on this runtime.
    pub fn is_batching(&self) -> bool {
        self.inner.batch.is_active()
    }

    /// Dispose every live container.
    ///
    /// Containers stay usable: a later read initializes them again.
    pub fn teardown(&self) {
        let nodes = self.inner.arena.live_nodes();
        tracing::debug!(runtime = self.inner.key.0, containers = nodes.len(), "tearing down runtime");
        for node in nodes {
            node.dispose();
        }
    }

    /// Number of live containers.
    pub fn len(&self) -> usize {
        self.inner.arena.len()
    }

    /// `true` if no container is alive.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current upstreams of `container`.
    pub fn dependencies_of<T: Value>(&self, container: &Injected<T>) -> Vec<NodeId> {
        self.inner.arena.sources(container.id())
    }

    /// Current dependents of `container`.
    pub fn dependents_of<T: Value>(&self, container: &Injected<T>) -> Vec<NodeId> {
        self.inner.arena.dependents(container.id())
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("key", &self.inner.key.0)
            .field("containers", &self.len())
            .field("config", &self.inner.config)
            .finish()
    }
}
