use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;

use crate::gate::Gate;
use crate::injected::{Body, Injected, Options, Value};
use crate::runtime::RuntimeInner;
use crate::side_effects::SideEffects;

/// Builder for a container with non-default options.
///
/// Obtained from [`Runtime::build`](crate::Runtime::build). Option methods
/// consume and return the builder; one of the finishers ([`sync`](Self::sync),
/// [`value`](Self::value), [`future`](Self::future), [`stream`](Self::stream))
/// creates the container.
///
/// ```ignore
/// let results = rt
///     .build::<Vec<Hit>>()
///     .label("search-results")
///     .depends_on(&query)
///     .debounce(Duration::from_millis(300))
///     .future(move || search(query.read()));
/// ```
#[must_use = "a builder does nothing until a finisher creates the container"]
pub struct InjectBuilder<T: Value> {
    runtime: Arc<RuntimeInner>,
    options: Options<T>,
}

impl<T: Value> InjectBuilder<T> {
    pub(crate) fn new(runtime: Arc<RuntimeInner>) -> Self {
        Self {
            runtime,
            options: Options::default(),
        }
    }

    /// Name used in logs and cycle reports. Defaults to the value type plus
    /// the container id.
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.options.label = Some(label.into());
        self
    }

    /// Declare an upstream explicitly.
    ///
    /// Once any upstream is declared, reads inside the body no longer record
    /// dependencies: the declared set is the whole edge-set. Declared
    /// upstreams are linked and initialized when this container initializes.
    pub fn depends_on<U: Value>(mut self, upstream: &Injected<U>) -> Self {
        self.options
            .depends_on
            .get_or_insert_with(Vec::new)
            .push(upstream.as_node());
        self
    }

    /// Trailing-edge debounce on the edge-set.
    pub fn debounce(self, delay: Duration) -> Self {
        self.gate(Gate::Debounce(delay))
    }

    /// Leading-edge throttle on the edge-set.
    pub fn throttle(self, delay: Duration) -> Self {
        self.gate(Gate::Throttle(delay))
    }

    /// Set the rate limit directly. Overrides the runtime default.
    pub fn gate(mut self, gate: Gate) -> Self {
        self.options.gate = Some(gate);
        self
    }

    /// Dispose the container once its last auto-clean observer is released
    /// and no container depends on it. Defaults to the runtime setting.
    pub fn auto_dispose(mut self, enabled: bool) -> Self {
        self.options.auto_dispose = Some(enabled);
        self
    }

    /// Run the body even when an upstream holds an error, instead of copying
    /// that error. The body sees the error through `read()` and may recover.
    pub fn catch_upstream_errors(mut self, enabled: bool) -> Self {
        self.options.catch_upstream_errors = enabled;
        self
    }

    /// Lifecycle hooks.
    pub fn side_effects(mut self, side_effects: SideEffects<T>) -> Self {
        self.options.side_effects = side_effects;
        self
    }

    /// Synchronous creation function.
    pub fn sync<F>(self, body: F) -> Injected<T>
    where
        F: Fn() -> anyhow::Result<T> + Send + Sync + 'static,
    {
        Injected::create(&self.runtime, Body::sync(body), self.options)
    }

    /// Constant initial value. Writes replace it; refresh and dispose restore it.
    pub fn value(self, value: T) -> Injected<T> {
        self.sync(move || Ok(value.clone()))
    }

    /// Future-returning creation function. Needs a tokio runtime.
    pub fn future<F, Fut>(self, body: F) -> Injected<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Injected::create(&self.runtime, Body::future(body), self.options)
    }

    /// Stream-returning creation function. Needs a tokio runtime.
    pub fn stream<F, S>(self, body: F) -> Injected<T>
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: Stream<Item = anyhow::Result<T>> + Send + 'static,
    {
        Injected::create(&self.runtime, Body::stream(body), self.options)
    }
}
