#![deny(missing_docs)]

//! Reactive injected state containers.
//!
//! An [`Injected<T>`] is an observable state cell wrapping a synchronous,
//! future-based or stream-based computation. Containers read inside another
//! container's body become its upstreams; when they change, dependents
//! recompute in dependency order and each observer hears about every settled
//! transition once.
//!
//! # Quick Start
//!
//! ```ignore
//! use injected::{Runtime, Snapshot};
//!
//! let rt = Runtime::new();
//! let counter = rt.inject(|| Ok(0));
//! let label = {
//!     let counter = counter.clone();
//!     rt.inject(move || Ok(format!("count: {}", counter.read()?)))
//! };
//!
//! let _observer = label.observe(|snapshot| {
//!     if let Snapshot::Data(text) = snapshot {
//!         println!("{text}");
//!     }
//! });
//!
//! assert_eq!(label.read()?, "count: 0");
//! counter.write(5)?;                     // prints "count: 5"
//! ```
//!
//! # Core Types
//!
//! - [`Runtime`] - Context owning containers, observers and configuration.
//! - [`Injected<T>`] - The container. `read`, `write`, `mutate`, `refresh`, `observe`, `dispose`.
//! - [`Snapshot<T>`] - Idle / Waiting / Data / Error, replaced on every transition.
//! - [`ObserverHandle`] - Subscription returned by `observe`; release it to unsubscribe.
//!
//! # Snapshots
//!
//! ```ignore
//! match user.snapshot() {
//!     Snapshot::Idle | Snapshot::Waiting => spinner(),
//!     Snapshot::Data(user) => profile(&user),
//!     Snapshot::Error(error) if error.is_refresh() => stale_banner(user.previous()),
//!     Snapshot::Error(error) => failure(error.error()),
//! }
//! ```
//!
//! # Dependencies
//!
//! ```ignore
//! // Discovered from reads
//! let total = rt.inject(move || Ok(price.read()? * quantity.read()?));
//!
//! // Declared, with a rate limit on the whole edge-set
//! let results = rt
//!     .build::<Vec<Hit>>()
//!     .depends_on(&query)
//!     .debounce(Duration::from_millis(300))
//!     .future(move || search(query.read()));
//!
//! // Read without subscribing
//! let rate = untracked(|| tax_rate.read())?;
//! ```
//!
//! Upstream Waiting makes the dependent Waiting; an upstream Error is copied
//! into the dependent unless it opted into `catch_upstream_errors`.
//!
//! # Async
//!
//! Future and stream bodies, async mutations and debounce/throttle timers run
//! on the ambient tokio runtime. Every dispatch gets a sequence number and
//! only the latest one may settle the container; refresh, write and dispose
//! cancel whatever is in flight.
//!
//! # Batching
//!
//! ```ignore
//! rt.batch(|| {
//!     first_name.write("Ada".into())?;
//!     last_name.write("Lovelace".into())
//! })??;
//! // full_name recomputed once
//! ```

pub(crate) mod arena;
mod async_adapter;
mod batch;
mod builder;
mod error;
mod gate;
mod graph;
mod hash;
mod injected;
mod observer;
mod runtime;
mod side_effects;
mod snapshot;

// Core types
pub use injected::{Injected, Value};
pub use runtime::{DEFAULT_MAX_DEPTH, Runtime, RuntimeBuilder, RuntimeConfig};
pub use snapshot::{ErrorSnapshot, Snapshot, Status};

// Options
pub use builder::InjectBuilder;
pub use gate::Gate;
pub use side_effects::SideEffects;

// Observers
pub use observer::ObserverHandle;

// Errors
pub use error::{ConfigError, ReadError, StateError};

// Key functions
pub use arena::{NodeId, untracked};
