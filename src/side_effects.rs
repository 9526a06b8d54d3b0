//! Lifecycle hooks attached to a container.

use crate::snapshot::{ErrorSnapshot, Snapshot};

type Hook = Box<dyn Fn() + Send + Sync>;

/// Callbacks run on a container's lifecycle transitions.
///
/// Hooks fire after the new snapshot is stored and before observers are
/// notified, once per transition. They run outside every engine lock, so a
/// hook may read other containers.
///
/// ```ignore
/// let effects = SideEffects::new()
///     .on_data(|user: &User| tracing::info!(id = user.id, "user loaded"))
///     .on_error(|error| tracing::warn!(%error, "user failed"));
/// let user = rt.build::<User>().side_effects(effects).future(fetch_user);
/// ```
pub struct SideEffects<T> {
    on_init: Option<Hook>,
    on_waiting: Option<Hook>,
    on_data: Option<Box<dyn Fn(&T) + Send + Sync>>,
    on_error: Option<Box<dyn Fn(&ErrorSnapshot) + Send + Sync>>,
    on_dispose: Option<Hook>,
}

impl<T> SideEffects<T> {
    /// No hooks.
    pub fn new() -> Self {
        Self {
            on_init: None,
            on_waiting: None,
            on_data: None,
            on_error: None,
            on_dispose: None,
        }
    }

    /// Runs when the container is initialized (first read, first write, or
    /// first read after a dispose).
    pub fn on_init(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_init = Some(Box::new(hook));
        self
    }

    /// Runs on every transition into Waiting.
    pub fn on_waiting(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_waiting = Some(Box::new(hook));
        self
    }

    /// Runs on every transition into Data.
    pub fn on_data(mut self, hook: impl Fn(&T) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Box::new(hook));
        self
    }

    /// Runs on every transition into Error.
    pub fn on_error(mut self, hook: impl Fn(&ErrorSnapshot) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(hook));
        self
    }

    /// Runs when an initialized container is disposed.
    pub fn on_dispose(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_dispose = Some(Box::new(hook));
        self
    }

    pub(crate) fn init(&self) {
        if let Some(hook) = &self.on_init {
            hook();
        }
    }

    pub(crate) fn dispose(&self) {
        if let Some(hook) = &self.on_dispose {
            hook();
        }
    }

    pub(crate) fn transition(&self, snapshot: &Snapshot<T>) {
        match snapshot {
            Snapshot::Idle => {}
            Snapshot::Waiting => {
                if let Some(hook) = &self.on_waiting {
                    hook();
                }
            }
            Snapshot::Data(value) => {
                if let Some(hook) = &self.on_data {
                    hook(value);
                }
            }
            Snapshot::Error(error) => {
                if let Some(hook) = &self.on_error {
                    hook(error);
                }
            }
        }
    }
}

impl<T> Default for SideEffects<T> {
    fn default() -> Self {
        Self::new()
    }
}
