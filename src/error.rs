//! Error taxonomy.
//!
//! Three kinds of failure flow through the engine:
//!
//! - [`StateError`]: a failure produced by user code (a body, a mutation, a
//!   future or a stream). It is stored inside an error snapshot and handed to
//!   observers; it never aborts the engine.
//! - [`ConfigError`]: a wiring mistake (cyclic dependencies, handles from a
//!   different runtime, async work without a tokio runtime). It is returned to
//!   the caller immediately and never stored in a snapshot.
//! - [`ReadError`]: what [`Injected::read`](crate::Injected::read) returns when
//!   the container holds no usable value.

use std::backtrace::Backtrace;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Failure produced by user code, shared between every snapshot that carries it.
///
/// Cloning is cheap and preserves identity: an error propagated from an
/// upstream container to its dependents compares equal to the original.
#[derive(Clone)]
pub struct StateError(Arc<anyhow::Error>);

impl StateError {
    /// Wrap an arbitrary error.
    pub fn new(error: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(error.into()))
    }

    /// Build an error from a plain message.
    pub fn msg<M>(message: M) -> Self
    where
        M: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        Self(Arc::new(anyhow::Error::msg(message)))
    }

    /// The wrapped error.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }

    /// Attempt to view the root error as a concrete type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.0.downcast_ref::<E>()
    }

    /// Stack capture taken where the error was created.
    ///
    /// Only populated when `RUST_BACKTRACE`/`RUST_LIB_BACKTRACE` enable capture.
    pub fn backtrace(&self) -> &Backtrace {
        self.0.backtrace()
    }

    /// Whether both handles point at the same underlying error.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for StateError {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.0, f)
    }
}

impl fmt::Debug for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl std::error::Error for StateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

/// Wiring mistakes. These are fatal to the operation that hit them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A container transitively depends on itself.
    #[error("cyclic dependency: {}", path.join(" -> "))]
    Cycle {
        /// Labels of the containers forming the cycle, first one repeated last.
        path: Vec<String>,
    },
    /// Nested evaluation exceeded the runtime's recursion guard.
    #[error("evaluation nested deeper than {max_depth} containers")]
    TooDeep {
        /// The configured limit.
        max_depth: usize,
    },
    /// A container was read while evaluating a container of another runtime.
    #[error("container `{label}` belongs to a different runtime")]
    ForeignRuntime {
        /// Label of the offending container.
        label: String,
    },
    /// Async bodies, async mutations and gated dependencies need a tokio runtime.
    #[error("no tokio runtime available to drive async work")]
    NoAsyncRuntime,
}

/// Why [`Injected::read`](crate::Injected::read) produced no value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReadError {
    /// The container holds an error snapshot.
    #[error(transparent)]
    Failed(StateError),
    /// The container is waiting on an async computation or a gated upstream.
    #[error("container is waiting for a pending computation")]
    Pending,
    /// The read hit a wiring mistake.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// How the engine files an error that escaped user code.
pub(crate) enum Escaped {
    /// Store as an error snapshot.
    Failed(StateError),
    /// A `ReadError::Pending` bubbled out of the body: go Waiting.
    Pending,
    /// Surface to the caller.
    Config(ConfigError),
}

/// Classify an error returned by a body.
///
/// A [`ReadError`] forwarded with `?` is unwrapped so that an upstream failure
/// keeps its identity in the dependent's snapshot.
pub(crate) fn classify(error: anyhow::Error) -> Escaped {
    match error.downcast::<ReadError>() {
        Ok(ReadError::Failed(error)) => Escaped::Failed(error),
        Ok(ReadError::Pending) => Escaped::Pending,
        Ok(ReadError::Config(error)) => Escaped::Config(error),
        Err(error) => match error.downcast::<StateError>() {
            Ok(error) => Escaped::Failed(error),
            Err(error) => match error.downcast::<ConfigError>() {
                Ok(error) => Escaped::Config(error),
                Err(error) => Escaped::Failed(StateError::new(error)),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(result: Result<i32, ReadError>) -> anyhow::Result<i32> {
        Ok(result? + 1)
    }

    #[test]
    fn forwarded_failure_keeps_identity() {
        let original = StateError::msg("boom");
        let escaped = body(Err(ReadError::Failed(original.clone()))).unwrap_err();
        match classify(escaped) {
            Escaped::Failed(error) => assert!(error.ptr_eq(&original)),
            _ => panic!("expected a failure"),
        }
    }

    #[test]
    fn forwarded_pending_and_config_are_recognised() {
        let pending = body(Err(ReadError::Pending)).unwrap_err();
        assert!(matches!(classify(pending), Escaped::Pending));

        let config = body(Err(ReadError::Config(ConfigError::NoAsyncRuntime))).unwrap_err();
        assert!(matches!(
            classify(config),
            Escaped::Config(ConfigError::NoAsyncRuntime)
        ));
    }

    #[test]
    fn foreign_errors_are_wrapped() {
        let error = anyhow::anyhow!("plain");
        match classify(error) {
            Escaped::Failed(error) => assert_eq!(error.to_string(), "plain"),
            _ => panic!("expected a failure"),
        }
    }

    #[test]
    fn cycle_message_lists_path() {
        let error = ConfigError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(error.to_string(), "cyclic dependency: a -> b -> a");
    }
}
