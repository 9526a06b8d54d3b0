//! Immutable value/status pairs.
//!
//! Every transition of a container replaces its [`Snapshot`] with a new one;
//! observers and rendering helpers only ever see whole snapshots.

use std::backtrace::{Backtrace, BacktraceStatus};

use crate::error::StateError;

/// Status tag of a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Status {
    /// Never evaluated, or reset by refresh/dispose.
    Idle,
    /// An async computation or a gated upstream is in flight.
    Waiting,
    /// Holds a value.
    Data,
    /// Holds an error.
    Error,
}

/// The error half of a snapshot.
#[derive(Clone, Debug)]
pub struct ErrorSnapshot {
    error: StateError,
    is_refresh: bool,
}

impl ErrorSnapshot {
    pub(crate) fn new(error: StateError, is_refresh: bool) -> Self {
        Self { error, is_refresh }
    }

    /// The failure itself.
    pub fn error(&self) -> &StateError {
        &self.error
    }

    /// Stack capture, when backtraces are enabled for the process.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        let backtrace = self.error.backtrace();
        (backtrace.status() == BacktraceStatus::Captured).then_some(backtrace)
    }

    /// `true` when the error came from re-evaluating an already initialized
    /// container (refresh, mutation, upstream change) rather than from its
    /// first evaluation.
    pub fn is_refresh(&self) -> bool {
        self.is_refresh
    }
}

impl PartialEq for ErrorSnapshot {
    fn eq(&self, other: &Self) -> bool {
        self.error.ptr_eq(&other.error) && self.is_refresh == other.is_refresh
    }
}

/// State of one container at one instant.
#[derive(Clone, Debug)]
pub enum Snapshot<T> {
    /// Not evaluated.
    Idle,
    /// Waiting for an async result or a gated upstream.
    Waiting,
    /// Settled with a value.
    Data(T),
    /// Settled with an error.
    Error(ErrorSnapshot),
}

impl<T> Snapshot<T> {
    /// Status tag.
    pub fn status(&self) -> Status {
        match self {
            Snapshot::Idle => Status::Idle,
            Snapshot::Waiting => Status::Waiting,
            Snapshot::Data(_) => Status::Data,
            Snapshot::Error(_) => Status::Error,
        }
    }

    /// `true` for [`Snapshot::Idle`].
    pub fn is_idle(&self) -> bool {
        matches!(self, Snapshot::Idle)
    }

    /// `true` for [`Snapshot::Waiting`].
    pub fn is_waiting(&self) -> bool {
        matches!(self, Snapshot::Waiting)
    }

    /// `true` for [`Snapshot::Data`].
    pub fn has_data(&self) -> bool {
        matches!(self, Snapshot::Data(_))
    }

    /// `true` for [`Snapshot::Error`].
    pub fn has_error(&self) -> bool {
        matches!(self, Snapshot::Error(_))
    }

    /// `true` once the snapshot holds either data or an error.
    pub fn is_settled(&self) -> bool {
        self.has_data() || self.has_error()
    }

    /// The value, if any.
    pub fn data(&self) -> Option<&T> {
        match self {
            Snapshot::Data(value) => Some(value),
            _ => None,
        }
    }

    /// Consume the snapshot and return its value, if any.
    pub fn into_data(self) -> Option<T> {
        match self {
            Snapshot::Data(value) => Some(value),
            _ => None,
        }
    }

    /// The error half, if any.
    pub fn error(&self) -> Option<&ErrorSnapshot> {
        match self {
            Snapshot::Error(error) => Some(error),
            _ => None,
        }
    }

    /// Map the value, keeping the status.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Snapshot<U> {
        match self {
            Snapshot::Idle => Snapshot::Idle,
            Snapshot::Waiting => Snapshot::Waiting,
            Snapshot::Data(value) => Snapshot::Data(f(value)),
            Snapshot::Error(error) => Snapshot::Error(error),
        }
    }

    /// Borrowing view of the snapshot.
    pub fn as_ref(&self) -> Snapshot<&T> {
        match self {
            Snapshot::Idle => Snapshot::Idle,
            Snapshot::Waiting => Snapshot::Waiting,
            Snapshot::Data(value) => Snapshot::Data(value),
            Snapshot::Error(error) => Snapshot::Error(error.clone()),
        }
    }
}

/// Data compares by value, errors by identity. Two snapshots comparing equal
/// means "no transition": the engine suppresses the notification.
impl<T: PartialEq> PartialEq for Snapshot<T> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Snapshot::Idle, Snapshot::Idle) | (Snapshot::Waiting, Snapshot::Waiting) => true,
            (Snapshot::Data(a), Snapshot::Data(b)) => a == b,
            (Snapshot::Error(a), Snapshot::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Snapshot::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_data_is_not_a_transition() {
        assert_eq!(Snapshot::Data(3), Snapshot::Data(3));
        assert_ne!(Snapshot::Data(3), Snapshot::Data(4));
        assert_ne!(Snapshot::Waiting, Snapshot::Data(4));
        assert_eq!(Snapshot::<i32>::Waiting, Snapshot::Waiting);
    }

    #[test]
    fn errors_compare_by_identity() {
        let error = StateError::msg("boom");
        let a: Snapshot<i32> = Snapshot::Error(ErrorSnapshot::new(error.clone(), false));
        let b: Snapshot<i32> = Snapshot::Error(ErrorSnapshot::new(error, false));
        let c: Snapshot<i32> = Snapshot::Error(ErrorSnapshot::new(StateError::msg("boom"), false));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn refresh_flag_distinguishes_errors() {
        let error = StateError::msg("boom");
        let initial = ErrorSnapshot::new(error.clone(), false);
        let refreshed = ErrorSnapshot::new(error, true);
        assert!(!initial.is_refresh());
        assert!(refreshed.is_refresh());
        assert_ne!(initial, refreshed);
    }

    #[test]
    fn map_keeps_status() {
        assert_eq!(Snapshot::Data(2).map(|v| v * 10), Snapshot::Data(20));
        assert_eq!(Snapshot::<i32>::Waiting.map(|v| v * 10).status(), Status::Waiting);
        assert!(Snapshot::<i32>::default().is_idle());
    }
}
