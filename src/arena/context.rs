// Evaluation context - which container body is running on this thread
//
// A thread-local stack of frames replaces dynamic dependency discovery:
// a container pushes a frame before invoking its body, and any container
// read while that frame is on top registers an edge back to it.
//
// `None` entries are barriers pushed by `untracked()`: reads under a barrier
// record nothing, but the frames below still count for the revisit guard.

use std::cell::RefCell;
use std::sync::Arc;

use super::NodeId;
use crate::error::ConfigError;

/// Identifies the runtime a frame belongs to.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub(crate) struct RuntimeKey(pub(crate) u64);

#[derive(Clone, Debug)]
pub(crate) struct Frame {
    pub(crate) runtime: RuntimeKey,
    pub(crate) node: NodeId,
    pub(crate) label: Arc<str>,
    /// `false` for containers with an explicit dependency set.
    pub(crate) track: bool,
}

thread_local! {
    static EVALUATION_STACK: RefCell<Vec<Option<Frame>>> = const { RefCell::new(Vec::new()) };
}

/// The innermost frame, unless an `untracked()` barrier hides it.
pub(crate) fn current_frame() -> Option<Frame> {
    EVALUATION_STACK.with(|stack| stack.borrow().last().cloned().flatten())
}

/// RAII guard that pops its frame when dropped, even if the body panics.
pub(crate) struct EvaluationGuard {
    _private: (),
}

impl EvaluationGuard {
    /// Push `frame`, refusing to re-enter a container that is already
    /// evaluating on this thread or to nest deeper than `max_depth`.
    pub(crate) fn enter(frame: Frame, max_depth: usize) -> Result<Self, ConfigError> {
        EVALUATION_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frames = stack.iter().flatten();
            if let Some(start) = frames
                .clone()
                .position(|f| f.runtime == frame.runtime && f.node == frame.node)
            {
                cov_mark::hit!(evaluation_revisit_detected);
                let mut path: Vec<String> = frames
                    .skip(start)
                    .filter(|f| f.runtime == frame.runtime)
                    .map(|f| f.label.to_string())
                    .collect();
                path.push(frame.label.to_string());
                tracing::warn!(cycle = %path.join(" -> "), "container re-entered its own evaluation");
                return Err(ConfigError::Cycle { path });
            }
            if stack.iter().flatten().count() >= max_depth {
                return Err(ConfigError::TooDeep { max_depth });
            }
            stack.push(Some(frame));
            Ok(Self { _private: () })
        })
    }

    fn barrier() -> Self {
        EVALUATION_STACK.with(|stack| stack.borrow_mut().push(None));
        Self { _private: () }
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        EVALUATION_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

/// Run a closure without recording dependencies.
///
/// Reads inside `f` return current values but do not subscribe the
/// enclosing container to them.
///
/// ```ignore
/// let total = rt.inject(move || {
///     let price = price.read()?;                  // tracked
///     let rate = untracked(|| tax_rate.read())?;  // not tracked
///     Ok(price * rate)
/// });
/// ```
pub fn untracked<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let _guard = EvaluationGuard::barrier();
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(node: u32, label: &str) -> Frame {
        Frame {
            runtime: RuntimeKey(1),
            node: NodeId::new(node),
            label: Arc::from(label),
            track: true,
        }
    }

    #[test]
    fn guard_pops_frame_even_on_panic() {
        assert!(current_frame().is_none());
        let result = std::panic::catch_unwind(|| {
            let _guard = EvaluationGuard::enter(frame(0, "a"), 8).unwrap();
            assert_eq!(current_frame().map(|f| f.node), Some(NodeId::new(0)));
            panic!("body failed");
        });
        assert!(result.is_err());
        assert!(current_frame().is_none());
    }

    #[test]
    fn revisit_reports_cycle_path() {
        cov_mark::check!(evaluation_revisit_detected);
        let _a = EvaluationGuard::enter(frame(0, "a"), 8).unwrap();
        let _b = EvaluationGuard::enter(frame(1, "b"), 8).unwrap();
        let Err(ConfigError::Cycle { path }) = EvaluationGuard::enter(frame(0, "a"), 8) else {
            panic!("expected a cycle");
        };
        assert_eq!(path, vec!["a", "b", "a"]);
    }

    #[test]
    fn depth_guard_trips() {
        let _a = EvaluationGuard::enter(frame(0, "a"), 2).unwrap();
        let _b = EvaluationGuard::enter(frame(1, "b"), 2).unwrap();
        assert_eq!(
            EvaluationGuard::enter(frame(2, "c"), 2).err(),
            Some(ConfigError::TooDeep { max_depth: 2 })
        );
    }

    #[test]
    fn untracked_hides_the_current_frame() {
        let _a = EvaluationGuard::enter(frame(0, "a"), 8).unwrap();
        assert!(current_frame().is_some());
        untracked(|| assert!(current_frame().is_none()));
        assert!(current_frame().is_some());
    }
}
