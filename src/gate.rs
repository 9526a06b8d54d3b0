//! Debounce/throttle gating for a container's dependency edge-set.
//!
//! The gate is a small state machine. It decides what an upstream change
//! means for the dependent right now ([`GateState::on_change`]) and what
//! happens when the armed timer fires ([`GateState::on_elapsed`]). The
//! container owns the timers; the gate only tracks which timer generation is
//! current so that a superseded timer is ignored.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Rate limit applied to a container's upstream changes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Gate {
    /// Trailing-edge debounce: recompute once the upstreams have been quiet for
    /// the whole delay. The dependent sits in Waiting meanwhile.
    Debounce(Duration),
    /// Leading-edge throttle: recompute on the first change, then coalesce the
    /// changes of the following window into one trailing recomputation.
    Throttle(Duration),
}

impl Gate {
    /// The configured delay.
    pub fn delay(self) -> Duration {
        match self {
            Gate::Debounce(delay) | Gate::Throttle(delay) => delay,
        }
    }
}

/// Outcome of an upstream change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OnChange {
    /// Debounce: go Waiting and (re)arm the timer.
    Restart,
    /// Throttle, quiet window: recompute now and arm the window timer.
    Lead,
    /// Throttle, open window: fold into the trailing recomputation.
    Coalesce,
}

/// Outcome of a timer firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OnElapsed {
    /// Superseded timer, nothing to do.
    Stale,
    /// Recompute. For throttle, a new window must be armed as well.
    Fire { reopen: bool },
    /// Throttle window closed with nothing pending.
    Close,
}

#[derive(Debug, Default)]
pub(crate) struct GateState {
    generation: u64,
    timer: Option<JoinHandle<()>>,
    window_open: bool,
    trailing: bool,
}

impl GateState {
    pub(crate) fn on_change(&mut self, gate: Gate) -> OnChange {
        match gate {
            Gate::Debounce(_) => {
                if self.timer.is_some() {
                    cov_mark::hit!(debounce_timer_restarted);
                }
                OnChange::Restart
            }
            Gate::Throttle(_) if self.window_open => {
                cov_mark::hit!(throttle_change_coalesced);
                self.trailing = true;
                OnChange::Coalesce
            }
            Gate::Throttle(_) => {
                self.window_open = true;
                OnChange::Lead
            }
        }
    }

    /// Drop the current timer and return the generation for the next one.
    pub(crate) fn next_generation(&mut self) -> u64 {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        self.generation += 1;
        self.generation
    }

    pub(crate) fn arm(&mut self, generation: u64, timer: JoinHandle<()>) {
        if generation == self.generation {
            self.timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    pub(crate) fn on_elapsed(&mut self, gate: Gate, generation: u64) -> OnElapsed {
        if generation != self.generation {
            return OnElapsed::Stale;
        }
        self.timer = None;
        match gate {
            Gate::Debounce(_) => OnElapsed::Fire { reopen: false },
            Gate::Throttle(_) if self.trailing => {
                self.trailing = false;
                OnElapsed::Fire { reopen: true }
            }
            Gate::Throttle(_) => {
                self.window_open = false;
                OnElapsed::Close
            }
        }
    }

    /// Forget everything; pending timers are aborted and become stale.
    pub(crate) fn cancel(&mut self) {
        self.next_generation();
        self.window_open = false;
        self.trailing = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[test]
    fn throttle_leads_then_coalesces_into_trailing() {
        let gate = Gate::Throttle(WINDOW);
        let mut state = GateState::default();

        assert_eq!(state.on_change(gate), OnChange::Lead);
        let generation = state.next_generation();
        {
            cov_mark::check!(throttle_change_coalesced);
            assert_eq!(state.on_change(gate), OnChange::Coalesce);
        }
        assert_eq!(state.on_change(gate), OnChange::Coalesce);

        assert_eq!(
            state.on_elapsed(gate, generation),
            OnElapsed::Fire { reopen: true }
        );
        let generation = state.next_generation();
        assert_eq!(state.on_elapsed(gate, generation), OnElapsed::Close);
        assert_eq!(state.on_change(gate), OnChange::Lead);
    }

    #[test]
    fn superseded_timer_is_stale() {
        let gate = Gate::Debounce(WINDOW);
        let mut state = GateState::default();
        let first = state.next_generation();
        let second = state.next_generation();

        assert_eq!(state.on_elapsed(gate, first), OnElapsed::Stale);
        assert_eq!(
            state.on_elapsed(gate, second),
            OnElapsed::Fire { reopen: false }
        );
    }

    #[test]
    fn cancel_invalidates_pending_timer_and_window() {
        let gate = Gate::Throttle(WINDOW);
        let mut state = GateState::default();
        state.on_change(gate);
        let generation = state.next_generation();
        state.on_change(gate);

        state.cancel();

        assert_eq!(state.on_elapsed(gate, generation), OnElapsed::Stale);
        assert_eq!(state.on_change(gate), OnChange::Lead);
    }

    #[test]
    fn delay_is_exposed() {
        assert_eq!(Gate::Debounce(WINDOW).delay(), WINDOW);
        assert_eq!(Gate::Throttle(WINDOW).delay(), WINDOW);
    }
}
