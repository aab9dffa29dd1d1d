//! Guarded finite-state machine
//!
//! Holds the current state behind a lock, applies only transitions present in
//! the state's table and notifies the observer for every accepted transition.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;

/// A lifecycle state with a transition table
pub trait LifecycleState: Copy + Eq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Whether `self -> next` is present in the transition table
    fn can_transition_to(self, next: Self) -> bool;

    /// Absorbing states are never left once entered
    fn is_absorbing(self) -> bool {
        false
    }
}

/// One accepted state change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition<S> {
    pub old_state: S,
    pub new_state: S,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

type TransitionObserver<S> = Box<dyn Fn(&StateTransition<S>) + Send + Sync>;

/// Finite-state machine over `S`
///
/// The observer runs under the state guard, after the new state is stored,
/// so notifications for the same machine are serialized and never precede
/// the mutation they describe. Observers must not call back into the machine.
pub struct StateMachine<S: LifecycleState> {
    state: Mutex<S>,
    observer: Option<TransitionObserver<S>>,
    label: &'static str,
}

impl<S: LifecycleState> StateMachine<S> {
    /// Create a machine without an observer
    pub fn new(label: &'static str, initial: S) -> Self {
        Self {
            state: Mutex::new(initial),
            observer: None,
            label,
        }
    }

    /// Create a machine that reports every accepted transition to `observer`
    pub fn with_observer<F>(label: &'static str, initial: S, observer: F) -> Self
    where
        F: Fn(&StateTransition<S>) + Send + Sync + 'static,
    {
        Self {
            state: Mutex::new(initial),
            observer: Some(Box::new(observer)),
            label,
        }
    }

    /// Get the current state
    pub fn current(&self) -> S {
        *self.state.lock()
    }

    /// Apply `to` if the table allows it. Returns whether it was applied.
    pub fn transition(&self, to: S, reason: impl Into<String>) -> bool {
        let mut state = self.state.lock();
        self.apply(&mut state, to, reason.into())
    }

    /// Check `guard` against the current state and transition in one step.
    ///
    /// Returns the previous state on success, or the current state if the
    /// guard or the table refused the change.
    pub fn try_transition<G>(&self, guard: G, to: S, reason: impl Into<String>) -> Result<S, S>
    where
        G: FnOnce(S) -> bool,
    {
        let mut state = self.state.lock();
        let previous = *state;
        if !guard(previous) {
            return Err(previous);
        }
        if self.apply(&mut state, to, reason.into()) {
            Ok(previous)
        } else {
            Err(previous)
        }
    }

    fn apply(&self, state: &mut S, to: S, reason: String) -> bool {
        let from = *state;

        if from.is_absorbing() && to != from {
            tracing::debug!(machine = self.label, from = %from, to = %to, "Ignoring transition out of terminal state");
            return false;
        }
        if !from.can_transition_to(to) {
            tracing::debug!(machine = self.label, from = %from, to = %to, "Rejected transition");
            return false;
        }

        *state = to;

        tracing::debug!(
            machine = self.label,
            from = %from,
            to = %to,
            reason = %reason,
            "State changed"
        );

        if let Some(observer) = &self.observer {
            observer(&StateTransition {
                old_state: from,
                new_state: to,
                reason,
                timestamp: Utc::now(),
            });
        }

        true
    }
}

impl<S: LifecycleState> fmt::Debug for StateMachine<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("label", &self.label)
            .field("state", &self.current())
            .finish()
    }
}
