//! Request lifecycle
//!
//! ```text
//! Received → Authenticated → Staged → Evaluated → Persisted → Acknowledged
//!     └───────────┴────────────┴─────────┴───────────┴──► Failed(kind)
//! ```

use crate::error::FailureKind;
use std::fmt;
use std::time::{Duration, Instant};

/// Stage a request has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    /// Accepted by the binding
    Received,
    /// Identity decoded
    Authenticated,
    /// Archive staged and unpacked
    Staged,
    /// Rules evaluated
    Evaluated,
    /// Results committed
    Persisted,
    /// Acknowledgement produced
    Acknowledged,
    /// Aborted
    Failed(FailureKind),
}

impl RequestState {
    /// No further transitions possible
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Acknowledged | Self::Failed(_))
    }

    /// Next state on success, `None` from terminal states
    #[must_use]
    pub fn successor(self) -> Option<Self> {
        use RequestState::{Acknowledged, Authenticated, Evaluated, Failed, Persisted, Received, Staged};
        match self {
            Received => Some(Authenticated),
            Authenticated => Some(Staged),
            Staged => Some(Evaluated),
            Evaluated => Some(Persisted),
            Persisted => Some(Acknowledged),
            Acknowledged | Failed(_) => None,
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(kind) => write!(f, "failed({kind})"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Rejected transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal request transition {from} -> {to}")]
pub struct StateError {
    /// Current state
    pub from: RequestState,
    /// Requested state
    pub to: RequestState,
}

/// Check one transition against the lifecycle table
pub fn validate_transition(from: RequestState, to: RequestState) -> Result<(), StateError> {
    let allowed = match to {
        RequestState::Failed(_) => !from.is_terminal(),
        _ => from.successor() == Some(to),
    };
    if allowed {
        Ok(())
    } else {
        Err(StateError { from, to })
    }
}

/// Lifecycle of one request with the time each state was entered
#[derive(Debug)]
pub struct RequestLifecycle {
    request_id: String,
    started: Instant,
    history: Vec<(RequestState, Duration)>,
}

impl RequestLifecycle {
    /// Start in [`RequestState::Received`]
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            started: Instant::now(),
            history: vec![(RequestState::Received, Duration::ZERO)],
        }
    }

    /// Request id
    #[inline]
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> RequestState {
        self.history
            .last()
            .map_or(RequestState::Received, |(state, _)| *state)
    }

    /// States entered so far with their offset from the start
    #[must_use]
    pub fn history(&self) -> &[(RequestState, Duration)] {
        &self.history
    }

    /// Move to `to` if the table allows it
    pub fn advance(&mut self, to: RequestState) -> Result<(), StateError> {
        let from = self.state();
        validate_transition(from, to)?;
        let at = self.started.elapsed();
        tracing::debug!(
            request_id = %self.request_id,
            %from,
            %to,
            elapsed_ms = u64::try_from(at.as_millis()).unwrap_or(u64::MAX),
            "request state changed"
        );
        self.history.push((to, at));
        Ok(())
    }

    /// Record a failure; ignored once terminal
    pub fn fail(&mut self, kind: FailureKind) {
        if self.advance(RequestState::Failed(kind)).is_err() {
            tracing::debug!(request_id = %self.request_id, state = %self.state(), "failure after terminal state ignored");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestState::*;

    #[test]
    fn happy_path_in_order() {
        let mut lifecycle = RequestLifecycle::new("r1");
        for next in [Authenticated, Staged, Evaluated, Persisted, Acknowledged] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.state(), Acknowledged);
        assert_eq!(lifecycle.history().len(), 6);
    }

    #[test]
    fn skipping_a_stage_is_illegal() {
        assert_eq!(
            validate_transition(Authenticated, Evaluated),
            Err(StateError {
                from: Authenticated,
                to: Evaluated
            })
        );
        assert!(validate_transition(Staged, Staged).is_err());
        assert!(validate_transition(Persisted, Received).is_err());
    }

    #[test]
    fn failure_reachable_from_every_non_terminal_state() {
        for from in [Received, Authenticated, Staged, Evaluated, Persisted] {
            assert!(validate_transition(from, Failed(FailureKind::Timeout)).is_ok());
        }
        assert!(validate_transition(Acknowledged, Failed(FailureKind::Internal)).is_err());
        assert!(validate_transition(Failed(FailureKind::Timeout), Failed(FailureKind::Internal)).is_err());
    }

    #[test]
    fn fail_after_terminal_is_ignored() {
        let mut lifecycle = RequestLifecycle::new("r2");
        lifecycle.fail(FailureKind::InvalidIdentity);
        lifecycle.fail(FailureKind::Internal);
        assert_eq!(lifecycle.state(), Failed(FailureKind::InvalidIdentity));
        assert!(lifecycle.advance(Authenticated).is_err());
    }
}
