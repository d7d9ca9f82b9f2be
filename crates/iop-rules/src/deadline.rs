//! Per-request deadline
//!
//! Created when a request is received and checked at stage boundaries;
//! once expired, no further stage starts and no transaction commits.

use std::time::{Duration, Instant};

/// Point in time after which work must stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    started: Instant,
    budget: Option<Duration>,
}

/// Deadline expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("request exceeded its {}s budget", .budget.as_secs())]
pub struct DeadlineExceeded {
    /// Configured budget
    pub budget: Duration,
}

impl Deadline {
    /// Deadline `budget` from now
    #[inline]
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget: Some(budget),
        }
    }

    /// Deadline that never expires
    #[inline]
    #[must_use]
    pub fn unbounded() -> Self {
        Self {
            started: Instant::now(),
            budget: None,
        }
    }

    /// Time since the deadline was created
    #[inline]
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left, `None` when unbounded
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.budget.map(|b| b.saturating_sub(self.elapsed()))
    }

    /// Check whether the budget is spent
    #[inline]
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.budget.is_some_and(|b| self.elapsed() >= b)
    }

    /// Fail when expired
    pub fn check(&self) -> Result<(), DeadlineExceeded> {
        match self.budget {
            Some(budget) if self.elapsed() >= budget => Err(DeadlineExceeded { budget }),
            _ => Ok(()),
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}
