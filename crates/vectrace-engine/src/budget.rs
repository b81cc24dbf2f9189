//! Time budgeting.
//!
//! [`ProcessingBudget`] is owned by the orchestrator and is the only
//! mutable view of time. Components receive a [`Deadline`] (a `Copy`
//! read-only instant) and check it cooperatively at loop boundaries.

use std::time::Duration;

use web_time::Instant;

/// Read-only point in time after which cooperative work should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    #[must_use]
    pub const fn none() -> Self {
        Self { at: None }
    }

    /// A deadline at a fixed instant.
    #[must_use]
    pub const fn at(instant: Instant) -> Self {
        Self { at: Some(instant) }
    }

    /// A deadline `duration` from now.
    #[must_use]
    pub fn after(duration: Duration) -> Self {
        Self::at(Instant::now() + duration)
    }

    /// The earlier of two deadlines.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self.at, other.at) {
            (Some(a), Some(b)) => Self::at(a.min(b)),
            (Some(a), None) | (None, Some(a)) => Self::at(a),
            (None, None) => Self::none(),
        }
    }

    /// Whether the deadline has passed.
    #[must_use]
    pub fn expired(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left, or `None` for an unbounded deadline.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}

/// Total time allotted to one invocation and how much has been used.
///
/// `consumed` is derived from the wall clock and never reported above
/// `total`; `remaining` only ever decreases.
#[derive(Debug, Clone)]
pub struct ProcessingBudget {
    total: Duration,
    started: Instant,
}

impl ProcessingBudget {
    /// Start a budget now.
    #[must_use]
    pub fn start(total: Duration) -> Self {
        Self {
            total,
            started: Instant::now(),
        }
    }

    #[must_use]
    pub const fn total(&self) -> Duration {
        self.total
    }

    #[must_use]
    pub const fn started(&self) -> Instant {
        self.started
    }

    /// Wall-clock time since the budget started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time charged against the budget, capped at `total`.
    #[must_use]
    pub fn consumed(&self) -> Duration {
        self.elapsed().min(self.total)
    }

    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.elapsed())
    }

    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Deadline at the end of the budget.
    #[must_use]
    pub fn deadline(&self) -> Deadline {
        Deadline::at(self.started + self.total)
    }

    /// Deadline for one strategy slice: `slice` from now, but never past
    /// the end of the budget.
    #[must_use]
    pub fn slice(&self, slice: Duration) -> Deadline {
        Deadline::after(slice).min(self.deadline())
    }
}
