//! Cooperative waits re-checked once per tick.
//!
//! A phase that is waiting stores one of these values; the engine polls it
//! each tick and yields back to the host loop while it is pending.

use std::time::{Duration, Instant};

use crate::input::Selection;

/// What a phase is waiting for.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wait {
    /// Ready once the deadline has passed.
    Until(Instant),
    /// Ready when the fixation gate fires; times out at `give_up_at`.
    Fixation { give_up_at: Option<Instant> },
    /// Ready on a left or right selection.
    Direction,
    /// Ready on a confirm selection.
    Confirm,
}

/// Result of polling a wait.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitStatus {
    Pending,
    Ready,
    /// Fixation was not sustained before the deadline.
    TimedOut,
}

/// Facts gathered on the current tick.
#[derive(Debug, Clone, Copy)]
pub struct TickFacts {
    pub now: Instant,
    pub fixated: bool,
    pub selection: Option<Selection>,
}

impl Wait {
    pub fn after(now: Instant, duration: Duration) -> Self {
        Self::Until(now + duration)
    }

    pub fn fixation(now: Instant, timeout: Option<Duration>) -> Self {
        Self::Fixation {
            give_up_at: timeout.map(|t| now + t),
        }
    }

    /// Whether this wait consumes input selections.
    pub fn accepts_input(&self) -> bool {
        matches!(self, Self::Direction | Self::Confirm)
    }

    pub fn poll(&self, facts: &TickFacts) -> WaitStatus {
        match self {
            Self::Until(deadline) => {
                if facts.now >= *deadline {
                    WaitStatus::Ready
                } else {
                    WaitStatus::Pending
                }
            }
            Self::Fixation { give_up_at } => {
                if facts.fixated {
                    WaitStatus::Ready
                } else if give_up_at.is_some_and(|t| facts.now >= t) {
                    WaitStatus::TimedOut
                } else {
                    WaitStatus::Pending
                }
            }
            Self::Direction => match facts.selection {
                Some(Selection::Left | Selection::Right) => WaitStatus::Ready,
                _ => WaitStatus::Pending,
            },
            Self::Confirm => match facts.selection {
                Some(Selection::Confirm { .. }) => WaitStatus::Ready,
                _ => WaitStatus::Pending,
            },
        }
    }
}
