//! Tracking-health monitor for the gaze stream.
//!
//! Counts ticks without a usable estimate so a stalled tracker shows up
//! in the logs and the status snapshot instead of silently hanging the
//! fixation gate.

use tracing::{info, warn};

/// Consecutive empty ticks after which tracking is reported lost.
pub const LOST_AFTER_TICKS: u32 = 30;

#[derive(Debug, Clone, Default)]
pub struct GazeHealth {
    /// Consecutive ticks without an estimate.
    pub consecutive_lost: u32,
    /// Whether tracking is currently considered lost.
    pub tracking_lost: bool,
    /// Ticks with an estimate since session start.
    pub valid_ticks: u64,
    /// Ticks without an estimate since session start.
    pub lost_ticks: u64,
}

impl GazeHealth {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record whether this tick produced an estimate.
    pub fn update(&mut self, has_estimate: bool) {
        if has_estimate {
            self.valid_ticks += 1;
            if self.tracking_lost {
                info!(
                    "Gaze tracking recovered after {} empty ticks",
                    self.consecutive_lost
                );
            }
            self.consecutive_lost = 0;
            self.tracking_lost = false;
        } else {
            self.lost_ticks += 1;
            self.consecutive_lost += 1;
            if !self.tracking_lost && self.consecutive_lost > LOST_AFTER_TICKS {
                self.tracking_lost = true;
                warn!(
                    "Gaze tracking lost ({} consecutive ticks without estimate)",
                    self.consecutive_lost
                );
            }
        }
    }

    /// Fraction of ticks with an estimate, 1.0 before any tick.
    pub fn valid_ratio(&self) -> f64 {
        let total = self.valid_ticks + self.lost_ticks;
        if total == 0 {
            1.0
        } else {
            self.valid_ticks as f64 / total as f64
        }
    }
}
