//! Fixation gate: sustained on-target gaze before motion onset.
//!
//! A sample is on target when either eye lies within a square tolerance
//! of the target on both axes; accepting either eye tolerates single-eye
//! noise and blinks. The run counter is a strict debounce: any miss
//! resets it to zero.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geometry::{Vec2, Vec3};
use crate::gaze::provider::GazeVector;

/// How long gaze must stay on target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixationWindow {
    /// Consecutive on-target samples (one per tick).
    Samples(u32),
    /// Consecutive on-target time, independent of frame rate.
    Duration(#[serde(with = "duration_ms")] Duration),
}

impl Default for FixationWindow {
    fn default() -> Self {
        Self::Samples(48)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Whether `point` is within `tolerance` of `target` on both axes.
pub fn within_tolerance(point: Vec2, target: Vec2, tolerance: f32) -> bool {
    (point.x - target.x).abs() <= tolerance && (point.y - target.y).abs() <= tolerance
}

#[derive(Debug, Clone)]
pub struct FixationGate {
    window: FixationWindow,
    on_target_samples: u32,
    on_target_time: Duration,
}

impl FixationGate {
    pub fn new(window: FixationWindow) -> Self {
        Self {
            window,
            on_target_samples: 0,
            on_target_time: Duration::ZERO,
        }
    }

    pub fn window(&self) -> FixationWindow {
        self.window
    }

    /// Current run of consecutive on-target samples.
    pub fn counter(&self) -> u32 {
        self.on_target_samples
    }

    /// Feed one gaze sample. Returns whether this sample was on target.
    pub fn sample(&mut self, gaze: &GazeVector, target: Vec3, tolerance: f32) -> bool {
        self.sample_for(Some(gaze), target, tolerance, Duration::ZERO)
    }

    /// Feed one tick of gaze, accumulating `dt` toward a time window.
    ///
    /// A missing estimate counts as a miss.
    pub fn sample_for(
        &mut self,
        gaze: Option<&GazeVector>,
        target: Vec3,
        tolerance: f32,
        dt: Duration,
    ) -> bool {
        let target = target.xy();
        let hit = gaze.is_some_and(|g| {
            within_tolerance(g.left.xy(), target, tolerance)
                || within_tolerance(g.right.xy(), target, tolerance)
        });

        if hit {
            self.on_target_samples = self.on_target_samples.saturating_add(1);
            self.on_target_time += dt;
        } else {
            if self.on_target_samples > 0 {
                debug!(
                    "Fixation run broken after {} samples",
                    self.on_target_samples
                );
            }
            self.reset();
        }
        hit
    }

    /// True once the window is satisfied; the run then starts over.
    pub fn evaluate(&mut self) -> bool {
        let satisfied = match self.window {
            FixationWindow::Samples(n) => self.on_target_samples >= n,
            FixationWindow::Duration(d) => self.on_target_samples > 0 && self.on_target_time >= d,
        };
        if satisfied {
            self.reset();
        }
        satisfied
    }

    /// Drop any partial run, e.g. when a trial is aborted.
    pub fn reset(&mut self) {
        self.on_target_samples = 0;
        self.on_target_time = Duration::ZERO;
    }
}

// ── Tests ───────────────────────────────────────────────────
