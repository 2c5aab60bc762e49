//! Gaze estimate values and the provider polled once per tick.

use serde::{Deserialize, Serialize};

use crate::geometry::{Vec2, Vec3};

/// Per-eye gaze intersection points in world coordinates.
///
/// Purely a value: it never refers back to the device that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeVector {
    pub left: Vec3,
    pub right: Vec3,
}

impl GazeVector {
    pub fn new(left: Vec3, right: Vec3) -> Self {
        Self { left, right }
    }

    /// Both eyes on the same point.
    pub fn both(point: Vec3) -> Self {
        Self {
            left: point,
            right: point,
        }
    }

    /// Shift each eye by its own planar offset.
    pub fn offset_by(self, left: Vec2, right: Vec2) -> Self {
        Self {
            left: self.left.offset_xy(left),
            right: self.right.offset_xy(right),
        }
    }
}

/// Source of per-tick gaze estimates.
///
/// `None` means the tracker produced no usable estimate this tick
/// (blink, tracking lost).
pub trait GazeProvider {
    fn gaze_estimate(&mut self) -> Option<GazeVector>;
}

impl<F> GazeProvider for F
where
    F: FnMut() -> Option<GazeVector>,
{
    fn gaze_estimate(&mut self) -> Option<GazeVector> {
        self()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_provider() {
        let mut ticks = 0;
        let mut provider = move || {
            ticks += 1;
            if ticks % 2 == 0 {
                None
            } else {
                Some(GazeVector::both(Vec3::new(0.0, 0.0, 5.0)))
            }
        };
        assert!(provider.gaze_estimate().is_some());
        assert!(provider.gaze_estimate().is_none());
    }

    #[test]
    fn test_offset_by_keeps_depth() {
        let g = GazeVector::both(Vec3::new(1.0, 2.0, 5.0))
            .offset_by(Vec2::new(0.5, 0.0), Vec2::new(0.0, -1.0));
        assert_eq!(g.left, Vec3::new(1.5, 2.0, 5.0));
        assert_eq!(g.right, Vec3::new(1.0, 1.0, 5.0));
    }
}
