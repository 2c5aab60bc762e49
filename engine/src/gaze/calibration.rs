//! Eye-tracker calibration: fixation path, outlier-filtered per-point
//! corrections and gaze correction.
//!
//! Each pass walks a fixed path of fixation points, collects raw gaze
//! samples per point and recomputes all corrections from scratch. Before
//! the first successful computation gaze passes through unmodified.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::geometry::{Vec2, Vec3};
use crate::gaze::provider::GazeVector;

/// Samples further than this many standard deviations from the mean are dropped.
pub const OUTLIER_SIGMA: f32 = 2.0;

// ── Fixation points ─────────────────────────────────────────

/// Calibration target identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FixationPointId {
    Center,
    Top,
    TopRight,
    Right,
    BottomRight,
    Bottom,
    BottomLeft,
    Left,
    TopLeft,
}

impl FixationPointId {
    pub const OUTER: [Self; 8] = [
        Self::Top,
        Self::TopRight,
        Self::Right,
        Self::BottomRight,
        Self::Bottom,
        Self::BottomLeft,
        Self::Left,
        Self::TopLeft,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Center => "center",
            Self::Top => "top",
            Self::TopRight => "top-right",
            Self::Right => "right",
            Self::BottomRight => "bottom-right",
            Self::Bottom => "bottom",
            Self::BottomLeft => "bottom-left",
            Self::Left => "left",
            Self::TopLeft => "top-left",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "center" => Some(Self::Center),
            "top" => Some(Self::Top),
            "top-right" => Some(Self::TopRight),
            "right" => Some(Self::Right),
            "bottom-right" => Some(Self::BottomRight),
            "bottom" => Some(Self::Bottom),
            "bottom-left" => Some(Self::BottomLeft),
            "left" => Some(Self::Left),
            "top-left" => Some(Self::TopLeft),
            _ => None,
        }
    }

    /// Unit direction from the centre (zero for `Center`).
    pub fn direction(&self) -> Vec2 {
        let d = std::f32::consts::FRAC_1_SQRT_2;
        match self {
            Self::Center => Vec2::ZERO,
            Self::Top => Vec2::new(0.0, 1.0),
            Self::TopRight => Vec2::new(d, d),
            Self::Right => Vec2::new(1.0, 0.0),
            Self::BottomRight => Vec2::new(d, -d),
            Self::Bottom => Vec2::new(0.0, -1.0),
            Self::BottomLeft => Vec2::new(-d, -d),
            Self::Left => Vec2::new(-1.0, 0.0),
            Self::TopLeft => Vec2::new(-d, d),
        }
    }
}

/// One node of a calibration path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixationPoint {
    pub id: FixationPointId,
    pub direction: Vec2,
    pub radius: f32,
}

impl FixationPoint {
    pub fn new(id: FixationPointId, radius: f32) -> Self {
        Self {
            id,
            direction: id.direction(),
            radius,
        }
    }

    /// World position of the target around the central fixation `origin`.
    pub fn world_position(&self, origin: Vec3) -> Vec3 {
        origin.offset_xy(self.direction * self.radius)
    }
}

/// Canonical path: centre, the eight outer points clockwise from the top,
/// then back to centre. Samples from both centre visits pool together.
pub fn calibration_path(radius: f32) -> Vec<FixationPoint> {
    std::iter::once(FixationPointId::Center)
        .chain(FixationPointId::OUTER)
        .chain(std::iter::once(FixationPointId::Center))
        .map(|id| FixationPoint::new(id, radius))
        .collect()
}

// ── Corrections ─────────────────────────────────────────────

/// Per-eye planar correction added to raw gaze.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrectionOffset {
    pub left: Vec2,
    pub right: Vec2,
}

impl CorrectionOffset {
    pub const ZERO: Self = Self {
        left: Vec2::ZERO,
        right: Vec2::ZERO,
    };

    pub fn is_finite(&self) -> bool {
        self.left.is_finite() && self.right.is_finite()
    }
}

/// How corrections are applied to raw gaze.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Correction of the nearest calibration target.
    #[default]
    Nearest,
    /// Inverse-squared-distance blend of all valid corrections.
    InverseSquare,
}

/// Output of one calibration computation.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationResult {
    pub per_point: BTreeMap<FixationPointId, CorrectionOffset>,
    pub global: CorrectionOffset,
    /// Points with no samples left after filtering; their entry is zero.
    pub degenerate: Vec<FixationPointId>,
}

impl CalibrationResult {
    pub fn is_degenerate(&self, id: FixationPointId) -> bool {
        self.degenerate.contains(&id)
    }

    pub fn has_degenerate_points(&self) -> bool {
        !self.degenerate.is_empty()
    }
}

/// Mean of `points` after dropping samples beyond 2σ on either axis.
///
/// Returns `None` when nothing survives (or nothing was given), so callers
/// never average an empty set.
pub fn filtered_mean(points: &[Vec2]) -> Option<Vec2> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f32;
    let mean = points.iter().fold(Vec2::ZERO, |acc, p| acc + *p) / n;
    let var = points.iter().fold(Vec2::ZERO, |acc, p| {
        let d = *p - mean;
        acc + Vec2::new(d.x * d.x, d.y * d.y)
    }) / n;
    let limit = Vec2::new(var.x.sqrt() * OUTLIER_SIGMA, var.y.sqrt() * OUTLIER_SIGMA);

    let (sum, kept) = points
        .iter()
        .filter(|p| (p.x - mean.x).abs() <= limit.x && (p.y - mean.y).abs() <= limit.y)
        .fold((Vec2::ZERO, 0usize), |(sum, k), p| (sum + *p, k + 1));

    if kept == 0 {
        None
    } else {
        Some(sum / kept as f32)
    }
}

// ── Engine ──────────────────────────────────────────────────

/// Owns calibration samples and the correction table.
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    origin: Vec3,
    mode: CorrectionMode,
    path: Vec<FixationPoint>,
    cursor: usize,
    samples: BTreeMap<FixationPointId, Vec<GazeVector>>,
    targets: BTreeMap<FixationPointId, Vec3>,
    result: Option<CalibrationResult>,
    passes: u32,
}

impl CalibrationEngine {
    /// `origin` is the central fixation position the path is laid around.
    pub fn new(origin: Vec3, mode: CorrectionMode) -> Self {
        Self {
            origin,
            mode,
            path: Vec::new(),
            cursor: 0,
            samples: BTreeMap::new(),
            targets: BTreeMap::new(),
            result: None,
            passes: 0,
        }
    }

    /// Start a new pass, discarding samples from any previous pass.
    pub fn begin_pass(&mut self, path: &[FixationPoint]) {
        self.path = path.to_vec();
        self.cursor = 0;
        self.samples.clear();
        self.targets = path
            .iter()
            .map(|p| (p.id, p.world_position(self.origin)))
            .collect();
        for id in self.targets.keys() {
            self.samples.insert(*id, Vec::new());
        }
        self.passes += 1;
        info!(
            "Calibration pass {} started ({} path nodes)",
            self.passes,
            self.path.len()
        );
    }

    pub fn passes(&self) -> u32 {
        self.passes
    }

    /// Point currently being shown, if the pass is still running.
    pub fn current_point(&self) -> Option<&FixationPoint> {
        self.path.get(self.cursor)
    }

    /// Move to the next path node; returns it if there is one.
    pub fn advance(&mut self) -> Option<&FixationPoint> {
        if self.cursor < self.path.len() {
            self.cursor += 1;
        }
        self.path.get(self.cursor)
    }

    pub fn is_pass_complete(&self) -> bool {
        !self.path.is_empty() && self.cursor >= self.path.len()
    }

    /// World position of a target in the current pass.
    pub fn target_position(&self, id: FixationPointId) -> Option<Vec3> {
        self.targets.get(&id).copied()
    }

    /// Store a raw sample for `id`. Ignored if `id` is not on the path.
    pub fn record_sample(&mut self, id: FixationPointId, gaze: GazeVector) -> bool {
        match self.samples.get_mut(&id) {
            Some(list) => {
                list.push(gaze);
                true
            }
            None => {
                debug!("Calibration sample for {} outside current path", id.as_str());
                false
            }
        }
    }

    pub fn sample_count(&self, id: FixationPointId) -> usize {
        self.samples.get(&id).map_or(0, Vec::len)
    }

    /// Recompute every correction from the samples of the current pass.
    pub fn compute(&mut self) -> &CalibrationResult {
        let mut per_point = BTreeMap::new();
        let mut degenerate = Vec::new();

        for (id, target) in &self.targets {
            let samples = self.samples.get(id).map(Vec::as_slice).unwrap_or(&[]);
            let left: Vec<Vec2> = samples.iter().map(|g| g.left.xy()).collect();
            let right: Vec<Vec2> = samples.iter().map(|g| g.right.xy()).collect();

            let correction = match (filtered_mean(&left), filtered_mean(&right)) {
                (Some(l), Some(r)) => CorrectionOffset {
                    left: target.xy() - l,
                    right: target.xy() - r,
                },
                _ => {
                    warn!(
                        "Calibration point {} has no usable samples ({} raw)",
                        id.as_str(),
                        samples.len()
                    );
                    degenerate.push(*id);
                    CorrectionOffset::ZERO
                }
            };
            per_point.insert(*id, correction);
        }

        let valid: Vec<&CorrectionOffset> = per_point
            .iter()
            .filter(|(id, _)| !degenerate.contains(id))
            .map(|(_, c)| c)
            .collect();
        let global = if valid.is_empty() {
            CorrectionOffset::ZERO
        } else {
            let n = valid.len() as f32;
            let (l, r) = valid
                .iter()
                .fold((Vec2::ZERO, Vec2::ZERO), |(l, r), c| (l + c.left, r + c.right));
            CorrectionOffset {
                left: l / n,
                right: r / n,
            }
        };

        info!(
            "Calibration computed: {} points, {} degenerate, global L({:.4}, {:.4}) R({:.4}, {:.4})",
            per_point.len(),
            degenerate.len(),
            global.left.x,
            global.left.y,
            global.right.x,
            global.right.y,
        );

        self.result.insert(CalibrationResult {
            per_point,
            global,
            degenerate,
        })
    }

    pub fn result(&self) -> Option<&CalibrationResult> {
        self.result.as_ref()
    }

    pub fn has_calculated_offsets(&self) -> bool {
        self.result.is_some()
    }

    /// Apply the correction table to a raw gaze estimate.
    pub fn correct(&self, gaze: GazeVector) -> GazeVector {
        let Some(result) = &self.result else {
            return gaze;
        };
        let left = self.eye_correction(result, gaze.left.xy(), |c| c.left);
        let right = self.eye_correction(result, gaze.right.xy(), |c| c.right);
        gaze.offset_by(left, right)
    }

    fn eye_correction(
        &self,
        result: &CalibrationResult,
        raw: Vec2,
        pick: impl Fn(&CorrectionOffset) -> Vec2,
    ) -> Vec2 {
        match self.mode {
            CorrectionMode::Nearest => {
                let nearest = self
                    .targets
                    .iter()
                    .min_by(|a, b| {
                        raw.distance_squared(a.1.xy())
                            .total_cmp(&raw.distance_squared(b.1.xy()))
                    })
                    .map(|(id, _)| *id);
                match nearest {
                    Some(id) if !result.is_degenerate(id) => result
                        .per_point
                        .get(&id)
                        .map_or(pick(&result.global), &pick),
                    _ => pick(&result.global),
                }
            }
            CorrectionMode::InverseSquare => {
                let mut weighted = Vec2::ZERO;
                let mut total = 0.0f32;
                for (id, target) in &self.targets {
                    if result.is_degenerate(*id) {
                        continue;
                    }
                    let Some(c) = result.per_point.get(id) else {
                        continue;
                    };
                    let d2 = raw.distance_squared(target.xy());
                    if d2 < 1e-12 {
                        return pick(c);
                    }
                    let w = 1.0 / d2;
                    weighted = weighted + pick(c) * w;
                    total += w;
                }
                if total > 0.0 {
                    weighted / total
                } else {
                    pick(&result.global)
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const ORIGIN: Vec3 = Vec3 {
        x: 0.0,
        y: 0.0,
        z: 5.0,
    };

    fn engine(mode: CorrectionMode) -> CalibrationEngine {
        let mut e = CalibrationEngine::new(ORIGIN, mode);
        e.begin_pass(&calibration_path(1.0));
        e
    }

    fn feed_biased(e: &mut CalibrationEngine, bias: Vec2, count: usize) {
        for id in std::iter::once(FixationPointId::Center).chain(FixationPointId::OUTER) {
            let target = e.target_position(id).unwrap();
            for _ in 0..count {
                e.record_sample(id, GazeVector::both(target.offset_xy(bias)));
            }
        }
    }

    #[test]
    fn test_path_returns_to_center() {
        let path = calibration_path(1.0);
        assert_eq!(path.len(), 10);
        assert_eq!(path[0].id, FixationPointId::Center);
        assert_eq!(path[9].id, FixationPointId::Center);
        assert_eq!(path[1].id, FixationPointId::Top);
    }

    #[test]
    fn test_id_roundtrip() {
        for id in std::iter::once(FixationPointId::Center).chain(FixationPointId::OUTER) {
            assert_eq!(FixationPointId::from_str(id.as_str()), Some(id));
        }
        assert_eq!(FixationPointId::from_str("middle"), None);
    }

    #[test]
    fn test_zero_samples_gives_sentinel() {
        let mut e = engine(CorrectionMode::Nearest);
        let result = e.compute().clone();
        assert_eq!(result.degenerate.len(), 9);
        for c in result.per_point.values() {
            assert_eq!(*c, CorrectionOffset::ZERO);
            assert!(c.is_finite());
        }
        assert_eq!(result.global, CorrectionOffset::ZERO);
    }

    #[test]
    fn test_samples_on_target_give_zero_correction() {
        let mut e = engine(CorrectionMode::Nearest);
        feed_biased(&mut e, Vec2::ZERO, 12);
        let result = e.compute();
        assert!(!result.has_degenerate_points());
        for c in result.per_point.values() {
            assert!(c.left.length() < 1e-6);
            assert!(c.right.length() < 1e-6);
        }
    }

    #[test]
    fn test_outlier_is_filtered() {
        let mut points: Vec<Vec2> = (0..20).map(|i| Vec2::new(0.01 * (i % 3) as f32, 0.0)).collect();
        points.push(Vec2::new(10.0, 10.0));
        let mean = filtered_mean(&points).unwrap();
        assert!(mean.x < 0.05, "outlier leaked into mean: {mean:?}");
        assert!(mean.y.abs() < 1e-6);
        assert!(filtered_mean(&[]).is_none());
    }

    #[test]
    fn test_constant_bias_recovered() {
        let mut e = engine(CorrectionMode::Nearest);
        let bias = Vec2::new(0.2, -0.1);
        feed_biased(&mut e, bias, 8);
        let result = e.compute().clone();
        assert!((result.global.left.x + 0.2).abs() < 1e-5);
        assert!((result.global.right.y - 0.1).abs() < 1e-5);

        let raw = GazeVector::both(Vec3::new(1.0, 0.0, 5.0).offset_xy(bias));
        let corrected = e.correct(raw);
        assert!((corrected.left.x - 1.0).abs() < 1e-5);
        assert!(corrected.left.y.abs() < 1e-5);
        assert_eq!(corrected.left.z, 5.0);
    }

    #[test]
    fn test_raw_gaze_before_first_calibration() {
        let e = CalibrationEngine::new(ORIGIN, CorrectionMode::InverseSquare);
        let raw = GazeVector::both(Vec3::new(0.3, 0.4, 5.0));
        assert_eq!(e.correct(raw), raw);
    }

    #[test]
    fn test_degenerate_point_falls_back_to_global() {
        let mut e = engine(CorrectionMode::Nearest);
        let bias = Vec2::new(0.1, 0.0);
        for id in FixationPointId::OUTER {
            if id == FixationPointId::Right {
                continue;
            }
            let target = e.target_position(id).unwrap();
            for _ in 0..5 {
                e.record_sample(id, GazeVector::both(target.offset_xy(bias)));
            }
        }
        let result = e.compute().clone();
        assert!(result.is_degenerate(FixationPointId::Right));
        assert!(result.is_degenerate(FixationPointId::Center));
        assert!((result.global.left.x + 0.1).abs() < 1e-5);

        let near_right = GazeVector::both(Vec3::new(1.0, 0.0, 5.0));
        let corrected = e.correct(near_right);
        assert!((corrected.left.x - 0.9).abs() < 1e-5);
    }

    #[test]
    fn test_inverse_square_blends_smoothly() {
        let mut e = engine(CorrectionMode::InverseSquare);
        let bias = Vec2::new(0.0, 0.05);
        feed_biased(&mut e, bias, 6);
        e.compute();
        // A uniform bias blends to the same correction everywhere.
        let raw = GazeVector::both(Vec3::new(0.37, -0.52, 5.0));
        let corrected = e.correct(raw);
        assert!((corrected.right.y - (-0.52 - 0.05)).abs() < 1e-5);

        // Exactly on a target uses that target's correction.
        let on_top = GazeVector::both(e.target_position(FixationPointId::Top).unwrap());
        let c = e.correct(on_top);
        assert!((c.left.y - (1.0 - 0.05)).abs() < 1e-5);
    }

    #[test]
    fn test_path_cursor() {
        let mut e = engine(CorrectionMode::Nearest);
        assert_eq!(e.current_point().map(|p| p.id), Some(FixationPointId::Center));
        for _ in 0..9 {
            assert!(e.advance().is_some());
        }
        assert!(!e.is_pass_complete());
        assert!(e.advance().is_none());
        assert!(e.is_pass_complete());
        assert!(e.advance().is_none());
    }

    #[test]
    fn test_new_pass_recomputes_wholesale() {
        let mut e = engine(CorrectionMode::Nearest);
        feed_biased(&mut e, Vec2::new(0.3, 0.0), 4);
        e.compute();
        e.begin_pass(&calibration_path(1.0));
        assert_eq!(e.sample_count(FixationPointId::Top), 0);
        feed_biased(&mut e, Vec2::ZERO, 4);
        let result = e.compute();
        assert!(result.global.left.length() < 1e-6);
        assert_eq!(e.passes(), 2);
    }
}
