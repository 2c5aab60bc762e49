//! World-space vector types and the dichoptic lateral offset.
//!
//! The offset places a stimulus at a requested visual angle from central
//! fixation as seen by each eye, compensating for the eye separation
//! rather than applying a naive screen-space shift.

use std::ops::{Add, Div, Mul, Sub};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ConfigError, EngineError};
use crate::task::blocks::{Presentation, VisualField};

// ── Vectors ─────────────────────────────────────────────────

/// 2D vector, used for gaze-plane positions and correction offsets.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s)
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;
    fn div(self, s: f32) -> Self {
        Self::new(self.x / s, self.y / s)
    }
}

/// 3D world-space point.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Projection onto the gaze plane (drops depth).
    pub fn xy(self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    /// Shift the x/y components, keeping depth.
    pub fn offset_xy(self, d: Vec2) -> Self {
        Self::new(self.x + d.x, self.y + d.y, self.z)
    }
}

// ── Dichoptic offset ────────────────────────────────────────

/// Lateral displacement placing a stimulus `offset_angle_deg` away from
/// central fixation as perceived by each eye.
///
/// `λ = atan((ipd/2) / view_distance)` is the half-angle subtended by the
/// eye gap; the usable angle is `ω = angle − λ`, and the displacement is
/// `view_distance·tan(ω) + half_width + ipd/2`. Callers must keep ω inside
/// (0, π/2); see [`DichopticGeometry::validate`].
pub fn dichoptic_offset(
    ipd: f64,
    view_distance: f64,
    offset_angle_deg: f64,
    stimulus_half_width: f64,
) -> f64 {
    let lambda = eye_gap_angle(ipd, view_distance);
    let omega = offset_angle_deg.to_radians() - lambda;
    view_distance * omega.tan() + stimulus_half_width + ipd / 2.0
}

fn eye_gap_angle(ipd: f64, view_distance: f64) -> f64 {
    ((ipd / 2.0) / view_distance).atan()
}

/// Session geometry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParameters {
    /// Inter-pupillary (camera) distance, metres.
    pub ipd: f64,
    /// Distance from the eyes to the stimulus plane, metres.
    pub view_distance: f64,
    /// Target eccentricity of lateralized stimuli, degrees.
    pub offset_angle_deg: f64,
}

impl Default for GeometryParameters {
    fn default() -> Self {
        Self {
            ipd: 0.064,
            view_distance: 5.0,
            offset_angle_deg: 10.0,
        }
    }
}

/// Geometry with two-phase initialisation of the stimulus half-width.
///
/// The aperture size is usually only known once the renderer reports it,
/// so the offset is first computed with a zero half-width and recomputed
/// exactly once when the size arrives.
#[derive(Debug, Clone)]
pub struct DichopticGeometry {
    params: GeometryParameters,
    half_width: Option<f64>,
    offset: f64,
}

impl DichopticGeometry {
    pub fn new(params: GeometryParameters) -> Self {
        let offset = dichoptic_offset(params.ipd, params.view_distance, params.offset_angle_deg, 0.0);
        Self {
            params,
            half_width: None,
            offset,
        }
    }

    /// Check that the configured angle keeps ω in (0, π/2).
    pub fn validate(params: &GeometryParameters) -> Result<(), ConfigError> {
        if !(params.ipd > 0.0) || !(params.view_distance > 0.0) {
            return Err(ConfigError::invalid(
                "geometry",
                "ipd and view_distance must be positive",
            ));
        }
        let omega = params.offset_angle_deg.to_radians() - eye_gap_angle(params.ipd, params.view_distance);
        if omega <= 0.0 || omega >= std::f64::consts::FRAC_PI_2 {
            return Err(ConfigError::OffsetAngleOutOfRange {
                angle_deg: params.offset_angle_deg,
                ipd: params.ipd,
                view_distance: params.view_distance,
            });
        }
        Ok(())
    }

    pub fn params(&self) -> &GeometryParameters {
        &self.params
    }

    pub fn stimulus_half_width(&self) -> Option<f64> {
        self.half_width
    }

    /// Lock in the stimulus half-width and recompute the offset.
    pub fn set_stimulus_half_width(&mut self, half_width: f64) -> Result<f64, EngineError> {
        if let Some(existing) = self.half_width {
            return Err(EngineError::GeometryLocked(existing));
        }
        self.half_width = Some(half_width);
        self.offset = dichoptic_offset(
            self.params.ipd,
            self.params.view_distance,
            self.params.offset_angle_deg,
            half_width,
        );
        info!(
            "Stimulus half-width {:.4} known, lateral offset now {:.4}",
            half_width, self.offset
        );
        Ok(self.offset)
    }

    /// Current lateral offset magnitude.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// Signed x displacement for a trial.
    pub fn lateral_position(&self, presentation: Presentation, field: VisualField) -> f64 {
        match (presentation, field) {
            (Presentation::Lateralized, VisualField::Left) => -self.offset,
            (Presentation::Lateralized, VisualField::Right) => self.offset,
            _ => 0.0,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────
