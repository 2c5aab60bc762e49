//! Gaze input: provider interface, tracking health, fixation gating and
//! eye-tracker calibration.

pub mod calibration;
pub mod fixation;
pub mod health;
pub mod provider;

pub use calibration::{CalibrationEngine, CalibrationResult, CorrectionMode, CorrectionOffset, FixationPoint, FixationPointId};
pub use fixation::{FixationGate, FixationWindow};
pub use health::GazeHealth;
pub use provider::{GazeProvider, GazeVector};
