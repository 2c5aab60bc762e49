//! Renderer-agnostic stimulus interface.
//!
//! The engine never touches rendering primitives; it toggles visibility
//! and pushes parameters through this trait. Whatever graphics layer hosts
//! the task implements it.

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::task::blocks::VisualField;

/// Things the engine can show or hide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StimulusKind {
    Instructions,
    FixationCross,
    CalibrationPoint,
    /// The random-dot aperture.
    Dots,
    ResponsePrompt,
    Feedback,
    ConfidencePrompt,
}

impl StimulusKind {
    pub const ALL: [Self; 7] = [
        Self::Instructions,
        Self::FixationCross,
        Self::CalibrationPoint,
        Self::Dots,
        Self::ResponsePrompt,
        Self::Feedback,
        Self::ConfidencePrompt,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instructions => "instructions",
            Self::FixationCross => "fixation-cross",
            Self::CalibrationPoint => "calibration-point",
            Self::Dots => "dots",
            Self::ResponsePrompt => "response-prompt",
            Self::Feedback => "feedback",
            Self::ConfidencePrompt => "confidence-prompt",
        }
    }
}

/// Parameters pushed to the presenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StimulusParameter {
    /// Fraction of coherently moving dots.
    Coherence(f32),
    /// Coherent motion direction in radians (0 = rightward).
    Direction(f32),
    /// Which eye(s) render the dots.
    ActiveField(VisualField),
    /// Signed horizontal displacement of the aperture.
    LateralOffset(f32),
    /// World position of the fixation cross or calibration point.
    TargetPosition(Vec3),
    /// Whether the last response was correct.
    FeedbackCorrect(bool),
    /// Screen index within an instruction or setup block.
    Page { block: String, index: usize },
}

pub trait StimulusPresenter {
    fn set_visible(&mut self, kind: StimulusKind, visible: bool);

    fn set_parameter(&mut self, parameter: StimulusParameter);

    /// Rendered half-width of the dot aperture, once the renderer knows it.
    fn aperture_half_width(&self) -> Option<f32>;

    fn set_coherence(&mut self, coherence: f32) {
        self.set_parameter(StimulusParameter::Coherence(coherence));
    }

    fn set_direction(&mut self, radians: f32) {
        self.set_parameter(StimulusParameter::Direction(radians));
    }

    /// Hide everything, e.g. between trials or on abort.
    fn hide_all(&mut self) {
        for kind in StimulusKind::ALL {
            self.set_visible(kind, false);
        }
    }
}
