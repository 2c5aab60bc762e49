//! A single trial: its phases and the data collected along the way.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::input::Selection;
use crate::record::TrialRecord;
use crate::task::blocks::{MotionDirection, TrialType, VisualField};
use crate::task::staircase::{CoherencePair, ContextKey};

/// Per-trial phase, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TrialPhase {
    Fixation,
    Motion,
    Decision,
    Feedback,
    Confidence,
    End,
}

impl TrialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fixation => "fixation",
            Self::Motion => "motion",
            Self::Decision => "decision",
            Self::Feedback => "feedback",
            Self::Confidence => "confidence",
            Self::End => "end",
        }
    }
}

/// Session-relative timestamps (ms). Unset phases stay `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timestamps {
    pub trial_start: Option<f64>,
    pub fixation_start: Option<f64>,
    pub fixation_end: Option<f64>,
    pub motion_start: Option<f64>,
    pub motion_end: Option<f64>,
    pub reference_start: Option<f64>,
    pub reference_end: Option<f64>,
    pub feedback_start: Option<f64>,
    pub feedback_end: Option<f64>,
    pub confidence_start: Option<f64>,
    pub confidence_end: Option<f64>,
    pub trial_end: Option<f64>,
}

fn rt(start: Option<f64>, end: Option<f64>) -> Option<f64> {
    Some(end? - start?)
}

/// Mutable trial state while it runs.
#[derive(Debug, Clone)]
pub struct Trial {
    pub block_number: usize,
    pub block_name: String,
    /// Session-wide trial counter, 1-based.
    pub trial_number: usize,
    /// Position within the block, 0-based.
    pub trial_in_block: usize,
    pub trial_type: TrialType,
    pub field: VisualField,
    pub direction: MotionDirection,
    /// Set once at motion setup.
    pub coherence: Option<f64>,
    pub pair: Option<CoherencePair>,
    pub lateral_offset: f64,
    pub selection: Option<Selection>,
    pub correct: Option<bool>,
    pub confidence: Option<f32>,
    pub show_feedback: bool,
    pub ask_confidence: bool,
    pub aborted: bool,
    pub fixation_timed_out: bool,
    pub times: Timestamps,
}

impl Trial {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        block_number: usize,
        block_name: &str,
        trial_number: usize,
        trial_in_block: usize,
        trial_type: TrialType,
        field: VisualField,
        direction: MotionDirection,
    ) -> Self {
        Self {
            block_number,
            block_name: block_name.to_string(),
            trial_number,
            trial_in_block,
            trial_type,
            field,
            direction,
            coherence: None,
            pair: None,
            lateral_offset: 0.0,
            selection: None,
            correct: None,
            confidence: None,
            show_feedback: false,
            ask_confidence: false,
            aborted: false,
            fixation_timed_out: false,
            times: Timestamps::default(),
        }
    }

    pub fn context(&self) -> ContextKey {
        ContextKey::new(self.trial_type.presentation, self.field)
    }

    /// Store the direction selection and score it against the motion.
    pub fn respond(&mut self, selection: Selection) -> bool {
        let correct = match selection {
            Selection::Left => self.direction == MotionDirection::Left,
            Selection::Right => self.direction == MotionDirection::Right,
            Selection::Confirm { .. } => false,
        };
        self.selection = Some(selection);
        self.correct = Some(correct);
        correct
    }

    /// Freeze the trial into its output record.
    pub fn seal(&self) -> TrialRecord {
        let t = &self.times;
        let mut f: BTreeMap<String, Value> = BTreeMap::new();
        let mut put = |k: &str, v: Value| {
            f.insert(k.to_string(), v);
        };

        put("block_number", json!(self.block_number));
        put("block_name", json!(self.block_name));
        put("trial_number", json!(self.trial_number));
        put("trial_in_block", json!(self.trial_in_block));
        put("trial_type", json!(self.trial_type.record_name()));
        put("active_visual_field", json!(self.field.as_str()));
        put("context", json!(self.context().label()));
        put("motion_direction", json!(self.direction.as_str()));
        put("motion_direction_rad", json!(self.direction.radians()));
        put("coherence", json!(self.coherence));
        put("coherence_low", json!(self.pair.map(|p| p.low)));
        put("coherence_high", json!(self.pair.map(|p| p.high)));
        put("coherence_pair", json!(self.pair.map(|p| p.record_string())));
        put("lateral_offset", json!(self.lateral_offset));
        put("selection", json!(self.selection.map(|s| s.as_str())));
        put("correct_selection", json!(self.correct));
        put("confidence", json!(self.confidence));
        put("show_feedback", json!(self.show_feedback));
        put("aborted", json!(self.aborted));
        put("fixation_timed_out", json!(self.fixation_timed_out));

        put("trial_start", json!(t.trial_start));
        put("fixation_start", json!(t.fixation_start));
        put("fixation_end", json!(t.fixation_end));
        put("motion_start", json!(t.motion_start));
        put("motion_end", json!(t.motion_end));
        put("reference_start", json!(t.reference_start));
        put("reference_end", json!(t.reference_end));
        put("reference_rt", json!(rt(t.reference_start, t.reference_end)));
        put("feedback_start", json!(t.feedback_start));
        put("feedback_end", json!(t.feedback_end));
        put("confidence_start", json!(t.confidence_start));
        put("confidence_end", json!(t.confidence_end));
        put("confidence_rt", json!(rt(t.confidence_start, t.confidence_end)));
        put("trial_end", json!(t.trial_end));

        TrialRecord::from_fields(f)
    }
}
