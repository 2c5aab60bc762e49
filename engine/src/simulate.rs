//! Headless simulation: a presenter that only records display state and a
//! simulated participant that looks at what is shown and answers prompts.
//!
//! Used by the headless runner and the integration tests. The presenter
//! and the participant share the display state, so gaze follows the
//! fixation cross or calibration point and responses follow the prompts.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::gaze::{GazeProvider, GazeVector};
use crate::geometry::{Vec2, Vec3};
use crate::input::{InputSource, InputState};
use crate::task::blocks::VisualField;
use crate::task::stimulus::{StimulusKind, StimulusParameter, StimulusPresenter};

// ── Display state ───────────────────────────────────────────

/// What a headless display would currently show.
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    pub visible: BTreeSet<StimulusKind>,
    /// How many times each kind has been made visible.
    pub onsets: BTreeMap<StimulusKind, u64>,
    pub target: Option<Vec3>,
    pub coherence: f32,
    pub direction: f32,
    pub active_field: Option<VisualField>,
    pub lateral_offset: f32,
    pub feedback_correct: Option<bool>,
    pub page: Option<(String, usize)>,
}

impl DisplayState {
    pub fn is_visible(&self, kind: StimulusKind) -> bool {
        self.visible.contains(&kind)
    }

    pub fn onset_count(&self, kind: StimulusKind) -> u64 {
        self.onsets.get(&kind).copied().unwrap_or(0)
    }
}

pub type SharedDisplay = Arc<Mutex<DisplayState>>;

fn lock(display: &SharedDisplay) -> MutexGuard<'_, DisplayState> {
    display.lock().unwrap_or_else(|e| e.into_inner())
}

/// Presenter with no renderer behind it.
pub struct HeadlessPresenter {
    display: SharedDisplay,
    aperture_half_width: Option<f32>,
}

impl HeadlessPresenter {
    pub fn new(aperture_half_width: Option<f32>) -> Self {
        Self {
            display: SharedDisplay::default(),
            aperture_half_width,
        }
    }

    /// Handle for observers (participant, tests).
    pub fn display(&self) -> SharedDisplay {
        Arc::clone(&self.display)
    }
}

impl StimulusPresenter for HeadlessPresenter {
    fn set_visible(&mut self, kind: StimulusKind, visible: bool) {
        let mut d = lock(&self.display);
        if visible {
            if d.visible.insert(kind) {
                *d.onsets.entry(kind).or_insert(0) += 1;
            }
        } else {
            d.visible.remove(&kind);
        }
    }

    fn set_parameter(&mut self, parameter: StimulusParameter) {
        let mut d = lock(&self.display);
        match parameter {
            StimulusParameter::Coherence(c) => d.coherence = c,
            StimulusParameter::Direction(r) => d.direction = r,
            StimulusParameter::ActiveField(f) => d.active_field = Some(f),
            StimulusParameter::LateralOffset(x) => d.lateral_offset = x,
            StimulusParameter::TargetPosition(p) => d.target = Some(p),
            StimulusParameter::FeedbackCorrect(c) => d.feedback_correct = Some(c),
            StimulusParameter::Page { block, index } => d.page = Some((block, index)),
        }
    }

    fn aperture_half_width(&self) -> Option<f32> {
        self.aperture_half_width
    }
}

// ── Participant ─────────────────────────────────────────────

/// How the simulated participant answers direction prompts.
#[derive(Debug, Clone)]
pub enum ResponsePolicy {
    AlwaysCorrect,
    /// Correct/incorrect per decision in order, then always correct.
    Scripted(VecDeque<bool>),
    /// Weibull psychometric function of coherence.
    Psychometric { threshold: f64, slope: f64, lapse: f64 },
}

impl ResponsePolicy {
    /// Probability of a correct answer at `coherence`.
    pub fn p_correct(&self, coherence: f64) -> f64 {
        match self {
            Self::Psychometric {
                threshold,
                slope,
                lapse,
            } => {
                let growth = 1.0 - (-(coherence.max(0.0) / threshold).powf(*slope)).exp();
                0.5 + (0.5 - lapse) * growth
            }
            _ => 1.0,
        }
    }
}

/// Gaze behaviour of the simulated participant.
#[derive(Debug, Clone, Copy)]
pub struct GazeBehaviour {
    /// Uniform per-axis noise amplitude.
    pub noise: f32,
    /// Systematic tracker error per eye, removed by calibration.
    pub bias_left: Vec2,
    pub bias_right: Vec2,
    /// When false the participant never looks at targets.
    pub attentive: bool,
    /// When false the tracker reports no estimate.
    pub tracked: bool,
}

impl Default for GazeBehaviour {
    fn default() -> Self {
        Self {
            noise: 0.01,
            bias_left: Vec2::ZERO,
            bias_right: Vec2::ZERO,
            attentive: true,
            tracked: true,
        }
    }
}

/// Gaze half of the simulated participant.
pub struct SimulatedGaze {
    display: SharedDisplay,
    behaviour: GazeBehaviour,
    rng: StdRng,
    rest: Vec3,
}

impl SimulatedGaze {
    pub fn new(display: SharedDisplay, behaviour: GazeBehaviour, seed: u64) -> Self {
        Self {
            display,
            behaviour,
            rng: StdRng::seed_from_u64(seed),
            rest: Vec3::new(2.0, 2.0, -5.0),
        }
    }

    pub fn set_behaviour(&mut self, behaviour: GazeBehaviour) {
        self.behaviour = behaviour;
    }

    fn jitter(&mut self) -> Vec2 {
        let n = self.behaviour.noise;
        if n <= 0.0 {
            return Vec2::ZERO;
        }
        Vec2::new(self.rng.gen_range(-n..=n), self.rng.gen_range(-n..=n))
    }
}

impl GazeProvider for SimulatedGaze {
    fn gaze_estimate(&mut self) -> Option<GazeVector> {
        if !self.behaviour.tracked {
            return None;
        }
        let looking_at = {
            let d = lock(&self.display);
            let target_shown =
                d.is_visible(StimulusKind::FixationCross) || d.is_visible(StimulusKind::CalibrationPoint);
            match d.target {
                Some(t) if target_shown && self.behaviour.attentive => t,
                _ => self.rest,
            }
        };
        let left = self.behaviour.bias_left + self.jitter();
        let right = self.behaviour.bias_right + self.jitter();
        Some(GazeVector::both(looking_at).offset_by(left, right))
    }
}

/// Response half of the simulated participant.
///
/// Each prompt is answered once, after `reaction_ticks`, with a one-tick
/// press followed by a release.
pub struct SimulatedResponder {
    display: SharedDisplay,
    policy: ResponsePolicy,
    rng: StdRng,
    reaction_ticks: u32,
    waited: u32,
    answered: BTreeMap<StimulusKind, u64>,
    holding: bool,
    decisions: usize,
}

impl SimulatedResponder {
    pub fn new(display: SharedDisplay, policy: ResponsePolicy, seed: u64) -> Self {
        Self {
            display,
            policy,
            rng: StdRng::seed_from_u64(seed),
            reaction_ticks: 3,
            waited: 0,
            answered: BTreeMap::new(),
            holding: false,
            decisions: 0,
        }
    }

    pub fn with_reaction_ticks(mut self, ticks: u32) -> Self {
        self.reaction_ticks = ticks;
        self
    }

    /// Direction prompts answered so far.
    pub fn decisions(&self) -> usize {
        self.decisions
    }

    fn answer_correctly(&mut self, coherence: f64) -> bool {
        let p = self.policy.p_correct(coherence).clamp(0.0, 1.0);
        match &mut self.policy {
            ResponsePolicy::AlwaysCorrect => true,
            ResponsePolicy::Scripted(answers) => answers.pop_front().unwrap_or(true),
            ResponsePolicy::Psychometric { .. } => self.rng.gen_bool(p),
        }
    }
}

impl InputSource for SimulatedResponder {
    fn poll(&mut self) -> InputState {
        if self.holding {
            self.holding = false;
            return InputState::neutral();
        }

        let (prompt, onset, coherence, rightward) = {
            let d = lock(&self.display);
            let prompt = [
                StimulusKind::ResponsePrompt,
                StimulusKind::ConfidencePrompt,
                StimulusKind::Instructions,
            ]
            .into_iter()
            .find(|k| d.is_visible(*k));
            match prompt {
                Some(k) => (k, d.onset_count(k), d.coherence, d.direction.cos() > 0.0),
                None => {
                    self.waited = 0;
                    return InputState::neutral();
                }
            }
        };

        if self.answered.get(&prompt) == Some(&onset) {
            return InputState::neutral();
        }
        self.waited += 1;
        if self.waited < self.reaction_ticks {
            return InputState::neutral();
        }
        self.waited = 0;
        self.answered.insert(prompt, onset);
        self.holding = true;

        match prompt {
            StimulusKind::ResponsePrompt => {
                self.decisions += 1;
                let correct = self.answer_correctly(f64::from(coherence));
                if correct == rightward {
                    InputState::right()
                } else {
                    InputState::left()
                }
            }
            StimulusKind::ConfidencePrompt => {
                InputState::confirm(self.policy.p_correct(f64::from(coherence)) as f32)
            }
            _ => InputState::confirm(0.5),
        }
    }
}

/// Gaze and response halves sharing one display.
pub struct SimulatedParticipant {
    pub gaze: SimulatedGaze,
    pub responder: SimulatedResponder,
}

impl SimulatedParticipant {
    pub fn new(display: SharedDisplay, policy: ResponsePolicy, seed: u64) -> Self {
        Self {
            gaze: SimulatedGaze::new(Arc::clone(&display), GazeBehaviour::default(), seed),
            responder: SimulatedResponder::new(display, policy, seed.wrapping_add(1)),
        }
    }

    pub fn with_gaze(mut self, behaviour: GazeBehaviour) -> Self {
        self.gaze.set_behaviour(behaviour);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presenter_tracks_visibility_and_onsets() {
        let mut p = HeadlessPresenter::new(None);
        let display = p.display();
        p.set_visible(StimulusKind::Dots, true);
        p.set_visible(StimulusKind::Dots, true);
        p.set_visible(StimulusKind::Dots, false);
        p.set_visible(StimulusKind::Dots, true);
        p.set_coherence(0.3);
        let d = display.lock().unwrap();
        assert!(d.is_visible(StimulusKind::Dots));
        assert_eq!(d.onset_count(StimulusKind::Dots), 2);
        assert_eq!(d.coherence, 0.3);
    }

    #[test]
    fn test_hide_all() {
        let mut p = HeadlessPresenter::new(None);
        let display = p.display();
        p.set_visible(StimulusKind::FixationCross, true);
        p.set_visible(StimulusKind::Feedback, true);
        p.hide_all();
        assert!(display.lock().unwrap().visible.is_empty());
    }

    #[test]
    fn test_gaze_follows_target() {
        let mut p = HeadlessPresenter::new(None);
        let target = Vec3::new(0.5, -0.5, -5.0);
        p.set_parameter(StimulusParameter::TargetPosition(target));
        let behaviour = GazeBehaviour {
            noise: 0.0,
            bias_left: Vec2::new(0.1, 0.0),
            ..GazeBehaviour::default()
        };
        let mut gaze = SimulatedGaze::new(p.display(), behaviour, 1);

        // Nothing shown: resting elsewhere.
        let g = gaze.gaze_estimate().unwrap();
        assert!(g.right.x > 1.0);

        p.set_visible(StimulusKind::FixationCross, true);
        let g = gaze.gaze_estimate().unwrap();
        assert!((g.right.x - 0.5).abs() < 1e-6);
        assert!((g.left.x - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_responder_answers_each_prompt_once() {
        let mut p = HeadlessPresenter::new(None);
        p.set_direction(0.0);
        let mut r = SimulatedResponder::new(p.display(), ResponsePolicy::AlwaysCorrect, 1).with_reaction_ticks(1);

        assert!(r.poll().is_neutral());
        p.set_visible(StimulusKind::ResponsePrompt, true);
        assert!(r.poll().right);
        assert!(r.poll().is_neutral());
        assert!(r.poll().is_neutral());
        assert_eq!(r.decisions(), 1);

        // A fresh onset is answered again.
        p.set_visible(StimulusKind::ResponsePrompt, false);
        p.set_direction(std::f32::consts::PI);
        p.set_visible(StimulusKind::ResponsePrompt, true);
        assert!(r.poll().left);
    }

    #[test]
    fn test_scripted_policy_can_answer_wrong() {
        let mut p = HeadlessPresenter::new(None);
        p.set_direction(0.0);
        let policy = ResponsePolicy::Scripted(VecDeque::from(vec![false]));
        let mut r = SimulatedResponder::new(p.display(), policy, 1).with_reaction_ticks(1);
        p.set_visible(StimulusKind::ResponsePrompt, true);
        assert!(r.poll().left);
    }

    #[test]
    fn test_psychometric_bounds() {
        let policy = ResponsePolicy::Psychometric {
            threshold: 0.15,
            slope: 2.0,
            lapse: 0.02,
        };
        assert!((policy.p_correct(0.0) - 0.5).abs() < 1e-9);
        assert!(policy.p_correct(1.0) > 0.97 && policy.p_correct(1.0) < 0.981);
        assert!(policy.p_correct(0.1) < policy.p_correct(0.2));
    }
}
