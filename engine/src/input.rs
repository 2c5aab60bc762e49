//! Participant input: per-tick button state, edge detection and
//! scripted/recording sources for tests and replay.
//!
//! The controller is polled once per tick. A selection is reported only on
//! the tick a button goes down while the engine accepts input, and the
//! debounce re-arms only after every button is back to neutral, so a held
//! button is never read as repeated selections.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Button state sampled on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct InputState {
    pub left: bool,
    pub right: bool,
    pub confirm: bool,
    /// Current confidence slider position (0.0-1.0).
    pub confidence: f32,
}

impl InputState {
    pub fn neutral() -> Self {
        Self::default()
    }

    pub fn left() -> Self {
        Self {
            left: true,
            ..Self::default()
        }
    }

    pub fn right() -> Self {
        Self {
            right: true,
            ..Self::default()
        }
    }

    pub fn confirm(confidence: f32) -> Self {
        Self {
            confirm: true,
            confidence: confidence.clamp(0.0, 1.0),
            ..Self::default()
        }
    }

    pub fn is_neutral(&self) -> bool {
        !self.left && !self.right && !self.confirm
    }
}

/// Discrete selection produced by the debounce.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    Left,
    Right,
    Confirm { confidence: f32 },
}

impl Selection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
            Self::Confirm { .. } => "confirm",
        }
    }
}

/// Controller polled once per tick.
pub trait InputSource {
    fn poll(&mut self) -> InputState;
}

impl<F> InputSource for F
where
    F: FnMut() -> InputState,
{
    fn poll(&mut self) -> InputState {
        self()
    }
}

// ── Debounce ────────────────────────────────────────────────

/// Single-flag edge detector.
#[derive(Debug, Clone)]
pub struct Debounce {
    armed: bool,
}

impl Debounce {
    pub fn new() -> Self {
        Self { armed: true }
    }

    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Turn this tick's state into at most one selection.
    ///
    /// Any press disarms, including presses while `accepting` is false,
    /// so a button held from an earlier phase must be released first.
    /// Left and right together are ambiguous and select nothing.
    pub fn read(&mut self, state: &InputState, accepting: bool) -> Option<Selection> {
        if state.is_neutral() {
            self.armed = true;
            return None;
        }
        if !self.armed {
            return None;
        }
        self.armed = false;
        if !accepting {
            return None;
        }
        match (state.left, state.right) {
            (true, false) => Some(Selection::Left),
            (false, true) => Some(Selection::Right),
            (true, true) => None,
            (false, false) => Some(Selection::Confirm {
                confidence: state.confidence,
            }),
        }
    }

    /// Require a return to neutral before the next selection.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Default for Debounce {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sources ─────────────────────────────────────────────────

/// Delivers a pre-defined sequence of states, then neutral forever.
pub struct ScriptedInput {
    frames: VecDeque<InputState>,
}

impl ScriptedInput {
    pub fn new(frames: Vec<InputState>) -> Self {
        Self {
            frames: VecDeque::from(frames),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl InputSource for ScriptedInput {
    fn poll(&mut self) -> InputState {
        self.frames.pop_front().unwrap_or_default()
    }
}

/// Wraps a source and keeps every polled state for replay.
pub struct RecordingInput<S: InputSource> {
    inner: S,
    recorded: Vec<InputState>,
}

impl<S: InputSource> RecordingInput<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            recorded: Vec::new(),
        }
    }

    pub fn recorded(&self) -> &[InputState] {
        &self.recorded
    }

    /// Turn the recording into a scripted source.
    pub fn into_replay(self) -> ScriptedInput {
        ScriptedInput::new(self.recorded)
    }
}

impl<S: InputSource> InputSource for RecordingInput<S> {
    fn poll(&mut self) -> InputState {
        let state = self.inner.poll();
        self.recorded.push(state);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_held_press_selects_once() {
        let mut d = Debounce::new();
        assert_eq!(d.read(&InputState::left(), true), Some(Selection::Left));
        for _ in 0..10 {
            assert_eq!(d.read(&InputState::left(), true), None);
        }
        assert_eq!(d.read(&InputState::neutral(), true), None);
        assert_eq!(d.read(&InputState::right(), true), Some(Selection::Right));
    }

    #[test]
    fn test_press_while_not_accepting_is_ignored_and_must_release() {
        let mut d = Debounce::new();
        assert_eq!(d.read(&InputState::left(), false), None);
        // Still held when input opens: ignored.
        assert_eq!(d.read(&InputState::left(), true), None);
        d.read(&InputState::neutral(), true);
        assert_eq!(d.read(&InputState::left(), true), Some(Selection::Left));
    }

    #[test]
    fn test_both_directions_ambiguous() {
        let mut d = Debounce::new();
        let both = InputState {
            left: true,
            right: true,
            ..InputState::default()
        };
        assert_eq!(d.read(&both, true), None);
        assert!(!d.is_armed());
    }

    #[test]
    fn test_confirm_carries_confidence() {
        let mut d = Debounce::new();
        assert_eq!(
            d.read(&InputState::confirm(0.75), true),
            Some(Selection::Confirm { confidence: 0.75 })
        );
        assert_eq!(InputState::confirm(3.0).confidence, 1.0);
    }

    #[test]
    fn test_scripted_then_neutral() {
        let mut s = ScriptedInput::new(vec![InputState::left(), InputState::neutral()]);
        assert_eq!(s.remaining(), 2);
        assert!(s.poll().left);
        assert!(s.poll().is_neutral());
        assert!(s.poll().is_neutral());
    }

    #[test]
    fn test_recording_replays() {
        let script = ScriptedInput::new(vec![InputState::right(), InputState::confirm(0.2)]);
        let mut rec = RecordingInput::new(script);
        rec.poll();
        rec.poll();
        assert_eq!(rec.recorded().len(), 2);
        let mut replay = rec.into_replay();
        assert!(replay.poll().right);
        assert!(replay.poll().confirm);
    }
}
