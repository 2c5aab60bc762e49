//! Coherence staircase: per-context adaptive difficulty.
//!
//! One running coherence per (presentation, visual field) context. An
//! incorrect response raises coherence by one step (easier); a correct
//! response lowers it by one step only when the previous trial in the
//! same context was also correct at the same coherence. The rule
//! converges near 70.7% correct.
//!
//! At the training→main transition each context's recent history is
//! collapsed into a fixed (low, high) pair via a clamped median.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::task::blocks::{Presentation, TrialType, VisualField};

/// Bounds applied to the history median before the pair is formed.
pub const MEDIAN_CLAMP: (f64, f64) = (0.12, 0.5);

/// Running values are kept at this many decimal places.
const PRECISION: f64 = 1e4;

/// Round to the staircase precision so equal levels compare exactly.
pub fn round_level(v: f64) -> f64 {
    (v * PRECISION).round() / PRECISION
}

fn same_level(a: f64, b: f64) -> bool {
    (a - b).abs() < 0.5 / PRECISION
}

// ── Context key / pair ──────────────────────────────────────

/// Staircase context: presentation plus visual field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContextKey {
    pub presentation: Presentation,
    pub field: VisualField,
}

impl ContextKey {
    pub fn new(presentation: Presentation, field: VisualField) -> Self {
        Self {
            presentation,
            field,
        }
    }

    /// Label used in records and logs, e.g. `monocular_left`.
    pub fn label(&self) -> String {
        match self.field {
            VisualField::Both => self.presentation.as_str().to_string(),
            VisualField::Left => format!("{}_left", self.presentation.as_str()),
            VisualField::Right => format!("{}_right", self.presentation.as_str()),
        }
    }
}

/// Fixed easy/hard coherence pair for main trials.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoherencePair {
    pub low: f64,
    pub high: f64,
}

impl CoherencePair {
    /// `low_high` form used in result records.
    pub fn record_string(&self) -> String {
        format!("{}_{}", self.low, self.high)
    }
}

/// Outcome of the previous trial in a context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorResult {
    pub correct: bool,
    pub coherence: f64,
}

/// The staircase rule as a pure function.
pub fn next_difficulty(
    current: f64,
    was_correct: bool,
    coherence_used: f64,
    prior: Option<PriorResult>,
    step: f64,
) -> f64 {
    let next = if !was_correct {
        current + step
    } else {
        match prior {
            Some(p) if p.correct && same_level(p.coherence, coherence_used) => current - step,
            _ => current,
        }
    };
    round_level(next)
}

/// Median of `values`, `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    Some(if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    })
}

/// Collapse chronological `history` into a pair.
///
/// Uses the most recent `window` values (all of them if fewer), rounds
/// their median to the staircase precision, clamps it into
/// [`MEDIAN_CLAMP`] and returns (0.5·k, 2·k), also rounded. An empty
/// history yields `fallback`.
pub fn derive_pair(history: &[f64], window: usize, fallback: CoherencePair) -> CoherencePair {
    let recent: Vec<f64> = history.iter().rev().take(window).copied().collect();
    match median(&recent) {
        Some(k) => {
            let k = round_level(k).clamp(MEDIAN_CLAMP.0, MEDIAN_CLAMP.1);
            CoherencePair {
                low: round_level(0.5 * k),
                high: round_level(2.0 * k),
            }
        }
        None => fallback,
    }
}

// ── Configuration ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaircaseConfig {
    /// Starting coherence of every context.
    pub start: f64,
    /// Adjustment per step.
    pub step: f64,
    /// Number of recent trials feeding the pair median.
    pub window: usize,
    /// Pair used for contexts that never ran a training trial.
    pub default_pair: CoherencePair,
}

impl Default for StaircaseConfig {
    fn default() -> Self {
        Self {
            start: 0.2,
            step: 0.01,
            window: 20,
            default_pair: CoherencePair {
                low: 0.1,
                high: 0.4,
            },
        }
    }
}

// ── Staircase ───────────────────────────────────────────────

#[derive(Debug, Clone)]
struct ContextState {
    value: f64,
    prior: Option<PriorResult>,
    history: Vec<f64>,
    pair: Option<CoherencePair>,
}

/// Coherence chosen for a trial at motion setup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoherenceChoice {
    pub value: f64,
    /// Set for main trials.
    pub pair: Option<CoherencePair>,
}

/// Owner of all coherence contexts. Nothing else mutates them.
#[derive(Debug, Clone)]
pub struct CoherenceStaircase {
    config: StaircaseConfig,
    contexts: BTreeMap<ContextKey, ContextState>,
}

impl CoherenceStaircase {
    pub fn new(config: StaircaseConfig) -> Self {
        Self {
            config,
            contexts: BTreeMap::new(),
        }
    }

    pub fn config(&self) -> &StaircaseConfig {
        &self.config
    }

    fn state(&mut self, key: ContextKey) -> &mut ContextState {
        let start = round_level(self.config.start);
        self.contexts.entry(key).or_insert_with(|| ContextState {
            value: start,
            prior: None,
            history: Vec::new(),
            pair: None,
        })
    }

    /// Running coherence of a context.
    pub fn current(&self, key: ContextKey) -> f64 {
        self.contexts
            .get(&key)
            .map_or(round_level(self.config.start), |s| s.value)
    }

    /// Coherences used so far in a context, oldest first.
    pub fn history(&self, key: ContextKey) -> &[f64] {
        self.contexts
            .get(&key)
            .map(|s| s.history.as_slice())
            .unwrap_or(&[])
    }

    /// Fixed pair of a context, once derived.
    pub fn pair(&self, key: ContextKey) -> Option<CoherencePair> {
        self.contexts.get(&key).and_then(|s| s.pair)
    }

    /// Apply a response to the context's running value.
    ///
    /// Main-category trials never move the staircase; the call returns the
    /// unchanged value.
    pub fn on_trial_result(
        &mut self,
        trial_type: TrialType,
        field: VisualField,
        was_correct: bool,
        coherence_used: f64,
    ) -> f64 {
        let key = ContextKey::new(trial_type.presentation, field);
        if !trial_type.is_training() {
            debug!("Staircase ignores main trial result for {}", key.label());
            return self.current(key);
        }
        let step = self.config.step;
        let state = self.state(key);
        let before = state.value;
        state.value = next_difficulty(state.value, was_correct, coherence_used, state.prior, step);
        state.prior = Some(PriorResult {
            correct: was_correct,
            coherence: coherence_used,
        });
        state.history.push(coherence_used);
        debug!(
            "Staircase {}: {} at {:.4} -> {:.4} (was {:.4})",
            key.label(),
            if was_correct { "correct" } else { "incorrect" },
            coherence_used,
            state.value,
            before
        );
        state.value
    }

    /// Derive and cache the pair of one context; later calls return the cache.
    pub fn freeze(&mut self, key: ContextKey) -> CoherencePair {
        let window = self.config.window;
        let fallback = self.config.default_pair;
        let state = self.state(key);
        if let Some(pair) = state.pair {
            return pair;
        }
        let pair = derive_pair(&state.history, window, fallback);
        state.pair = Some(pair);
        info!(
            "Coherence pair for {} fixed at ({:.4}, {:.4}) from {} training trials",
            key.label(),
            pair.low,
            pair.high,
            state.history.len()
        );
        pair
    }

    /// Freeze every context of a presentation.
    pub fn freeze_presentation(&mut self, presentation: Presentation) -> Vec<(ContextKey, CoherencePair)> {
        presentation
            .fields()
            .iter()
            .map(|&field| {
                let key = ContextKey::new(presentation, field);
                (key, self.freeze(key))
            })
            .collect()
    }

    /// Coherence for a trial about to show motion.
    ///
    /// Training trials use the running value; main trials pick the low or
    /// high member of the frozen pair with equal probability.
    pub fn coherence_for<R: Rng + ?Sized>(
        &mut self,
        trial_type: TrialType,
        field: VisualField,
        rng: &mut R,
    ) -> CoherenceChoice {
        let key = ContextKey::new(trial_type.presentation, field);
        if trial_type.is_training() {
            return CoherenceChoice {
                value: self.current(key),
                pair: None,
            };
        }
        let pair = self.freeze(key);
        let value = if rng.gen_bool(0.5) { pair.low } else { pair.high };
        CoherenceChoice {
            value,
            pair: Some(pair),
        }
    }
}

// ── Tests ───────────────────────────────────────────────────
