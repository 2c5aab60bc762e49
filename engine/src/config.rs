//! Experiment configuration.
//!
//! Loaded from TOML. Every section falls back to its defaults, so a file
//! only needs the keys it changes. Several files can be layered; later
//! files override earlier ones key by key.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ConfigError;
use crate::gaze::{CorrectionMode, FixationWindow};
use crate::geometry::{DichopticGeometry, GeometryParameters, Vec3};
use crate::task::blocks::BlockKind;
use crate::task::staircase::StaircaseConfig;

// ── Sections ────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixationConfig {
    /// Gate motion onset on measured fixation. When false a fixed
    /// pre-display delay is used instead.
    pub required: bool,
    pub window: FixationWindow,
    /// Per-axis tolerance around the target, world units.
    pub tolerance: f32,
    /// World position of the fixation cross.
    pub target: Vec3,
    /// Time the cross stays up after fixation is confirmed.
    pub min_display_ms: u64,
    /// Delay used instead of gating when `required` is false.
    pub pre_display_delay_ms: u64,
    /// Give up waiting for fixation after this long. `None` or 0 waits
    /// forever.
    pub max_wait_ms: Option<u64>,
}

impl Default for FixationConfig {
    fn default() -> Self {
        Self {
            required: true,
            window: FixationWindow::default(),
            tolerance: 0.1,
            target: Vec3::new(0.0, 0.0, -5.0),
            min_display_ms: 500,
            pre_display_delay_ms: 1000,
            max_wait_ms: Some(5000),
        }
    }
}

impl FixationConfig {
    pub fn min_display(&self) -> Duration {
        Duration::from_millis(self.min_display_ms)
    }

    pub fn pre_display_delay(&self) -> Duration {
        Duration::from_millis(self.pre_display_delay_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_ms.filter(|&ms| ms > 0).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// How long each path node is shown.
    pub point_duration_ms: u64,
    /// Samples are ignored for this long after a node appears.
    pub settle_ms: u64,
    /// Extra passes allowed when a point comes out degenerate.
    pub max_repeats: u32,
    /// Distance of the outer points from the fixation target.
    pub radius: f32,
    pub mode: CorrectionMode,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            point_duration_ms: 1500,
            settle_ms: 500,
            max_repeats: 1,
            radius: 0.5,
            mode: CorrectionMode::default(),
        }
    }
}

impl CalibrationConfig {
    pub fn point_duration(&self) -> Duration {
        Duration::from_millis(self.point_duration_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub motion_ms: u64,
    pub feedback_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            motion_ms: 180,
            feedback_ms: 1000,
        }
    }
}

impl TimingConfig {
    pub fn motion(&self) -> Duration {
        Duration::from_millis(self.motion_ms)
    }

    pub fn feedback(&self) -> Duration {
        Duration::from_millis(self.feedback_ms)
    }
}

/// Which phases get feedback or a confidence prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponseConfig {
    pub feedback_phases: Vec<String>,
    pub confidence_phases: Vec<String>,
    /// Ask for confidence on every Nth trial of a block (1-based).
    pub confidence_interval: usize,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            feedback_phases: to_strings(&["training_binocular", "training_monocular", "training_lateralized"]),
            confidence_phases: to_strings(&["main_binocular", "main_monocular", "main_lateralized"]),
            confidence_interval: 5,
        }
    }
}

impl ResponseConfig {
    pub fn shows_feedback(&self, phase: &str) -> bool {
        self.feedback_phases.iter().any(|p| p == phase)
    }

    /// Whether trial `trial_in_block` (0-based) asks for confidence.
    /// Never true on a feedback trial.
    pub fn asks_confidence(&self, phase: &str, trial_in_block: usize) -> bool {
        !self.shows_feedback(phase)
            && self.confidence_interval > 0
            && self.confidence_phases.iter().any(|p| p == phase)
            && (trial_in_block + 1) % self.confidence_interval == 0
    }
}

fn to_strings(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

// ── Top level ───────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Seed for trial plans and main-phase coherence draws.
    pub seed: u64,
    /// Ordered phase names, one block each.
    pub phases: Vec<String>,
    /// Units per block, parallel to `phases`.
    pub phase_lengths: Vec<usize>,
    pub geometry: GeometryParameters,
    pub fixation: FixationConfig,
    pub calibration: CalibrationConfig,
    pub staircase: StaircaseConfig,
    pub timing: TimingConfig,
    pub responses: ResponseConfig,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            phases: to_strings(&[
                "instructions",
                "setup",
                "calibration",
                "training_binocular",
                "training_monocular",
                "training_lateralized",
                "main_binocular",
                "main_monocular",
                "main_lateralized",
            ]),
            phase_lengths: vec![2, 1, 1, 40, 40, 40, 40, 80, 80],
            geometry: GeometryParameters::default(),
            fixation: FixationConfig::default(),
            calibration: CalibrationConfig::default(),
            staircase: StaircaseConfig::default(),
            timing: TimingConfig::default(),
            responses: ResponseConfig::default(),
        }
    }
}

impl ExperimentConfig {
    /// Load and validate a single TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::load_layers(&[path])
    }

    /// Load TOML files in order, later keys overriding earlier ones.
    pub fn load_layers<P: AsRef<Path>>(paths: &[P]) -> Result<Self, ConfigError> {
        let mut merged = toml::Value::Table(toml::value::Table::new());
        for path in paths {
            let path = path.as_ref();
            let text = std::fs::read_to_string(path)?;
            let layer: toml::Value = toml::from_str(&text)?;
            merge(&mut merged, layer);
            debug!("Config layer loaded: {}", path.display());
        }
        let config: Self = merged.try_into()?;
        config.validate()?;
        info!(
            "Configuration loaded: {} phases, seed {}",
            config.phases.len(),
            config.seed
        );
        Ok(config)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.phases.len() != self.phase_lengths.len() {
            return Err(ConfigError::PhaseLengthMismatch {
                phases: self.phases.len(),
                lengths: self.phase_lengths.len(),
            });
        }
        let phase_lists = self
            .phases
            .iter()
            .chain(&self.responses.feedback_phases)
            .chain(&self.responses.confidence_phases);
        for name in phase_lists {
            if BlockKind::from_str(name).is_none() {
                return Err(ConfigError::UnknownPhase(name.clone()));
            }
        }

        DichopticGeometry::validate(&self.geometry)?;

        let s = &self.staircase;
        if !(s.step > 0.0) {
            return Err(ConfigError::invalid("staircase.step", format!("{} is not positive", s.step)));
        }
        if !(s.start > 0.0 && s.start <= 1.0) {
            return Err(ConfigError::invalid("staircase.start", format!("{} is outside (0, 1]", s.start)));
        }
        if s.window == 0 {
            return Err(ConfigError::invalid("staircase.window", "must be at least 1"));
        }
        if !(s.default_pair.low > 0.0 && s.default_pair.low < s.default_pair.high) {
            return Err(ConfigError::invalid(
                "staircase.default_pair",
                format!("({}, {}) is not an increasing positive pair", s.default_pair.low, s.default_pair.high),
            ));
        }

        let f = &self.fixation;
        if !(f.tolerance > 0.0) {
            return Err(ConfigError::invalid("fixation.tolerance", "must be positive"));
        }
        match f.window {
            FixationWindow::Samples(0) => {
                return Err(ConfigError::invalid("fixation.window", "sample count must be at least 1"));
            }
            FixationWindow::Duration(d) if d.is_zero() => {
                return Err(ConfigError::invalid("fixation.window", "duration must be non-zero"));
            }
            _ => {}
        }

        let c = &self.calibration;
        if c.settle_ms >= c.point_duration_ms {
            return Err(ConfigError::invalid(
                "calibration.settle_ms",
                format!("{} leaves no sampling time in a {} ms point", c.settle_ms, c.point_duration_ms),
            ));
        }
        if !(c.radius > 0.0) {
            return Err(ConfigError::invalid("calibration.radius", "must be positive"));
        }

        if self.responses.confidence_interval == 0 {
            return Err(ConfigError::invalid("responses.confidence_interval", "must be at least 1"));
        }
        Ok(())
    }
}

/// Recursively overlay `layer` onto `base`.
fn merge(base: &mut toml::Value, layer: toml::Value) {
    match (base, layer) {
        (toml::Value::Table(base), toml::Value::Table(layer)) => {
            for (key, value) in layer {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, layer) => *base = layer,
    }
}
