//! Block generation and sequencing.
//!
//! Blocks are generated once from the configured phase list and never
//! change length afterwards. Trial blocks carry a pre-drawn plan (visual
//! field and motion direction) per trial so a seed reproduces a session.

use std::f32::consts::PI;
use std::fmt;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

// ── Visual field / trial type ───────────────────────────────

/// Which eye(s) or hemifield receive the stimulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VisualField {
    Left,
    Right,
    Both,
}

impl VisualField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
            Self::Both => "Both",
        }
    }
}

/// How the stimulus is routed to the eyes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Presentation {
    /// Both eyes, centred.
    Binocular,
    /// One eye only, centred.
    Monocular,
    /// Both eyes, offset into one hemifield.
    Lateralized,
}

impl Presentation {
    pub const ALL: [Self; 3] = [Self::Binocular, Self::Monocular, Self::Lateralized];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Binocular => "binocular",
            Self::Monocular => "monocular",
            Self::Lateralized => "lateralized",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::Binocular => "Binocular",
            Self::Monocular => "Monocular",
            Self::Lateralized => "Lateralized",
        }
    }

    /// Visual fields used by trials of this presentation.
    pub fn fields(&self) -> &'static [VisualField] {
        match self {
            Self::Binocular => &[VisualField::Both],
            Self::Monocular | Self::Lateralized => &[VisualField::Left, VisualField::Right],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialCategory {
    /// Staircase-driven difficulty.
    Training,
    /// Fixed coherence pair.
    Main,
}

/// Task condition of a trial block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrialType {
    pub category: TrialCategory,
    pub presentation: Presentation,
}

impl TrialType {
    pub fn new(category: TrialCategory, presentation: Presentation) -> Self {
        Self {
            category,
            presentation,
        }
    }

    pub fn is_training(&self) -> bool {
        self.category == TrialCategory::Training
    }

    /// Name written to result records, e.g. `Training_Trials_Binocular`.
    pub fn record_name(&self) -> String {
        let prefix = match self.category {
            TrialCategory::Training => "Training",
            TrialCategory::Main => "Main",
        };
        format!("{}_Trials_{}", prefix, self.presentation.title())
    }
}

// ── Block kinds ─────────────────────────────────────────────

/// Phase of the experiment a block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockKind {
    /// Instruction screens, each acknowledged with a confirm press.
    Instructions,
    /// Headset/stimulus setup screens, acknowledged like instructions.
    Setup,
    /// Eye-tracker calibration passes.
    Calibration,
    Trials(TrialType),
}

impl BlockKind {
    /// Parse a configured phase name.
    pub fn from_str(s: &str) -> Option<Self> {
        let trials = |category, presentation| Some(Self::Trials(TrialType::new(category, presentation)));
        match s {
            "instructions" => Some(Self::Instructions),
            "setup" => Some(Self::Setup),
            "calibration" => Some(Self::Calibration),
            "training_binocular" => trials(TrialCategory::Training, Presentation::Binocular),
            "training_monocular" => trials(TrialCategory::Training, Presentation::Monocular),
            "training_lateralized" => trials(TrialCategory::Training, Presentation::Lateralized),
            "main_binocular" => trials(TrialCategory::Main, Presentation::Binocular),
            "main_monocular" => trials(TrialCategory::Main, Presentation::Monocular),
            "main_lateralized" => trials(TrialCategory::Main, Presentation::Lateralized),
            _ => None,
        }
    }

    /// Canonical phase name (inverse of [`BlockKind::from_str`]).
    pub fn as_string(&self) -> String {
        match self {
            Self::Instructions => "instructions".to_string(),
            Self::Setup => "setup".to_string(),
            Self::Calibration => "calibration".to_string(),
            Self::Trials(t) => {
                let category = match t.category {
                    TrialCategory::Training => "training",
                    TrialCategory::Main => "main",
                };
                format!("{}_{}", category, t.presentation.as_str())
            }
        }
    }

    pub fn trial_type(&self) -> Option<TrialType> {
        match self {
            Self::Trials(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_string())
    }
}

// ── Blocks ──────────────────────────────────────────────────

/// Motion direction of a trial: rightward (0 rad) or leftward (π rad).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotionDirection {
    Left,
    Right,
}

impl MotionDirection {
    pub fn radians(&self) -> f32 {
        match self {
            Self::Right => 0.0,
            Self::Left => PI,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

/// Pre-drawn parameters of one trial.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrialPlan {
    pub field: VisualField,
    pub direction: MotionDirection,
}

#[derive(Debug, Clone)]
pub struct Block {
    /// Position in the session (0-based).
    pub index: usize,
    pub name: String,
    pub kind: BlockKind,
    length: usize,
    plans: Vec<TrialPlan>,
}

impl Block {
    /// Screens, calibration passes or trials in this block.
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Plan of trial `i` (trial blocks only).
    pub fn plan(&self, i: usize) -> Option<&TrialPlan> {
        self.plans.get(i)
    }
}

/// Draw balanced, shuffled trial plans for a trial block.
fn draw_plans<R: Rng + ?Sized>(presentation: Presentation, length: usize, rng: &mut R) -> Vec<TrialPlan> {
    let fields = presentation.fields();
    let mut assigned: Vec<VisualField> = (0..length).map(|i| fields[i % fields.len()]).collect();
    assigned.shuffle(rng);
    assigned
        .into_iter()
        .map(|field| TrialPlan {
            field,
            direction: if rng.gen_bool(0.5) {
                MotionDirection::Right
            } else {
                MotionDirection::Left
            },
        })
        .collect()
}

// ── Sequencer ───────────────────────────────────────────────

/// Position of one unit (screen, pass or trial) in the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Slot {
    pub block: usize,
    pub index: usize,
    /// Trials only: the pre-drawn plan.
    pub plan: Option<TrialPlan>,
}

/// Result of advancing the sequence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    Next(Slot),
    /// Every block is done; normal completion.
    Finished,
}

#[derive(Debug, Clone)]
pub struct BlockSequencer {
    blocks: Vec<Block>,
    /// Next (block, index) to hand out.
    next: (usize, usize),
    current: Option<Slot>,
}

impl BlockSequencer {
    /// Build the ordered block list from parallel phase/length lists.
    ///
    /// A length mismatch or an unknown phase name halts generation.
    pub fn generate<R: Rng + ?Sized>(
        phases: &[String],
        lengths: &[usize],
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        if phases.len() != lengths.len() {
            return Err(ConfigError::PhaseLengthMismatch {
                phases: phases.len(),
                lengths: lengths.len(),
            });
        }

        let mut blocks = Vec::with_capacity(phases.len());
        for (index, (name, &length)) in phases.iter().zip(lengths).enumerate() {
            let kind = BlockKind::from_str(name).ok_or_else(|| ConfigError::UnknownPhase(name.clone()))?;
            if length == 0 {
                warn!("Block {} ({}) has zero length and will be skipped", index, name);
            }
            let plans = match kind {
                BlockKind::Trials(t) => draw_plans(t.presentation, length, rng),
                _ => Vec::new(),
            };
            debug!("Generated block {} '{}' ({} units)", index, name, length);
            blocks.push(Block {
                index,
                name: name.clone(),
                kind,
                length,
                plans,
            });
        }

        info!(
            "Experiment generated: {} blocks, {} trials",
            blocks.len(),
            blocks
                .iter()
                .filter(|b| b.kind.trial_type().is_some())
                .map(Block::len)
                .sum::<usize>()
        );

        Ok(Self {
            blocks,
            next: (0, 0),
            current: None,
        })
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, index: usize) -> Option<&Block> {
        self.blocks.get(index)
    }

    /// Slot most recently handed out.
    pub fn current(&self) -> Option<Slot> {
        self.current
    }

    /// Hand out the next slot, skipping empty blocks.
    pub fn next(&mut self) -> Step {
        let (mut block, mut index) = self.next;
        while let Some(b) = self.blocks.get(block) {
            if index < b.len() {
                let slot = Slot {
                    block,
                    index,
                    plan: b.plan(index).copied(),
                };
                self.next = (block, index + 1);
                self.current = Some(slot);
                return Step::Next(slot);
            }
            block += 1;
            index = 0;
        }
        self.next = (block, 0);
        self.current = None;
        Step::Finished
    }

    pub fn is_finished(&self) -> bool {
        self.next.0 >= self.blocks.len()
    }

    /// Total units across all blocks.
    pub fn total_units(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }
}

// ── Tests ───────────────────────────────────────────────────
