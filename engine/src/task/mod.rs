//! The RDK task: blocks, staircase, trials and the engine that runs them.

pub mod blocks;
pub mod engine;
pub mod staircase;
pub mod stimulus;
pub mod trial;
pub mod wait;

pub use blocks::{BlockKind, BlockSequencer, MotionDirection, Presentation, TrialCategory, TrialType, VisualField};
pub use engine::{Collaborators, TickOutcome, TrialEngine};
pub use staircase::{CoherencePair, CoherenceStaircase, ContextKey, StaircaseConfig};
pub use stimulus::{StimulusKind, StimulusParameter, StimulusPresenter};
pub use trial::{Trial, TrialPhase};
