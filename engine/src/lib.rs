//! RDK-VR engine library: adaptive trial control for a dichoptic
//! random-dot motion task in a head-mounted display.
//!
//! This library crate exposes the engine's modules for hosts and
//! integration testing. The headless session runner lives in `main.rs`.

pub mod clock;
pub mod config;
pub mod error;
pub mod gaze;
pub mod geometry;
pub mod input;
pub mod record;
pub mod simulate;
pub mod task;

pub use config::ExperimentConfig;
pub use error::{ConfigError, EngineError};
pub use task::{Collaborators, TickOutcome, TrialEngine};
