//! Error types for experiment generation and the running engine.
//!
//! Configuration problems are detected while the experiment is generated
//! and halt generation. Runtime problems are limited to collaborator
//! failures (result sink I/O) and misuse of one-shot setters.

use thiserror::Error;

/// Problems found while loading configuration or generating blocks.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The phase list and the phase-length list disagree in length.
    #[error("{phases} phases declared but {lengths} phase lengths")]
    PhaseLengthMismatch { phases: usize, lengths: usize },

    /// A phase name that does not map to a block kind.
    #[error("unknown phase '{0}'")]
    UnknownPhase(String),

    /// The lateral offset angle does not leave the eye-corrected angle in (0, 90) degrees.
    #[error(
        "offset angle {angle_deg} deg is outside the usable range for ipd {ipd} at distance {view_distance}"
    )]
    OffsetAngleOutOfRange {
        angle_deg: f64,
        ipd: f64,
        view_distance: f64,
    },

    /// A numeric parameter outside its valid domain.
    #[error("invalid value for {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Errors surfaced by the trial engine while a session runs.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The stimulus half-width may only be set once per session.
    #[error("stimulus half-width already set to {0}")]
    GeometryLocked(f64),

    /// The result sink could not store a record.
    #[error("result sink failed: {0}")]
    Sink(#[from] std::io::Error),

    #[error("failed to serialize trial record: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
