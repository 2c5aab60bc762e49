//! RDK-VR engine - headless session runner
//!
//! Runs a full session against a simulated participant and writes one
//! JSON record per trial. Useful for checking a configuration end to end
//! before it goes on a headset.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use rdkvr_engine::clock::{Clock, SystemClock, TestClock};
use rdkvr_engine::geometry::Vec2;
use rdkvr_engine::record::{JsonLinesSink, ResultSink};
use rdkvr_engine::simulate::{GazeBehaviour, HeadlessPresenter, ResponsePolicy, SimulatedParticipant};
use rdkvr_engine::{Collaborators, ExperimentConfig, TickOutcome, TrialEngine};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "rdkvr-engine", about = "Adaptive RDK trial engine, headless runner")]
struct Cli {
    /// Experiment configuration (TOML). Repeat to layer files.
    #[arg(long)]
    config: Vec<PathBuf>,

    /// Results file (JSON lines). Defaults to stdout.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,

    /// Frame length in milliseconds
    #[arg(long, default_value = "11")]
    tick_ms: u64,

    /// Coherence at which the simulated participant is ~80% correct
    #[arg(long, default_value = "0.15")]
    participant_threshold: f64,

    /// Systematic gaze error added to the simulated tracker (world units)
    #[arg(long, default_value = "0.0")]
    gaze_bias: f32,

    /// Stop after this much session time (seconds)
    #[arg(long, default_value = "14400")]
    max_seconds: u64,

    /// Run against the wall clock instead of simulated time
    #[arg(long)]
    realtime: bool,

    /// Show version and exit
    #[arg(long)]
    version: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.version {
        println!("rdkvr-engine {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    // Initialize tracing (stderr, so stdout stays clean for records)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rdkvr_engine=info".into()),
        )
        .init();

    info!("rdkvr-engine v{} starting", env!("CARGO_PKG_VERSION"));

    let mut config = if cli.config.is_empty() {
        info!("no configuration given, using defaults");
        ExperimentConfig::default()
    } else {
        ExperimentConfig::load_layers(cli.config.as_slice())?
    };
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }
    let seed = config.seed;

    let sink: Box<dyn ResultSink> = match &cli.output {
        Some(path) => {
            info!("writing results to {}", path.display());
            Box::new(JsonLinesSink::create(path)?)
        }
        None => Box::new(JsonLinesSink::new(std::io::stdout())),
    };

    let test_clock = Arc::new(TestClock::new());
    let clock: Arc<dyn Clock> = if cli.realtime {
        Arc::new(SystemClock)
    } else {
        test_clock.clone()
    };

    let presenter = HeadlessPresenter::new(Some(0.25));
    let policy = ResponsePolicy::Psychometric {
        threshold: cli.participant_threshold,
        slope: 2.0,
        lapse: 0.02,
    };
    let participant = SimulatedParticipant::new(presenter.display(), policy, seed).with_gaze(GazeBehaviour {
        bias_left: Vec2::new(cli.gaze_bias, 0.0),
        bias_right: Vec2::new(-cli.gaze_bias, 0.0),
        ..GazeBehaviour::default()
    });

    let mut engine = TrialEngine::new(
        config,
        Collaborators {
            clock: clock.clone(),
            gaze: Box::new(participant.gaze),
            input: Box::new(participant.responder),
            presenter: Box::new(presenter),
            sink,
        },
    )?;

    let dt = Duration::from_millis(cli.tick_ms.max(1));
    let limit = Duration::from_secs(cli.max_seconds);
    let started = clock.now();
    loop {
        if engine.tick(dt)? == TickOutcome::Finished {
            break;
        }
        if clock.now().saturating_duration_since(started) > limit {
            warn!("session time limit reached, stopping early");
            break;
        }
        if cli.realtime {
            std::thread::sleep(dt);
        } else {
            test_clock.advance(dt);
        }
    }

    engine.flush()?;
    let status = engine.status();
    info!("final status: {}", status.status_sexp());
    Ok(())
}
