//! End-to-end sessions driven by the simulated participant.
//!
//! Every test runs on a `TestClock` advanced by a fixed tick, so timing is
//! deterministic and a full session takes milliseconds of real time.

use rdkvr_engine::clock::TestClock;
use rdkvr_engine::geometry::Vec2;
use rdkvr_engine::gaze::FixationWindow;
use rdkvr_engine::record::{JsonLinesSink, MemorySink, ResultSink, TrialRecord};
use rdkvr_engine::simulate::{GazeBehaviour, HeadlessPresenter, ResponsePolicy, SimulatedParticipant};
use rdkvr_engine::task::staircase::ContextKey;
use rdkvr_engine::task::{Presentation, TrialPhase, VisualField};
use rdkvr_engine::{Collaborators, ExperimentConfig, TickOutcome, TrialEngine};

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(10);
const MAX_TICKS: usize = 200_000;

fn config(phases: &[&str], lengths: &[usize]) -> ExperimentConfig {
    let mut cfg = ExperimentConfig::default();
    cfg.seed = 7;
    cfg.phases = phases.iter().map(|s| s.to_string()).collect();
    cfg.phase_lengths = lengths.to_vec();
    cfg.fixation.window = FixationWindow::Samples(10);
    cfg.responses.confidence_interval = 2;
    cfg
}

struct Harness {
    engine: TrialEngine,
    clock: Arc<TestClock>,
}

impl Harness {
    fn new(cfg: ExperimentConfig, policy: ResponsePolicy, gaze: GazeBehaviour, sink: Box<dyn ResultSink>) -> Self {
        let clock = Arc::new(TestClock::new());
        let presenter = HeadlessPresenter::new(Some(0.25));
        let participant = SimulatedParticipant::new(presenter.display(), policy, 99).with_gaze(gaze);
        let engine = TrialEngine::new(
            cfg,
            Collaborators {
                clock: clock.clone(),
                gaze: Box::new(participant.gaze),
                input: Box::new(participant.responder),
                presenter: Box::new(presenter),
                sink,
            },
        )
        .unwrap();
        Self { engine, clock }
    }

    fn tick(&mut self) -> TickOutcome {
        let outcome = self.engine.tick(TICK).unwrap();
        self.clock.advance(TICK);
        outcome
    }

    fn run_to_end(&mut self) {
        for _ in 0..MAX_TICKS {
            if self.tick() == TickOutcome::Finished {
                return;
            }
        }
        panic!("session did not finish: {}", self.engine.status().status_sexp());
    }

    /// Tick until `pred` holds, returning false if it never does.
    fn run_until(&mut self, pred: impl Fn(&TrialEngine) -> bool) -> bool {
        for _ in 0..MAX_TICKS {
            if pred(&self.engine) {
                return true;
            }
            if self.tick() == TickOutcome::Finished {
                return pred(&self.engine);
            }
        }
        false
    }
}

fn biased_gaze(bias: f32) -> GazeBehaviour {
    GazeBehaviour {
        bias_left: Vec2::new(bias, 0.0),
        bias_right: Vec2::new(-bias, 0.0),
        ..GazeBehaviour::default()
    }
}

fn ts(r: &TrialRecord, key: &str) -> f64 {
    r.get_f64(key).unwrap_or_else(|| panic!("missing timestamp {key}"))
}

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// ── Full session ────────────────────────────────────────────

#[test]
fn test_full_session_with_calibration() {
    let cfg = config(
        &[
            "instructions",
            "calibration",
            "training_binocular",
            "main_binocular",
            "training_lateralized",
            "main_lateralized",
        ],
        &[1, 1, 20, 10, 10, 10],
    );
    let sink = MemorySink::new();
    // Tracker bias larger than the fixation tolerance: only calibration
    // makes fixation possible.
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, biased_gaze(0.15), Box::new(sink.clone()));
    h.run_to_end();

    let records = sink.records();
    assert_eq!(records.len(), 50);
    assert!(h.engine.status().calibrated);
    assert!(h.engine.is_finished());

    for (i, r) in records.iter().enumerate() {
        assert_eq!(r.get_f64("trial_number"), Some((i + 1) as f64));
        assert_eq!(r.get_bool("aborted"), Some(false));
        assert_eq!(r.get_bool("fixation_timed_out"), Some(false), "record {i}");
        assert_eq!(r.get_bool("correct_selection"), Some(true));
        let order = [
            "trial_start",
            "fixation_start",
            "fixation_end",
            "motion_start",
            "motion_end",
            "reference_start",
            "reference_end",
            "trial_end",
        ];
        for pair in order.windows(2) {
            assert!(ts(r, pair[0]) <= ts(r, pair[1]), "{} after {} in record {i}", pair[0], pair[1]);
        }
        assert!(approx(ts(r, "motion_end") - ts(r, "motion_start"), 180.0));
    }

    // Training trials: feedback, no confidence, no pair.
    let training: Vec<&TrialRecord> = records
        .iter()
        .filter(|r| r.get_str("trial_type").is_some_and(|t| t.starts_with("Training")))
        .collect();
    assert_eq!(training.len(), 30);
    for r in &training {
        assert_eq!(r.get_bool("show_feedback"), Some(true));
        assert!(r.get("confidence").unwrap().is_null());
        assert!(r.get("coherence_pair").unwrap().is_null());
        assert!(approx(ts(r, "feedback_end") - ts(r, "feedback_start"), 1000.0));
    }

    // Main trials: coherence from the pair, confidence every second trial.
    for r in records
        .iter()
        .filter(|r| r.get_str("trial_type").is_some_and(|t| t.starts_with("Main")))
    {
        let low = r.get_f64("coherence_low").unwrap();
        let high = r.get_f64("coherence_high").unwrap();
        let c = r.get_f64("coherence").unwrap();
        // Both members are rounded to four decimals, so the ratio is 4 up to rounding.
        assert!((high / low - 4.0).abs() < 0.005, "pair {low}_{high}");
        assert!(c == low || c == high);
        assert_eq!(r.get_bool("show_feedback"), Some(false));
        let in_block = r.get_f64("trial_in_block").unwrap() as usize;
        assert_eq!(r.get("confidence").unwrap().is_null(), (in_block + 1) % 2 != 0);
    }

    // Lateralized trials sit in their hemifield.
    for r in records
        .iter()
        .filter(|r| r.get_str("trial_type").is_some_and(|t| t.ends_with("Lateralized")))
    {
        let offset = r.get_f64("lateral_offset").unwrap();
        match r.get_str("active_visual_field") {
            Some("Left") => assert!(offset < 0.0),
            Some("Right") => assert!(offset > 0.0),
            other => panic!("unexpected field {other:?}"),
        }
    }
}

#[test]
fn test_correct_run_lowers_coherence_and_fixes_pair() {
    let cfg = config(&["training_binocular", "main_binocular"], &[20, 4]);
    let sink = MemorySink::new();
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, GazeBehaviour::default(), Box::new(sink.clone()));
    h.run_to_end();

    let key = ContextKey::new(Presentation::Binocular, VisualField::Both);
    let staircase = h.engine.staircase();
    // 20 correct answers: one step down for every two.
    assert!(approx(staircase.current(key), 0.10));
    assert_eq!(staircase.history(key).len(), 20);

    // Median of [0.2, 0.2, 0.19, 0.19, ..., 0.11, 0.11] is 0.155.
    let pair = staircase.pair(key).unwrap();
    assert!(approx(pair.low, 0.0775));
    assert!(approx(pair.high, 0.31));

    let main: Vec<TrialRecord> = sink.records().into_iter().skip(20).collect();
    assert_eq!(main.len(), 4);
    for r in &main {
        assert_eq!(r.get_str("coherence_pair"), Some(pair.record_string().as_str()));
    }
}

#[test]
fn test_staircase_holds_near_start_at_two_down_one_up_rate() {
    // correct, correct, incorrect repeating sits at the rule's equilibrium.
    let answers: VecDeque<bool> = (0..20).map(|i| i % 3 != 2).collect();
    let cfg = config(&["training_binocular"], &[40]);
    let sink = MemorySink::new();
    let mut h = Harness::new(
        cfg,
        ResponsePolicy::Scripted(answers),
        GazeBehaviour::default(),
        Box::new(sink.clone()),
    );
    assert!(h.run_until(|e| e.trials_completed() >= 20));

    let start = h.engine.staircase().config().start;
    let step = h.engine.staircase().config().step;
    let key = ContextKey::new(Presentation::Binocular, VisualField::Both);
    let staircase = h.engine.staircase();
    assert!(staircase.history(key).len() >= 20);
    for &c in staircase.history(key) {
        assert!((c - start).abs() <= step + 1e-9, "drifted to {c}");
    }
    assert!((staircase.current(key) - start).abs() <= step + 1e-9);
}

// ── Fixation ────────────────────────────────────────────────

#[test]
fn test_fixation_timeout_proceeds_and_flags() {
    let mut cfg = config(&["training_binocular"], &[3]);
    cfg.fixation.max_wait_ms = Some(300);
    let sink = MemorySink::new();
    let gaze = GazeBehaviour {
        attentive: false,
        ..GazeBehaviour::default()
    };
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, gaze, Box::new(sink.clone()));
    h.run_to_end();

    let records = sink.records();
    assert_eq!(records.len(), 3);
    for r in &records {
        assert_eq!(r.get_bool("fixation_timed_out"), Some(true));
        assert!(ts(r, "fixation_end") - ts(r, "fixation_start") >= 300.0 - 1e-6);
        assert!(r.get_f64("motion_start").is_some());
        assert_eq!(r.get_bool("correct_selection"), Some(true));
    }
}

#[test]
fn test_uncalibrated_bias_blocks_fixation() {
    let mut cfg = config(&["main_binocular"], &[2]);
    cfg.fixation.max_wait_ms = Some(500);
    let sink = MemorySink::new();
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, biased_gaze(0.15), Box::new(sink.clone()));
    h.run_to_end();
    assert!(sink
        .records()
        .iter()
        .all(|r| r.get_bool("fixation_timed_out") == Some(true)));
}

#[test]
fn test_tracking_loss_reported() {
    let mut cfg = config(&["training_binocular"], &[1]);
    cfg.fixation.max_wait_ms = None;
    let gaze = GazeBehaviour {
        tracked: false,
        ..GazeBehaviour::default()
    };
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, gaze, Box::new(MemorySink::new()));
    for _ in 0..40 {
        h.tick();
    }
    let status = h.engine.status();
    assert!(status.tracking_lost);
    assert_eq!(status.phase, "fixation");
    assert!(status.status_sexp().contains(":tracking-lost t"));
}

#[test]
fn test_bypass_uses_pre_display_delay() {
    let mut cfg = config(&["training_binocular"], &[2]);
    cfg.fixation.required = false;
    let sink = MemorySink::new();
    let gaze = GazeBehaviour {
        attentive: false,
        ..GazeBehaviour::default()
    };
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, gaze, Box::new(sink.clone()));
    h.run_to_end();
    for r in sink.records() {
        assert!(approx(ts(&r, "motion_start") - ts(&r, "fixation_start"), 1000.0));
        assert_eq!(r.get_bool("fixation_timed_out"), Some(false));
    }
}

// ── Abort ───────────────────────────────────────────────────

#[test]
fn test_abort_skips_staircase_and_continues() {
    let cfg = config(&["training_binocular"], &[3]);
    let sink = MemorySink::new();
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, GazeBehaviour::default(), Box::new(sink.clone()));

    assert!(h.run_until(|e| e.trial_phase() == Some(TrialPhase::Motion)));
    assert!(h.engine.abort_trial().unwrap());
    h.run_to_end();

    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].get_bool("aborted"), Some(true));
    assert!(records[0].get_f64("coherence").is_some());
    assert!(records[0].get("selection").unwrap().is_null());
    assert!(records[1..].iter().all(|r| r.get_bool("aborted") == Some(false)));

    let key = ContextKey::new(Presentation::Binocular, VisualField::Both);
    assert_eq!(h.engine.staircase().history(key).len(), 2);
    assert_eq!(h.engine.trials_completed(), 2);
    assert_eq!(h.engine.trials_aborted(), 1);
}

// ── Output ──────────────────────────────────────────────────

#[test]
fn test_json_lines_results_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("results.jsonl");
    let sink = JsonLinesSink::create(&path).unwrap();
    let cfg = config(&["instructions", "training_binocular", "main_binocular"], &[2, 4, 4]);
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, GazeBehaviour::default(), Box::new(sink));
    h.run_to_end();

    let text = std::fs::read_to_string(&path).unwrap();
    let lines: Vec<serde_json::Value> = text
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(lines.len(), 8);
    assert_eq!(lines[0]["trial_type"], "Training_Trials_Binocular");
    assert_eq!(lines[7]["trial_type"], "Main_Trials_Binocular");
    assert_eq!(lines[7]["context"], "binocular");
}

#[test]
fn test_flush_writes_records_of_a_stopped_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.jsonl");
    let sink = JsonLinesSink::create(&path).unwrap();
    let cfg = config(&["training_binocular"], &[10]);
    let mut h = Harness::new(cfg, ResponsePolicy::AlwaysCorrect, GazeBehaviour::default(), Box::new(sink));
    assert!(h.run_until(|e| e.trials_completed() >= 3));
    assert!(!h.engine.is_finished());

    h.engine.flush().unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn test_same_seed_same_session() {
    let run = || {
        let sink = MemorySink::new();
        let policy = ResponsePolicy::Psychometric {
            threshold: 0.15,
            slope: 2.0,
            lapse: 0.02,
        };
        let cfg = config(&["training_monocular", "main_monocular"], &[12, 8]);
        let mut h = Harness::new(cfg, policy, GazeBehaviour::default(), Box::new(sink.clone()));
        h.run_to_end();
        sink.records()
    };
    let a = run();
    let b = run();
    assert_eq!(a.len(), 20);
    assert_eq!(a, b);
}
