//! Trial engine: the single-threaded orchestrator.
//!
//! The host calls [`TrialEngine::tick`] once per frame. Each tick polls
//! the gaze provider and the controller exactly once, then advances
//! whichever unit is running: an instruction or setup screen, a
//! calibration pass, or a trial phase. Waiting phases hold a [`Wait`]
//! that is re-checked on the next tick; nothing blocks.

use std::mem;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SessionTimer};
use crate::config::ExperimentConfig;
use crate::error::Result;
use crate::gaze::calibration::calibration_path;
use crate::gaze::{CalibrationEngine, FixationGate, GazeHealth, GazeProvider, GazeVector};
use crate::geometry::DichopticGeometry;
use crate::input::{Debounce, InputSource, Selection};
use crate::record::{ResultSink, StatusSnapshot};
use crate::task::blocks::{BlockKind, BlockSequencer, Presentation, Slot, Step, TrialType, VisualField};
use crate::task::staircase::CoherenceStaircase;
use crate::task::stimulus::{StimulusKind, StimulusParameter, StimulusPresenter};
use crate::task::trial::{Trial, TrialPhase};
use crate::task::wait::{TickFacts, Wait, WaitStatus};

/// External collaborators the engine drives.
pub struct Collaborators {
    pub clock: Arc<dyn Clock>,
    pub gaze: Box<dyn GazeProvider>,
    pub input: Box<dyn InputSource>,
    pub presenter: Box<dyn StimulusPresenter>,
    pub sink: Box<dyn ResultSink>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    Running,
    /// Every block is done. Further ticks are no-ops.
    Finished,
}

// ── Activity ────────────────────────────────────────────────

struct ActiveTrial {
    trial: Trial,
    phase: TrialPhase,
    wait: Wait,
    /// Fixation phase only: gaze is confirmed (or gating is off) and the
    /// cross is being held for its minimum display time.
    holding: bool,
}

struct CalibrationRun {
    point_started: Instant,
    repeats: u32,
}

enum Activity {
    /// Between units; the next tick pulls the next slot.
    Idle,
    /// Instruction or setup screen awaiting a confirm press.
    Screen(BlockKind),
    Calibrating(CalibrationRun),
    Trial(ActiveTrial),
    Finished,
}

// ── Engine ──────────────────────────────────────────────────

pub struct TrialEngine {
    config: ExperimentConfig,
    sequencer: BlockSequencer,
    staircase: CoherenceStaircase,
    calibration: CalibrationEngine,
    gate: FixationGate,
    geometry: DichopticGeometry,
    health: GazeHealth,
    debounce: Debounce,
    rng: StdRng,
    timer: SessionTimer,

    clock: Arc<dyn Clock>,
    gaze: Box<dyn GazeProvider>,
    input: Box<dyn InputSource>,
    presenter: Box<dyn StimulusPresenter>,
    sink: Box<dyn ResultSink>,

    activity: Activity,
    trials_started: usize,
    trials_completed: usize,
    trials_aborted: usize,
}

impl TrialEngine {
    /// Validate the configuration, generate every block and start the
    /// session clock.
    pub fn new(config: ExperimentConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let sequencer = BlockSequencer::generate(&config.phases, &config.phase_lengths, &mut rng)?;
        let Collaborators {
            clock,
            gaze,
            input,
            presenter,
            sink,
        } = collaborators;

        let timer = SessionTimer::start(clock.as_ref());
        let mut engine = Self {
            staircase: CoherenceStaircase::new(config.staircase.clone()),
            calibration: CalibrationEngine::new(config.fixation.target, config.calibration.mode),
            gate: FixationGate::new(config.fixation.window),
            geometry: DichopticGeometry::new(config.geometry),
            health: GazeHealth::new(),
            debounce: Debounce::new(),
            sequencer,
            rng,
            timer,
            config,
            clock,
            gaze,
            input,
            presenter,
            sink,
            activity: Activity::Idle,
            trials_started: 0,
            trials_completed: 0,
            trials_aborted: 0,
        };
        engine.refresh_aperture()?;
        info!(
            "Session started at {} ms (unix): {} blocks, {} units, lateral offset {:.4}",
            engine.timer.started_unix_ms(),
            engine.sequencer.blocks().len(),
            engine.sequencer.total_units(),
            engine.geometry.offset()
        );
        Ok(engine)
    }

    // ── Accessors ───────────────────────────────────────────

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    pub fn sequencer(&self) -> &BlockSequencer {
        &self.sequencer
    }

    pub fn staircase(&self) -> &CoherenceStaircase {
        &self.staircase
    }

    pub fn calibration(&self) -> &CalibrationEngine {
        &self.calibration
    }

    pub fn geometry(&self) -> &DichopticGeometry {
        &self.geometry
    }

    pub fn health(&self) -> &GazeHealth {
        &self.health
    }

    /// Trials that ran to their end. Aborted trials are not counted.
    pub fn trials_completed(&self) -> usize {
        self.trials_completed
    }

    pub fn trials_aborted(&self) -> usize {
        self.trials_aborted
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.activity, Activity::Finished)
    }

    /// Phase of the running trial, if a trial is running.
    pub fn trial_phase(&self) -> Option<TrialPhase> {
        match &self.activity {
            Activity::Trial(active) => Some(active.phase),
            _ => None,
        }
    }

    fn phase_name(&self) -> String {
        match &self.activity {
            Activity::Idle => "idle".to_string(),
            Activity::Screen(kind) => kind.as_string(),
            Activity::Calibrating(_) => "calibration".to_string(),
            Activity::Trial(active) => active.phase.as_str().to_string(),
            Activity::Finished => "finished".to_string(),
        }
    }

    /// Read-only progress snapshot.
    pub fn status(&self) -> StatusSnapshot {
        let slot = self.sequencer.current();
        StatusSnapshot {
            block_index: slot.map(|s| s.block),
            block_name: slot
                .and_then(|s| self.sequencer.block(s.block))
                .map(|b| b.name.clone()),
            trial_index: slot.map(|s| s.index),
            trials_completed: self.trials_completed,
            trials_aborted: self.trials_aborted,
            phase: self.phase_name(),
            elapsed_ms: self.timer.stamp(self.clock.now()),
            tracking_lost: self.health.tracking_lost,
            calibrated: self.calibration.has_calculated_offsets(),
            finished: self.is_finished(),
        }
    }

    // ── Driving ─────────────────────────────────────────────

    /// Advance the session by one frame of length `dt`.
    pub fn tick(&mut self, dt: Duration) -> Result<TickOutcome> {
        if self.is_finished() {
            return Ok(TickOutcome::Finished);
        }
        let now = self.clock.now();

        let raw = self.gaze.gaze_estimate();
        self.health.update(raw.is_some());
        let state = self.input.poll();
        let accepting = self.accepts_input();
        let selection = self.debounce.read(&state, accepting);
        if let Some(s) = selection {
            debug!("Selection: {}", s.as_str());
        }

        if matches!(self.activity, Activity::Idle) {
            self.activity = self.start_next(now)?;
            return Ok(self.outcome());
        }

        let facts = TickFacts {
            now,
            fixated: false,
            selection,
        };
        self.activity = match mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Screen(kind) => self.step_screen(kind, &facts),
            Activity::Calibrating(run) => self.step_calibration(run, raw, now),
            Activity::Trial(active) => self.step_trial(active, raw, facts, dt)?,
            other => other,
        };
        Ok(self.outcome())
    }

    fn outcome(&self) -> TickOutcome {
        if self.is_finished() {
            TickOutcome::Finished
        } else {
            TickOutcome::Running
        }
    }

    fn accepts_input(&self) -> bool {
        match &self.activity {
            Activity::Screen(_) => true,
            Activity::Trial(active) => active.wait.accepts_input(),
            _ => false,
        }
    }

    /// Flush the result sink.
    ///
    /// Called automatically when the session finishes. Hosts stopping a
    /// session early call it themselves so write errors surface.
    pub fn flush(&mut self) -> Result<()> {
        self.sink.flush()
    }

    /// Abort the running trial.
    ///
    /// Emits the partial record with `aborted` set and skips the staircase
    /// update. Returns false when no trial was running.
    pub fn abort_trial(&mut self) -> Result<bool> {
        match mem::replace(&mut self.activity, Activity::Idle) {
            Activity::Trial(mut active) => {
                warn!(
                    "Trial {} aborted during {}",
                    active.trial.trial_number,
                    active.phase.as_str()
                );
                active.trial.aborted = true;
                self.gate.reset();
                self.debounce.disarm();
                self.finish_trial(active.trial, self.clock.now())?;
                Ok(true)
            }
            other => {
                self.activity = other;
                Ok(false)
            }
        }
    }

    /// Lock the aperture half-width into the geometry once the presenter
    /// knows it.
    fn refresh_aperture(&mut self) -> Result<()> {
        if self.geometry.stimulus_half_width().is_some() {
            return Ok(());
        }
        if let Some(half_width) = self.presenter.aperture_half_width() {
            self.geometry.set_stimulus_half_width(f64::from(half_width))?;
        }
        Ok(())
    }

    // ── Units ───────────────────────────────────────────────

    fn start_next(&mut self, now: Instant) -> Result<Activity> {
        let slot = match self.sequencer.next() {
            Step::Next(slot) => slot,
            Step::Finished => {
                self.presenter.hide_all();
                self.sink.flush()?;
                info!(
                    "Session finished: {} trials ({} aborted) in {:.1} s",
                    self.trials_completed,
                    self.trials_aborted,
                    self.timer.elapsed(now).as_secs_f64()
                );
                return Ok(Activity::Finished);
            }
        };
        let Some(block) = self.sequencer.block(slot.block) else {
            return Ok(Activity::Idle);
        };
        let kind = block.kind;
        let name = block.name.clone();
        let length = block.len();

        if slot.index == 0 {
            info!("Block {} '{}' started ({} units)", slot.block, name, length);
            match kind {
                BlockKind::Setup => self.refresh_aperture()?,
                BlockKind::Trials(t) if !t.is_training() => self.freeze_pairs(t.presentation),
                _ => {}
            }
        }

        Ok(match kind {
            BlockKind::Instructions | BlockKind::Setup => {
                self.presenter.set_parameter(StimulusParameter::Page {
                    block: name,
                    index: slot.index,
                });
                self.presenter.set_visible(StimulusKind::Instructions, true);
                Activity::Screen(kind)
            }
            BlockKind::Calibration => self.start_calibration_pass(now, 0),
            BlockKind::Trials(trial_type) => self.start_trial(slot, &name, trial_type, now),
        })
    }

    fn freeze_pairs(&mut self, presentation: Presentation) {
        for (key, pair) in self.staircase.freeze_presentation(presentation) {
            debug!("Main phase pair {}: {}", key.label(), pair.record_string());
        }
    }

    fn step_screen(&mut self, kind: BlockKind, facts: &TickFacts) -> Activity {
        if Wait::Confirm.poll(facts) == WaitStatus::Ready {
            self.presenter.set_visible(StimulusKind::Instructions, false);
            debug!("{} screen acknowledged", kind);
            Activity::Idle
        } else {
            Activity::Screen(kind)
        }
    }

    // ── Calibration ─────────────────────────────────────────

    fn show_calibration_point(&mut self) {
        let target = self
            .calibration
            .current_point()
            .and_then(|p| self.calibration.target_position(p.id));
        if let Some(target) = target {
            self.presenter.set_parameter(StimulusParameter::TargetPosition(target));
            self.presenter.set_visible(StimulusKind::CalibrationPoint, true);
        }
    }

    fn start_calibration_pass(&mut self, now: Instant, repeats: u32) -> Activity {
        let path = calibration_path(self.config.calibration.radius);
        self.calibration.begin_pass(&path);
        self.show_calibration_point();
        Activity::Calibrating(CalibrationRun {
            point_started: now,
            repeats,
        })
    }

    fn step_calibration(&mut self, mut run: CalibrationRun, raw: Option<GazeVector>, now: Instant) -> Activity {
        let Some(point) = self.calibration.current_point().copied() else {
            self.presenter.set_visible(StimulusKind::CalibrationPoint, false);
            return Activity::Idle;
        };
        let shown = now.saturating_duration_since(run.point_started);

        // Calibration works on raw samples, never corrected ones.
        if shown >= self.config.calibration.settle() {
            if let Some(gaze) = raw {
                self.calibration.record_sample(point.id, gaze);
            }
        }
        if shown < self.config.calibration.point_duration() {
            return Activity::Calibrating(run);
        }

        if self.calibration.advance().is_some() {
            self.show_calibration_point();
            run.point_started = now;
            return Activity::Calibrating(run);
        }

        let degenerate = self.calibration.compute().degenerate.clone();
        if !degenerate.is_empty() {
            let names: Vec<&str> = degenerate.iter().map(|id| id.as_str()).collect();
            if run.repeats < self.config.calibration.max_repeats {
                warn!("Calibration points without usable samples: {:?}; repeating pass", names);
                return self.start_calibration_pass(now, run.repeats + 1);
            }
            warn!(
                "Calibration points without usable samples: {:?}; using the global correction there",
                names
            );
        }
        self.presenter.set_visible(StimulusKind::CalibrationPoint, false);
        Activity::Idle
    }

    // ── Trials ──────────────────────────────────────────────

    fn stamp(&self, now: Instant) -> Option<f64> {
        Some(self.timer.stamp(now))
    }

    fn start_trial(&mut self, slot: Slot, block_name: &str, trial_type: TrialType, now: Instant) -> Activity {
        let Some(plan) = slot.plan else {
            warn!("Trial slot {}:{} has no plan; skipped", slot.block, slot.index);
            return Activity::Idle;
        };
        self.trials_started += 1;
        let mut trial = Trial::new(
            slot.block,
            block_name,
            self.trials_started,
            slot.index,
            trial_type,
            plan.field,
            plan.direction,
        );
        trial.show_feedback = self.config.responses.shows_feedback(block_name);
        trial.ask_confidence = self.config.responses.asks_confidence(block_name, slot.index);
        trial.times.trial_start = self.stamp(now);
        trial.times.fixation_start = self.stamp(now);
        debug!(
            "Trial {} ({}, {}) started",
            trial.trial_number,
            trial_type.record_name(),
            plan.field.as_str()
        );

        self.gate.reset();
        self.presenter
            .set_parameter(StimulusParameter::TargetPosition(self.config.fixation.target));
        self.presenter.set_visible(StimulusKind::FixationCross, true);

        let fixation = &self.config.fixation;
        let (wait, holding) = if fixation.required {
            (Wait::fixation(now, fixation.max_wait()), false)
        } else {
            (Wait::after(now, fixation.pre_display_delay()), true)
        };
        Activity::Trial(ActiveTrial {
            trial,
            phase: TrialPhase::Fixation,
            wait,
            holding,
        })
    }

    fn step_trial(
        &mut self,
        mut active: ActiveTrial,
        raw: Option<GazeVector>,
        mut facts: TickFacts,
        dt: Duration,
    ) -> Result<Activity> {
        let now = facts.now;
        match active.phase {
            TrialPhase::Fixation if !active.holding => {
                let corrected = raw.map(|g| self.calibration.correct(g));
                self.gate.sample_for(
                    corrected.as_ref(),
                    self.config.fixation.target,
                    self.config.fixation.tolerance,
                    dt,
                );
                facts.fixated = self.gate.evaluate();
                match active.wait.poll(&facts) {
                    WaitStatus::Ready => {
                        active.trial.times.fixation_end = self.stamp(now);
                        active.holding = true;
                        active.wait = Wait::after(now, self.config.fixation.min_display());
                    }
                    WaitStatus::TimedOut => {
                        warn!(
                            "Trial {}: no fixation within {:?}, presenting anyway",
                            active.trial.trial_number,
                            self.config.fixation.max_wait()
                        );
                        active.trial.fixation_timed_out = true;
                        active.trial.times.fixation_end = self.stamp(now);
                        self.enter_motion(&mut active, now);
                    }
                    WaitStatus::Pending => {}
                }
            }
            TrialPhase::Fixation => {
                if active.wait.poll(&facts) == WaitStatus::Ready {
                    if active.trial.times.fixation_end.is_none() {
                        active.trial.times.fixation_end = self.stamp(now);
                    }
                    self.enter_motion(&mut active, now);
                }
            }
            TrialPhase::Motion => {
                if active.wait.poll(&facts) == WaitStatus::Ready {
                    active.trial.times.motion_end = self.stamp(now);
                    self.presenter.set_visible(StimulusKind::Dots, false);
                    self.presenter.set_visible(StimulusKind::ResponsePrompt, true);
                    active.trial.times.reference_start = self.stamp(now);
                    active.phase = TrialPhase::Decision;
                    active.wait = Wait::Direction;
                }
            }
            TrialPhase::Decision => {
                if let (WaitStatus::Ready, Some(selection)) = (active.wait.poll(&facts), facts.selection) {
                    active.trial.times.reference_end = self.stamp(now);
                    let correct = active.trial.respond(selection);
                    self.presenter.set_visible(StimulusKind::ResponsePrompt, false);
                    debug!(
                        "Trial {}: {} ({})",
                        active.trial.trial_number,
                        selection.as_str(),
                        if correct { "correct" } else { "incorrect" }
                    );
                    self.after_decision(&mut active, correct, now);
                }
            }
            TrialPhase::Feedback => {
                if active.wait.poll(&facts) == WaitStatus::Ready {
                    active.trial.times.feedback_end = self.stamp(now);
                    self.presenter.set_visible(StimulusKind::Feedback, false);
                    active.phase = TrialPhase::End;
                }
            }
            TrialPhase::Confidence => {
                if let (WaitStatus::Ready, Some(Selection::Confirm { confidence })) =
                    (active.wait.poll(&facts), facts.selection)
                {
                    active.trial.times.confidence_end = self.stamp(now);
                    active.trial.confidence = Some(confidence);
                    self.presenter.set_visible(StimulusKind::ConfidencePrompt, false);
                    active.phase = TrialPhase::End;
                }
            }
            TrialPhase::End => {}
        }

        if active.phase == TrialPhase::End {
            self.finish_trial(active.trial, now)?;
            return Ok(Activity::Idle);
        }
        Ok(Activity::Trial(active))
    }

    /// Draw the coherence, place the aperture and show the dots.
    fn enter_motion(&mut self, active: &mut ActiveTrial, now: Instant) {
        let trial = &mut active.trial;
        let presentation = trial.trial_type.presentation;
        let choice = self
            .staircase
            .coherence_for(trial.trial_type, trial.field, &mut self.rng);
        trial.coherence = Some(choice.value);
        trial.pair = choice.pair;
        trial.lateral_offset = self.geometry.lateral_position(presentation, trial.field);

        // Monocular trials route the dots to one eye; lateralized trials
        // show both eyes and carry the hemifield in the offset sign.
        let eyes = match presentation {
            Presentation::Monocular => trial.field,
            Presentation::Binocular | Presentation::Lateralized => VisualField::Both,
        };
        self.presenter.set_parameter(StimulusParameter::ActiveField(eyes));
        self.presenter
            .set_parameter(StimulusParameter::LateralOffset(trial.lateral_offset as f32));
        self.presenter.set_coherence(choice.value as f32);
        self.presenter.set_direction(trial.direction.radians());
        self.presenter.set_visible(StimulusKind::FixationCross, false);
        self.presenter.set_visible(StimulusKind::Dots, true);

        trial.times.motion_start = self.stamp(now);
        active.phase = TrialPhase::Motion;
        active.wait = Wait::after(now, self.config.timing.motion());
    }

    fn after_decision(&mut self, active: &mut ActiveTrial, correct: bool, now: Instant) {
        let trial = &mut active.trial;
        if trial.show_feedback {
            self.presenter.set_parameter(StimulusParameter::FeedbackCorrect(correct));
            self.presenter.set_visible(StimulusKind::Feedback, true);
            trial.times.feedback_start = self.stamp(now);
            active.phase = TrialPhase::Feedback;
            active.wait = Wait::after(now, self.config.timing.feedback());
        } else if trial.ask_confidence {
            self.presenter.set_visible(StimulusKind::ConfidencePrompt, true);
            trial.times.confidence_start = self.stamp(now);
            active.phase = TrialPhase::Confidence;
            active.wait = Wait::Confirm;
        } else {
            active.phase = TrialPhase::End;
        }
    }

    /// Update the staircase (completed training trials only), seal the
    /// record and hand it to the sink.
    fn finish_trial(&mut self, mut trial: Trial, now: Instant) -> Result<()> {
        trial.times.trial_end = self.stamp(now);
        if !trial.aborted && trial.trial_type.is_training() {
            if let (Some(correct), Some(coherence)) = (trial.correct, trial.coherence) {
                self.staircase
                    .on_trial_result(trial.trial_type, trial.field, correct, coherence);
            }
        }
        self.presenter.hide_all();
        let record = trial.seal();
        self.sink.emit(&record)?;
        if trial.aborted {
            self.trials_aborted += 1;
        } else {
            self.trials_completed += 1;
        }
        Ok(())
    }
}
