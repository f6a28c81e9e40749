// src/session.rs

use crate::config::ExperimentConfig;
use crate::constants::{GOODBYE_DISPLAY_MS, POLL_INTERVAL_MS, TITLE_MIN_DISPLAY_MS};
use crate::error::{MidError, Result};
use crate::executor::{poll_with_abort, wait, TrialExecutor};
use crate::frontend::{AbortSignal, Frontend, Stimulus};
use crate::models::{SessionInfo, SessionSummary, TrialOutcome, TrialSlot};
use crate::rscore::HistoryStore;
use crate::scheduler::build_sequence;
use crate::sink::TrialSink;
use crate::staircase::Staircase;
use crate::stimuli::{fill_template, StimulusCatalog};
use log::{error, info, warn};
use rand::RngCore;
use std::collections::HashMap;
use std::time::Duration;

// --- Session State ---

/// All mutable state of a running session: points, one staircase per
/// condition and the performance history. Owned by `Session` and handed to
/// the executor explicitly.
#[derive(Debug, Clone)]
pub struct SessionState {
    points_total: i64,
    staircases: HashMap<String, Staircase>,
    history: HistoryStore,
}

impl SessionState {
    pub fn new(config: &ExperimentConfig) -> Self {
        let sc = &config.staircase;
        let staircases = config
            .conditions
            .iter()
            .map(|c| {
                let max_ms = sc.max_for(&c.label);
                let stair = Staircase::new(sc.initial_ms, sc.min_ms, max_ms, sc.step_ms);
                (c.label.clone(), stair)
            })
            .collect();

        SessionState {
            points_total: config.start_points,
            staircases,
            history: HistoryStore::new(config.rscore.scope, config.rscore.window),
        }
    }

    pub fn points_total(&self) -> i64 {
        self.points_total
    }

    pub fn staircase(&self, label: &str) -> Option<&Staircase> {
        self.staircases.get(label)
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Commits one trial: payout, staircase step, history record.
    /// Returns the new running total.
    pub(crate) fn apply(&mut self, label: &str, hit: bool, points_delta: i64) -> i64 {
        self.points_total += points_delta;
        if let Some(stair) = self.staircases.get_mut(label) {
            stair.update(hit);
        }
        self.history.record(label, hit);
        self.points_total
    }
}

// --- Session Runner ---

pub struct Session {
    config: ExperimentConfig,
    info: SessionInfo,
    stimuli: StimulusCatalog,
    state: SessionState,
    outcomes: Vec<TrialOutcome>,
}

impl Session {
    pub fn with_stimuli(
        config: ExperimentConfig,
        info: SessionInfo,
        stimuli: StimulusCatalog,
    ) -> Self {
        let state = SessionState::new(&config);
        Session {
            config,
            info,
            stimuli,
            state,
            outcomes: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Completed trials in execution order.
    pub fn outcomes(&self) -> &[TrialOutcome] {
        &self.outcomes
    }

    /// Runs practice and all blocks. The sink is closed and the frontend
    /// released on every exit path, including abort and errors.
    pub fn run(
        &mut self,
        frontend: &mut dyn Frontend,
        sink: &mut dyn TrialSink,
        abort: &AbortSignal,
        rng: &mut dyn RngCore,
    ) -> Result<SessionSummary> {
        info!(
            "[Session] Starting participant '{}' session '{}'",
            self.info.participant, self.info.session
        );

        let result = self.run_phases(frontend, sink, abort, rng);
        let closed = sink.close();
        frontend.close();

        match result {
            Ok(()) => {
                closed?;
                let summary = self.summary(false);
                info!(
                    "[Session] Finished: {} trials, {} points",
                    summary.trials_completed, summary.points_total
                );
                Ok(summary)
            }
            Err(MidError::Aborted) => {
                warn!("{}", self.config.text.escape_message);
                closed?;
                let summary = self.summary(true);
                warn!(
                    "[Session] Aborted after {} completed trials",
                    summary.trials_completed
                );
                Ok(summary)
            }
            Err(e) => {
                if let Err(close_err) = closed {
                    error!("[Session] Failed to close trial log: {}", close_err);
                }
                Err(e)
            }
        }
    }

    fn summary(&self, aborted: bool) -> SessionSummary {
        SessionSummary {
            trials_completed: self.outcomes.len(),
            points_total: self.state.points_total(),
            aborted,
        }
    }

    fn run_phases(
        &mut self,
        frontend: &mut dyn Frontend,
        sink: &mut dyn TrialSink,
        abort: &AbortSignal,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let text = self.config.text.clone();
        let task = self.config.task.clone();

        // 1. Title + Instructions
        let title = format!("{}\n\n{}\n\n{}", text.title, text.subtitle, text.start_instruction);
        self.key_screen(frontend, abort, title, Duration::from_millis(TITLE_MIN_DISPLAY_MS))?;
        self.key_screen(frontend, abort, text.task_instructions.clone(), Duration::ZERO)?;

        // 2. Practice (block 0)
        if task.practice_trials > 0 {
            info!("[Session] Practice: {} trials", task.practice_trials);
            let sequence = build_sequence(&self.config.conditions, task.practice_trials, rng);
            self.run_block(0, &sequence, frontend, sink, abort, rng)?;
            self.key_screen(frontend, abort, text.practice_end.clone(), Duration::ZERO)?;
        }

        // 3. Main blocks
        for block in 1..=task.n_blocks {
            let intro = fill_template(
                &text.block_start,
                &[
                    ("block_num", block.to_string()),
                    ("total_blocks", task.n_blocks.to_string()),
                ],
            );
            self.key_screen(frontend, abort, intro, Duration::ZERO)?;

            let sequence = build_sequence(&self.config.conditions, task.trials_per_block, rng);
            info!("[Session] Block {}/{}: {} trials", block, task.n_blocks, sequence.len());
            self.run_block(block, &sequence, frontend, sink, abort, rng)?;
        }

        // 4. Goodbye
        let goodbye = fill_template(
            &text.experiment_end,
            &[("total_points", self.state.points_total().to_string())],
        );
        frontend.show(&Stimulus::Text(goodbye))?;
        let shown = wait(
            frontend,
            abort,
            &task.abort_key,
            Duration::from_millis(GOODBYE_DISPLAY_MS),
        );
        // Every trial is already logged; cancelling here only cuts the screen short.
        match shown {
            Err(MidError::Aborted) => {
                info!("[Session] Goodbye screen skipped by operator");
                Ok(())
            }
            other => other,
        }
    }

    fn run_block(
        &mut self,
        block: u32,
        sequence: &[String],
        frontend: &mut dyn Frontend,
        sink: &mut dyn TrialSink,
        abort: &AbortSignal,
        rng: &mut dyn RngCore,
    ) -> Result<()> {
        let mut executor = TrialExecutor::new(frontend, &self.config, &self.stimuli, abort);
        for (i, label) in sequence.iter().enumerate() {
            let slot = TrialSlot {
                block,
                trial_index: i as u32 + 1,
            };
            let outcome = executor.run_trial(&mut self.state, slot, label, rng)?;
            // Persist before the next trial starts so an abort never loses it.
            sink.append(&self.info, &outcome)?;
            self.outcomes.push(outcome);
        }
        Ok(())
    }

    /// Shows a text screen for at least `min_display`, then waits for any
    /// response key. Keys pressed during `min_display` do not count.
    fn key_screen(
        &self,
        frontend: &mut dyn Frontend,
        abort: &AbortSignal,
        text: String,
        min_display: Duration,
    ) -> Result<()> {
        let task = &self.config.task;
        frontend.show(&Stimulus::Text(text))?;
        wait(frontend, abort, &task.abort_key, min_display)?;
        frontend.clear_keys()?;
        loop {
            let keys = poll_with_abort(frontend, abort, &task.abort_key)?;
            if keys.iter().any(|k| task.resp_keys.contains(&k.key)) {
                return Ok(());
            }
            frontend.sleep(Duration::from_millis(POLL_INTERVAL_MS));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::frontend::KeyPress;
    use crate::simulate::SimulatedParticipant;
    use crate::sink::MemorySink;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    const CONFIG: &str = r#"{
        "timings": {"cue_ms": 250, "pause1_ms_range": [750, 1250], "pause2_ms_range": [800, 1200],
                    "pause3_ms_range": [2000, 3000], "feedback_ms": 500},
        "staircase": {"initial_ms": 250, "min_ms": 120, "max_ms": 400, "step_ms": 10},
        "rscore": {"enabled": true, "window": 20, "threshold": 75.0, "scale": 0.9, "scope": "global"},
        "task": {"n_blocks": 2, "trials_per_block": 6, "resp_keys": ["space"],
                 "show_cumulative_points": true, "practice_trials": 3},
        "conditions": [["WIN", 1, 1, 10, 0], ["LOSE", -1, 1, 0, -10], ["NEUTRAL", 0, 0, 0, 0]]
    }"#;

    fn setup() -> (Session, SimulatedParticipant) {
        let config = parse_config(CONFIG).unwrap();
        let stimuli = StimulusCatalog::load_with(&config, |_| false);
        let sim = SimulatedParticipant::new(stimuli.target().clone(), "space", 5)
            .mean_rt_ms(200.0)
            .spread(0.0);
        let info = SessionInfo {
            participant: "p01".into(),
            session: "001".into(),
        };
        (Session::with_stimuli(config, info, stimuli), sim)
    }

    #[test]
    fn points_follow_payoffs() {
        let config = parse_config(CONFIG).unwrap();
        let mut state = SessionState::new(&config);
        assert_eq!(state.apply("WIN", true, 10), 10);
        assert_eq!(state.apply("LOSE", false, -10), 0);
        assert_eq!(state.points_total(), 0);
        assert_eq!(state.staircase("LOSE").unwrap().current(), 260);
    }

    #[test]
    fn full_session_logs_every_trial() {
        let (mut session, mut sim) = setup();
        let mut sink = MemorySink::default();
        let mut rng = StdRng::seed_from_u64(11);
        let summary = session
            .run(&mut sim, &mut sink, &AbortSignal::new(), &mut rng)
            .unwrap();

        assert!(!summary.aborted);
        assert_eq!(summary.trials_completed, 3 + 2 * 6);
        assert_eq!(sink.rows.len(), 15);
        assert!(sink.closed);
        assert!(sim.is_closed());
        assert_eq!(sink.rows.iter().filter(|o| o.block == 0).count(), 3);
        assert_eq!(sink.rows.last().unwrap().points_total, summary.points_total);

        // Each main block holds every condition twice.
        for block in 1..=2 {
            for label in ["WIN", "LOSE", "NEUTRAL"] {
                let n = sink
                    .rows
                    .iter()
                    .filter(|o| o.block == block && o.condition == label)
                    .count();
                assert_eq!(n, 2);
            }
        }
    }

    #[test]
    fn abort_keeps_completed_trials_only() {
        let (mut session, sim) = setup();
        let mut sim = sim.abort_after_targets(3);
        let mut sink = MemorySink::default();
        let mut rng = StdRng::seed_from_u64(11);
        let summary = session
            .run(&mut sim, &mut sink, &AbortSignal::new(), &mut rng)
            .unwrap();

        assert!(summary.aborted);
        assert_eq!(summary.trials_completed, 2);
        assert_eq!(sink.rows.len(), 2);
        assert_eq!(session.outcomes().len(), 2);
        assert_eq!(session.state().points_total(), summary.points_total);
        assert!(sink.closed);
        assert!(sim.is_closed());
    }

    #[test]
    fn goodbye_shows_final_total() {
        let (mut session, mut sim) = setup();
        let mut sink = MemorySink::default();
        let mut rng = StdRng::seed_from_u64(3);
        let summary = session
            .run(&mut sim, &mut sink, &AbortSignal::new(), &mut rng)
            .unwrap();

        let (_, last) = sim.shown().last().unwrap();
        let expected = format!("Total points: {}", summary.points_total);
        assert!(matches!(last, Stimulus::Text(t) if t.contains(&expected)));
    }

    /// Presses the abort key as soon as the goodbye screen appears.
    struct EscapeAtGoodbye {
        inner: SimulatedParticipant,
        pressed: bool,
    }

    impl Frontend for EscapeAtGoodbye {
        fn show(&mut self, stimulus: &Stimulus) -> Result<()> {
            if matches!(stimulus, Stimulus::Text(t) if t.starts_with("Done!")) {
                self.pressed = true;
            }
            self.inner.show(stimulus)
        }

        fn poll_keys(&mut self) -> Result<Vec<KeyPress>> {
            let mut keys = self.inner.poll_keys()?;
            if self.pressed {
                keys.push(KeyPress {
                    key: "escape".into(),
                    at: self.inner.now(),
                });
            }
            Ok(keys)
        }

        fn clear_keys(&mut self) -> Result<()> {
            self.inner.clear_keys()
        }

        fn now(&self) -> Duration {
            self.inner.now()
        }

        fn sleep(&mut self, duration: Duration) {
            self.inner.sleep(duration);
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[test]
    fn abort_on_goodbye_still_completes() {
        let (mut session, sim) = setup();
        let mut frontend = EscapeAtGoodbye {
            inner: sim,
            pressed: false,
        };
        let mut sink = MemorySink::default();
        let abort = AbortSignal::new();
        let mut rng = StdRng::seed_from_u64(4);
        let summary = session.run(&mut frontend, &mut sink, &abort, &mut rng).unwrap();

        assert!(frontend.pressed);
        assert!(abort.is_triggered());
        assert!(!summary.aborted);
        assert_eq!(summary.trials_completed, 15);
        assert_eq!(sink.rows.len(), 15);
    }
}
