// src/executor.rs

use crate::config::ExperimentConfig;
use crate::constants::POLL_INTERVAL_MS;
use crate::error::{MidError, Result};
use crate::frontend::{AbortSignal, Frontend, KeyPress, Stimulus};
use crate::models::{Condition, TrialJitter, TrialOutcome, TrialSlot, Valence};
use crate::rscore;
use crate::session::SessionState;
use crate::stimuli::StimulusCatalog;
use crate::timing::as_ms;
use chrono::Local;
use log::{debug, info};
use rand::RngCore;
use std::time::Duration;

// --- Phase Machine ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialPhase {
    Idle,
    PreCuePause,
    Cue,
    Anticipation,
    ResponseWindow,
    Feedback,
    PostFeedbackPause,
    Complete,
}

impl TrialPhase {
    /// The only legal successor of each phase. `Complete` is terminal.
    pub fn next(self) -> Option<TrialPhase> {
        match self {
            TrialPhase::Idle => Some(TrialPhase::PreCuePause),
            TrialPhase::PreCuePause => Some(TrialPhase::Cue),
            TrialPhase::Cue => Some(TrialPhase::Anticipation),
            TrialPhase::Anticipation => Some(TrialPhase::ResponseWindow),
            TrialPhase::ResponseWindow => Some(TrialPhase::Feedback),
            TrialPhase::Feedback => Some(TrialPhase::PostFeedbackPause),
            TrialPhase::PostFeedbackPause => Some(TrialPhase::Complete),
            TrialPhase::Complete => None,
        }
    }
}

// --- Per-trial Data ---

/// Everything fixed before the first phase runs.
#[derive(Debug, Clone, PartialEq)]
pub struct TrialPlan {
    pub jitter: TrialJitter,
    pub target_ms_pre: u32,
    pub target_ms_final: u32,
    pub rscore_percent: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub key: String,
    pub rt_ms: f64,
}

pub fn is_hit(response: Option<&Response>, target_ms: u32) -> bool {
    response.map_or(false, |r| r.rt_ms <= target_ms as f64)
}

/// Fixes jitters and the target duration for one trial from the state left
/// by the trials before it.
pub fn plan_trial(
    config: &ExperimentConfig,
    state: &SessionState,
    label: &str,
    rng: &mut dyn RngCore,
) -> Result<TrialPlan> {
    let timings = &config.timings;
    let jitter = TrialJitter {
        pre_cue_ms: timings.pre_cue.sample(rng),
        anticipation_ms: timings.anticipation.sample(rng),
        post_feedback_ms: timings.post_feedback.sample(rng),
    };

    let target_ms_pre = state
        .staircase(label)
        .ok_or_else(|| MidError::UnknownCondition(label.to_string()))?
        .current();

    let params = &config.rscore;
    let (scaled, rscore_percent) = if params.enabled {
        let rate = state.history().rate(label);
        let scaled = rscore::adjust(
            target_ms_pre,
            rate,
            params.threshold,
            params.scale,
            config.staircase.min_ms,
        );
        (scaled, rate.map(|r| r * 100.0))
    } else {
        (target_ms_pre, None)
    };
    let target_ms_final = scaled.min(config.staircase.max_for(label));

    Ok(TrialPlan {
        jitter,
        target_ms_pre,
        target_ms_final,
        rscore_percent,
    })
}

fn feedback_caption(condition: &Condition, delta: i64, total: i64, show_total: bool) -> String {
    let mut caption = match condition.valence {
        Valence::Positive => format!("WIN: {:+}", delta),
        Valence::Negative => format!("AVOID: {:+}", delta),
        Valence::Neutral => "NEUTRAL".to_string(),
    };
    if show_total {
        caption.push_str(&format!("\nTotal points: {}", total));
    }
    caption
}

// --- Executor ---

/// Runs single trials against a frontend. Holds no session state of its own;
/// every mutation goes through the `SessionState` passed to `run_trial`.
pub struct TrialExecutor<'a> {
    frontend: &'a mut dyn Frontend,
    config: &'a ExperimentConfig,
    stimuli: &'a StimulusCatalog,
    abort: &'a AbortSignal,
}

impl<'a> TrialExecutor<'a> {
    pub fn new(
        frontend: &'a mut dyn Frontend,
        config: &'a ExperimentConfig,
        stimuli: &'a StimulusCatalog,
        abort: &'a AbortSignal,
    ) -> Self {
        TrialExecutor {
            frontend,
            config,
            stimuli,
            abort,
        }
    }

    /// Runs one trial to completion and commits its result to `state`.
    ///
    /// Returns `MidError::Aborted` if the operator cancels at any phase; in
    /// that case `state` is left exactly as it was.
    pub fn run_trial(
        &mut self,
        state: &mut SessionState,
        slot: TrialSlot,
        label: &str,
        rng: &mut dyn RngCore,
    ) -> Result<TrialOutcome> {
        let config = self.config;
        let condition = config
            .condition(label)
            .ok_or_else(|| MidError::UnknownCondition(label.to_string()))?;
        let plan = plan_trial(config, state, label, rng)?;
        debug!(
            "[Trial] B{} T{} {}: target {}ms (pre {}ms), jitter {:?}",
            slot.block,
            slot.trial_index,
            label,
            plan.target_ms_final,
            plan.target_ms_pre,
            plan.jitter
        );

        let mut response: Option<Response> = None;
        let mut phase = TrialPhase::Idle;
        while let Some(next) = phase.next() {
            self.check_abort()?;
            phase = next;
            match phase {
                TrialPhase::Idle | TrialPhase::Complete => {}
                TrialPhase::PreCuePause => {
                    self.frontend.show(&Stimulus::Fixation)?;
                    self.wait_ms(plan.jitter.pre_cue_ms)?;
                }
                TrialPhase::Cue => {
                    self.frontend.show(&self.stimuli.cue(label))?;
                    self.wait_ms(config.timings.cue_ms)?;
                }
                TrialPhase::Anticipation => {
                    self.frontend.show(&Stimulus::Fixation)?;
                    self.wait_ms(plan.jitter.anticipation_ms)?;
                }
                TrialPhase::ResponseWindow => {
                    response = self.response_window(plan.target_ms_final)?;
                }
                TrialPhase::Feedback => {
                    let hit = is_hit(response.as_ref(), plan.target_ms_final);
                    let delta = condition.payoff(hit);
                    let caption = feedback_caption(
                        condition,
                        delta,
                        state.points_total() + delta,
                        config.task.show_cumulative_points,
                    );
                    self.frontend.show(self.stimuli.performance(hit))?;
                    self.wait_ms(config.timings.feedback_ms)?;
                    self.frontend
                        .show(&self.stimuli.monetary(label, hit).with_caption(caption))?;
                    self.wait_ms(config.timings.feedback_ms)?;
                }
                TrialPhase::PostFeedbackPause => {
                    self.frontend.show(&Stimulus::Fixation)?;
                    self.wait_ms(plan.jitter.post_feedback_ms)?;
                }
            }
        }

        Ok(commit(config, state, slot, condition, &plan, response))
    }

    /// Target on screen for exactly `target_ms`. The first response key wins;
    /// later keys, non-response keys and keys stamped after the deadline are
    /// ignored.
    fn response_window(&mut self, target_ms: u32) -> Result<Option<Response>> {
        let config = self.config;
        let resp_keys = &config.task.resp_keys;
        self.frontend.clear_keys()?;
        self.frontend.show(self.stimuli.target())?;
        let opened = self.frontend.now();
        let deadline = opened + Duration::from_millis(target_ms as u64);

        let mut response = None;
        loop {
            let keys = self.poll_keys()?;
            if response.is_none() {
                response = keys
                    .into_iter()
                    .find(|k| k.at <= deadline && resp_keys.contains(&k.key))
                    .map(|k| Response {
                        rt_ms: as_ms(k.at.saturating_sub(opened)),
                        key: k.key,
                    });
            }
            let now = self.frontend.now();
            if now >= deadline {
                break;
            }
            self.frontend.sleep((deadline - now).min(poll_interval()));
        }

        self.frontend.show(&Stimulus::Fixation)?;
        Ok(response)
    }

    fn wait_ms(&mut self, ms: u32) -> Result<()> {
        let duration = Duration::from_millis(ms as u64);
        wait(&mut *self.frontend, self.abort, &self.config.task.abort_key, duration)
    }

    fn poll_keys(&mut self) -> Result<Vec<KeyPress>> {
        poll_with_abort(&mut *self.frontend, self.abort, &self.config.task.abort_key)
    }

    fn check_abort(&self) -> Result<()> {
        if self.abort.is_triggered() {
            return Err(MidError::Aborted);
        }
        Ok(())
    }
}

fn poll_interval() -> Duration {
    Duration::from_millis(POLL_INTERVAL_MS)
}

/// Polls the frontend; the abort key raises the shared abort signal.
pub(crate) fn poll_with_abort(
    frontend: &mut dyn Frontend,
    abort: &AbortSignal,
    abort_key: &str,
) -> Result<Vec<KeyPress>> {
    let keys = frontend.poll_keys()?;
    if keys.iter().any(|k| k.key == abort_key) {
        abort.trigger();
    }
    if abort.is_triggered() {
        return Err(MidError::Aborted);
    }
    Ok(keys)
}

/// Cooperative sleep that keeps polling for the abort key.
pub(crate) fn wait(
    frontend: &mut dyn Frontend,
    abort: &AbortSignal,
    abort_key: &str,
    duration: Duration,
) -> Result<()> {
    let deadline = frontend.now() + duration;
    loop {
        poll_with_abort(frontend, abort, abort_key)?;
        let now = frontend.now();
        if now >= deadline {
            return Ok(());
        }
        frontend.sleep((deadline - now).min(poll_interval()));
    }
}

/// Applies the trial result: payout, staircase step, history record, outcome.
fn commit(
    config: &ExperimentConfig,
    state: &mut SessionState,
    slot: TrialSlot,
    condition: &Condition,
    plan: &TrialPlan,
    response: Option<Response>,
) -> TrialOutcome {
    let label = condition.label.as_str();
    let hit = is_hit(response.as_ref(), plan.target_ms_final);
    let points_delta = condition.payoff(hit);
    let points_total = state.apply(label, hit, points_delta);

    info!(
        "[Trial] B{} T{} {}: target {}ms, rt {}, {} -> {:+} pts (total {})",
        slot.block,
        slot.trial_index,
        label,
        plan.target_ms_final,
        response
            .as_ref()
            .map_or_else(|| "none".to_string(), |r| format!("{:.1}ms", r.rt_ms)),
        if hit { "HIT" } else { "MISS" },
        points_delta,
        points_total
    );

    let (reaction_time_ms, key) = match response {
        Some(r) => (Some(r.rt_ms), Some(r.key)),
        None => (None, None),
    };
    TrialOutcome {
        block: slot.block,
        trial_index: slot.trial_index,
        condition: condition.label.clone(),
        valence: condition.valence,
        magnitude: condition.magnitude,
        target_ms_pre: plan.target_ms_pre,
        target_ms_final: plan.target_ms_final,
        reaction_time_ms,
        key,
        hit,
        points_delta,
        points_total,
        jitter: plan.jitter,
        cue_ms: config.timings.cue_ms,
        feedback_ms: config.timings.feedback_ms,
        rscore_scope: config.rscore.scope,
        rscore_percent: plan.rscore_percent,
        completed_at: Local::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;
    use crate::timing::{Clock, ManualClock};

    const CONFIG: &str = r#"{
        "timings": {"cue_ms": 250, "pause1_ms_range": [500, 500], "pause2_ms_range": [800, 800],
                    "pause3_ms_range": [1000, 1000], "feedback_ms": 500},
        "staircase": {"initial_ms": 250, "min_ms": 120, "max_ms": 400, "step_ms": 10},
        "rscore": {"enabled": true, "window": 4, "threshold": 75.0, "scale": 0.9, "scope": "global"},
        "task": {"n_blocks": 1, "trials_per_block": 2, "resp_keys": ["space"],
                 "show_cumulative_points": true, "practice_trials": 0},
        "conditions": [["WIN", 1, 1, 10, 0], ["LOSE", -1, 1, 0, -10]]
    }"#;

    /// Replays keys at fixed offsets from each target onset.
    struct Scripted {
        clock: ManualClock,
        target: Stimulus,
        script: Vec<(u64, &'static str)>,
        queue: Vec<KeyPress>,
        shown: Vec<Stimulus>,
        oversleep: Duration,
    }

    impl Scripted {
        fn new(target: &Stimulus, script: Vec<(u64, &'static str)>) -> Self {
            Scripted {
                clock: ManualClock::new(),
                target: target.clone(),
                script,
                queue: Vec::new(),
                shown: Vec::new(),
                oversleep: Duration::ZERO,
            }
        }

        /// Every sleep runs `ms` past what was asked, like a loaded scheduler.
        fn oversleeping(mut self, ms: u64) -> Self {
            self.oversleep = Duration::from_millis(ms);
            self
        }
    }

    impl Frontend for Scripted {
        fn show(&mut self, stimulus: &Stimulus) -> Result<()> {
            self.shown.push(stimulus.clone());
            if *stimulus == self.target {
                let now = self.clock.now();
                self.queue = self
                    .script
                    .iter()
                    .map(|(ms, key)| KeyPress {
                        key: key.to_string(),
                        at: now + Duration::from_millis(*ms),
                    })
                    .collect();
            }
            Ok(())
        }

        fn poll_keys(&mut self) -> Result<Vec<KeyPress>> {
            let now = self.clock.now();
            let (due, later): (Vec<_>, Vec<_>) = self.queue.drain(..).partition(|k| k.at <= now);
            self.queue = later;
            Ok(due)
        }

        fn clear_keys(&mut self) -> Result<()> {
            let now = self.clock.now();
            self.queue.retain(|k| k.at > now);
            Ok(())
        }

        fn now(&self) -> Duration {
            self.clock.now()
        }

        fn sleep(&mut self, duration: Duration) {
            self.clock.sleep(duration + self.oversleep);
        }

        fn close(&mut self) {}
    }

    struct Fixture {
        config: ExperimentConfig,
        stimuli: StimulusCatalog,
        state: SessionState,
        abort: AbortSignal,
    }

    fn fixture() -> Fixture {
        let config = parse_config(CONFIG).unwrap();
        let stimuli = StimulusCatalog::load_with(&config, |_| false);
        let state = SessionState::new(&config);
        Fixture {
            config,
            stimuli,
            state,
            abort: AbortSignal::new(),
        }
    }

    fn slot(i: u32) -> TrialSlot {
        TrialSlot {
            block: 1,
            trial_index: i,
        }
    }

    fn run(fx: &mut Fixture, frontend: &mut dyn Frontend, label: &str) -> Result<TrialOutcome> {
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let mut exec = TrialExecutor::new(frontend, &fx.config, &fx.stimuli, &fx.abort);
        exec.run_trial(&mut fx.state, slot(1), label, &mut rng)
    }

    #[test]
    fn phases_advance_in_fixed_order() {
        let mut phase = TrialPhase::Idle;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(
            seen,
            vec![
                TrialPhase::Idle,
                TrialPhase::PreCuePause,
                TrialPhase::Cue,
                TrialPhase::Anticipation,
                TrialPhase::ResponseWindow,
                TrialPhase::Feedback,
                TrialPhase::PostFeedbackPause,
                TrialPhase::Complete,
            ]
        );
    }

    #[test]
    fn hit_pays_out_and_shows_every_phase() {
        let mut fx = fixture();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![(200, "space")]);
        let outcome = run(&mut fx, &mut fe, "WIN").unwrap();

        assert!(outcome.hit);
        assert_eq!(outcome.reaction_time_ms, Some(200.0));
        assert_eq!(outcome.key.as_deref(), Some("space"));
        assert_eq!(outcome.points_delta, 10);
        assert_eq!(outcome.points_total, 10);
        assert_eq!(fx.state.points_total(), 10);
        assert_eq!(fx.state.staircase("WIN").unwrap().consecutive_hits(), 1);
        assert_eq!(
            fe.shown,
            vec![
                Stimulus::Fixation,
                Stimulus::Text("?".into()),
                Stimulus::Fixation,
                Stimulus::Text("◉".into()),
                Stimulus::Fixation,
                Stimulus::Text("?".into()),
                Stimulus::Text("?\nWIN: +10\nTotal points: 10".into()),
                Stimulus::Fixation,
            ]
        );
        // 500 + 250 + 800 + 250 + 2 * 500 + 1000
        assert_eq!(fe.now(), Duration::from_millis(3800));
    }

    #[test]
    fn late_response_is_a_miss() {
        let mut fx = fixture();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![(251, "space")]);
        let outcome = run(&mut fx, &mut fe, "LOSE").unwrap();

        assert!(!outcome.hit);
        assert_eq!(outcome.reaction_time_ms, None);
        assert_eq!(outcome.points_delta, -10);
        assert_eq!(fx.state.staircase("LOSE").unwrap().current(), 260);
    }

    #[test]
    fn response_exactly_at_deadline_hits() {
        let mut fx = fixture();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![(250, "space")]);
        assert!(run(&mut fx, &mut fe, "WIN").unwrap().hit);
    }

    #[test]
    fn first_response_key_wins_and_others_are_ignored() {
        let mut fx = fixture();
        let script = vec![(50, "j"), (120, "space"), (180, "space")];
        let mut fe = Scripted::new(fx.stimuli.target(), script);
        let outcome = run(&mut fx, &mut fe, "WIN").unwrap();
        assert_eq!(outcome.reaction_time_ms, Some(120.0));
        assert_eq!(outcome.key.as_deref(), Some("space"));
    }

    #[test]
    fn abort_discards_trial_and_leaves_state() {
        let mut fx = fixture();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![(100, "escape")]);
        let err = run(&mut fx, &mut fe, "WIN").unwrap_err();

        assert!(err.is_abort());
        assert!(fx.abort.is_triggered());
        assert_eq!(fx.state.points_total(), 0);
        assert_eq!(fx.state.staircase("WIN").unwrap().current(), 250);
        assert!(fx.state.history().rate("WIN").is_none());
    }

    #[test]
    fn external_abort_stops_before_next_phase() {
        let mut fx = fixture();
        fx.abort.trigger();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![]);
        assert!(run(&mut fx, &mut fe, "WIN").unwrap_err().is_abort());
        assert!(fe.shown.is_empty());
    }

    #[test]
    fn unknown_condition_rejected() {
        let mut fx = fixture();
        let mut fe = Scripted::new(fx.stimuli.target(), vec![]);
        assert!(matches!(
            run(&mut fx, &mut fe, "BONUS"),
            Err(MidError::UnknownCondition(_))
        ));
    }

    #[test]
    fn plan_scales_target_above_threshold() {
        let mut fx = fixture();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        // Four hits: 250 -> 250 -> 240 -> 240 -> 230; history 100%.
        for _ in 0..4 {
            fx.state.apply("WIN", true, 10);
        }
        let plan = plan_trial(&fx.config, &fx.state, "WIN", &mut rng).unwrap();
        assert_eq!(plan.target_ms_pre, 230);
        assert_eq!(plan.target_ms_final, 207);
        assert_eq!(plan.rscore_percent, Some(100.0));
        assert_eq!(plan.jitter.pre_cue_ms, 500);
    }

    #[test]
    fn plan_without_history_keeps_staircase_value() {
        let fx = fixture();
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);
        let plan = plan_trial(&fx.config, &fx.state, "LOSE", &mut rng).unwrap();
        assert_eq!(plan.target_ms_final, plan.target_ms_pre);
        assert_eq!(plan.rscore_percent, None);
    }

    #[test]
    fn key_after_deadline_ignored_when_sleep_overshoots() {
        let mut fx = fixture();
        // Polls land at 0, 4, 8, ... 248, 252: the 251 ms press is seen after
        // the 250 ms window has closed.
        let mut fe = Scripted::new(fx.stimuli.target(), vec![(251, "space")]).oversleeping(3);
        let outcome = run(&mut fx, &mut fe, "WIN").unwrap();

        assert!(!outcome.hit);
        assert_eq!(outcome.reaction_time_ms, None);
        assert_eq!(outcome.key, None);
    }

    #[test]
    fn disabled_scaler_keeps_target_but_records_history() {
        let mut v: serde_json::Value = serde_json::from_str(CONFIG).unwrap();
        v["rscore"]["enabled"] = serde_json::json!(false);
        let config = parse_config(&v.to_string()).unwrap();
        let mut state = SessionState::new(&config);
        let mut rng = rand::rngs::mock::StepRng::new(0, 1);

        for _ in 0..4 {
            state.apply("WIN", true, 10);
        }
        assert_eq!(state.history().rate("WIN"), Some(1.0));

        let plan = plan_trial(&config, &state, "WIN", &mut rng).unwrap();
        assert_eq!(plan.target_ms_pre, 230);
        assert_eq!(plan.target_ms_final, plan.target_ms_pre);
        assert_eq!(plan.rscore_percent, None);
    }
}
