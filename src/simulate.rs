// src/simulate.rs

use crate::constants::DEFAULT_ABORT_KEY;
use crate::error::Result;
use crate::frontend::{Frontend, KeyPress, Stimulus};
use crate::timing::{Clock, ManualClock};
use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

const DEFAULT_MEAN_RT_MS: f64 = 250.0;
const DEFAULT_RT_SPREAD: f64 = 0.15;
const TEXT_RESPONSE_DELAY_MS: u64 = 300;

/// A scripted participant on a virtual clock.
///
/// Reaction times are log-normal around `mean_rt_ms`. Text screens are
/// answered with the response key every 300 ms while they stay up, so the
/// session moves through its instruction screens on its own.
pub struct SimulatedParticipant {
    clock: ManualClock,
    rng: StdRng,
    target: Stimulus,
    resp_key: String,
    abort_key: String,
    mean_rt_ms: f64,
    spread: f64,
    lapse_rate: f64,
    abort_after_targets: Option<usize>,
    targets_seen: usize,
    pending: Option<KeyPress>,
    text_key_due: Option<Duration>,
    shown: Vec<(Duration, Stimulus)>,
    closed: bool,
}

impl SimulatedParticipant {
    /// `target` is the stimulus the executor shows for the response window.
    pub fn new(target: Stimulus, resp_key: &str, seed: u64) -> Self {
        SimulatedParticipant {
            clock: ManualClock::new(),
            rng: StdRng::seed_from_u64(seed),
            target,
            resp_key: resp_key.to_string(),
            abort_key: DEFAULT_ABORT_KEY.to_string(),
            mean_rt_ms: DEFAULT_MEAN_RT_MS,
            spread: DEFAULT_RT_SPREAD,
            lapse_rate: 0.0,
            abort_after_targets: None,
            targets_seen: 0,
            pending: None,
            text_key_due: None,
            shown: Vec::new(),
            closed: false,
        }
    }

    pub fn mean_rt_ms(mut self, mean: f64) -> Self {
        self.mean_rt_ms = mean.max(1.0);
        self
    }

    /// Log-scale standard deviation. Zero gives a constant reaction time.
    pub fn spread(mut self, sigma: f64) -> Self {
        self.spread = sigma.max(0.0);
        self
    }

    /// Probability of not responding to a target at all.
    pub fn lapse_rate(mut self, p: f64) -> Self {
        self.lapse_rate = p.clamp(0.0, 1.0);
        self
    }

    pub fn abort_key(mut self, key: &str) -> Self {
        self.abort_key = key.to_string();
        self
    }

    /// Presses the abort key while the `n`-th target (1-based) is on screen.
    pub fn abort_after_targets(mut self, n: usize) -> Self {
        self.abort_after_targets = Some(n);
        self
    }

    /// Every stimulus shown so far, stamped with the virtual clock.
    pub fn shown(&self) -> &[(Duration, Stimulus)] {
        &self.shown
    }

    pub fn targets_seen(&self) -> usize {
        self.targets_seen
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    fn sample_rt_ms(&mut self) -> f64 {
        if self.spread == 0.0 {
            return self.mean_rt_ms;
        }
        // Box-Muller
        let u1: f64 = self.rng.gen_range(f64::EPSILON..1.0);
        let u2: f64 = self.rng.gen();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        self.mean_rt_ms * (self.spread * z).exp()
    }

    fn on_target(&mut self) {
        self.targets_seen += 1;
        let now = self.clock.now();

        if self.abort_after_targets == Some(self.targets_seen) {
            self.pending = Some(KeyPress {
                key: self.abort_key.clone(),
                at: now,
            });
            return;
        }
        if self.lapse_rate > 0.0 && self.rng.gen_bool(self.lapse_rate) {
            debug!("[Sim] Lapse on target {}", self.targets_seen);
            self.pending = None;
            return;
        }
        let rt = self.sample_rt_ms();
        self.pending = Some(KeyPress {
            key: self.resp_key.clone(),
            at: now + Duration::from_secs_f64(rt / 1000.0),
        });
    }
}

impl Frontend for SimulatedParticipant {
    fn show(&mut self, stimulus: &Stimulus) -> Result<()> {
        let now = self.clock.now();
        self.shown.push((now, stimulus.clone()));

        if *stimulus == self.target {
            self.text_key_due = None;
            self.on_target();
        } else if matches!(stimulus, Stimulus::Text(_)) {
            self.text_key_due = Some(now + Duration::from_millis(TEXT_RESPONSE_DELAY_MS));
        } else {
            self.text_key_due = None;
        }
        Ok(())
    }

    fn poll_keys(&mut self) -> Result<Vec<KeyPress>> {
        let now = self.clock.now();
        let mut keys = Vec::new();

        if self.pending.as_ref().map_or(false, |k| k.at <= now) {
            keys.extend(self.pending.take());
        }
        if let Some(due) = self.text_key_due {
            if due <= now {
                keys.push(KeyPress {
                    key: self.resp_key.clone(),
                    at: now,
                });
                self.text_key_due = Some(now + Duration::from_millis(TEXT_RESPONSE_DELAY_MS));
            }
        }
        Ok(keys)
    }

    fn clear_keys(&mut self) -> Result<()> {
        // Responses not yet due belong to the future and survive a clear.
        let now = self.clock.now();
        if self.pending.as_ref().map_or(false, |k| k.at <= now) {
            self.pending = None;
        }
        Ok(())
    }

    fn now(&self) -> Duration {
        self.clock.now()
    }

    fn sleep(&mut self, duration: Duration) {
        self.clock.sleep(duration);
    }

    fn close(&mut self) {
        self.closed = true;
    }
}
