// src/models.rs

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// --- Conditions ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
}

impl Valence {
    /// Conditions encode valence as a signed number (+1 win, -1 avoid, 0 neutral).
    pub fn from_sign(value: f64) -> Self {
        if value > 0.0 {
            Valence::Positive
        } else if value < 0.0 {
            Valence::Negative
        } else {
            Valence::Neutral
        }
    }

    pub fn as_sign(&self) -> i8 {
        match self {
            Valence::Positive => 1,
            Valence::Negative => -1,
            Valence::Neutral => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub label: String,
    pub valence: Valence,
    pub magnitude: f64,
    pub points_on_hit: i64,
    pub points_on_miss: i64,
}

impl Condition {
    pub fn payoff(&self, hit: bool) -> i64 {
        if hit {
            self.points_on_hit
        } else {
            self.points_on_miss
        }
    }

    /// Key used to look up magnitude-indexed assets ("0", "1", "5", ...).
    /// Fractional magnitudes truncate toward zero.
    pub fn magnitude_key(&self) -> String {
        format!("{}", self.magnitude.trunc() as i64)
    }
}

// --- R-Score Scope ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HistoryScope {
    Global,
    PerCondition,
}

impl HistoryScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryScope::Global => "global",
            HistoryScope::PerCondition => "per_condition",
        }
    }
}

impl FromStr for HistoryScope {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(HistoryScope::Global),
            "per_condition" => Ok(HistoryScope::PerCondition),
            other => Err(format!(
                "unknown scope '{}', expected 'global' or 'per_condition'",
                other
            )),
        }
    }
}

impl fmt::Display for HistoryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Session ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub participant: String,
    pub session: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub trials_completed: usize,
    pub points_total: i64,
    pub aborted: bool,
}

// --- Trial Records ---

/// The three independent pauses drawn for one trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrialJitter {
    pub pre_cue_ms: u32,
    pub anticipation_ms: u32,
    pub post_feedback_ms: u32,
}

/// Position of a trial within the session. Block 0 is practice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrialSlot {
    pub block: u32,
    pub trial_index: u32,
}

/// One completed trial. Built once when the trial commits and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrialOutcome {
    pub block: u32,
    pub trial_index: u32,
    pub condition: String,
    pub valence: Valence,
    pub magnitude: f64,
    pub target_ms_pre: u32,
    pub target_ms_final: u32,
    pub reaction_time_ms: Option<f64>,
    pub key: Option<String>,
    pub hit: bool,
    pub points_delta: i64,
    pub points_total: i64,
    pub jitter: TrialJitter,
    pub cue_ms: u32,
    pub feedback_ms: u32,
    pub rscore_scope: HistoryScope,
    /// Hit rate (percent) read before the target was finalised; `None` when
    /// the scaler is disabled or the history slot was empty.
    pub rscore_percent: Option<f64>,
    pub completed_at: DateTime<Local>,
}

// --- Stored Views ---

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StoredSession {
    pub id: i64,
    pub participant: String,
    pub session: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub trials_completed: i64,
    pub points_total: Option<i64>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StoredTrial {
    pub block: u32,
    pub trial_index: u32,
    pub condition: String,
    pub target_ms_final: u32,
    pub rt_ms: Option<f64>,
    pub hit: bool,
    pub points_total: i64,
}

/// Per-condition aggregate over one session's stored trials.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ConditionStats {
    pub condition: String,
    pub trials: i64,
    pub hits: i64,
    pub hit_rate: f64,
    pub mean_rt_ms: Option<f64>,
    pub last_target_ms: u32,
}
