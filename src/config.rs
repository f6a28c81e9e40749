// src/config.rs

use crate::constants::DEFAULT_ABORT_KEY;
use crate::error::ConfigError;
use crate::models::{Condition, HistoryScope, Valence};
use crate::timing::JitterRange;
use log::{debug, info};
use serde::Deserialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

// --- Validated Config ---

#[derive(Debug, Clone, PartialEq)]
pub struct Timings {
    pub cue_ms: u32,
    pub pre_cue: JitterRange,
    pub anticipation: JitterRange,
    pub post_feedback: JitterRange,
    pub feedback_ms: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaircaseParams {
    pub initial_ms: u32,
    pub min_ms: u32,
    pub max_ms: u32,
    pub step_ms: u32,
    pub per_condition_max_ms: HashMap<String, u32>,
}

impl StaircaseParams {
    /// Per-condition override if configured, else the global max.
    pub fn max_for(&self, label: &str) -> u32 {
        self.per_condition_max_ms
            .get(label)
            .copied()
            .unwrap_or(self.max_ms)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RScoreParams {
    pub enabled: bool,
    pub window: usize,
    pub threshold: f64,
    pub scale: f64,
    pub scope: HistoryScope,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskParams {
    pub n_blocks: u32,
    pub trials_per_block: usize,
    pub resp_keys: Vec<String>,
    pub show_cumulative_points: bool,
    pub practice_trials: usize,
    pub abort_key: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PerformanceImages {
    pub hit: PathBuf,
    pub miss: PathBuf,
}

impl Default for PerformanceImages {
    fn default() -> Self {
        PerformanceImages {
            hit: PathBuf::from("images/PerformanceFeedbackPositiv.png"),
            miss: PathBuf::from("images/PerformanceFeedbackNegativ.png"),
        }
    }
}

/// Asset paths. Presentation detail, so every field may default silently.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Visuals {
    pub target_image: PathBuf,
    pub cue_images: HashMap<String, PathBuf>,
    pub monetary_feedback_images: HashMap<String, PathBuf>,
    pub performance_feedback_images: PerformanceImages,
}

impl Visuals {
    /// Prefixes every relative asset path with `base`.
    pub fn rebase(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        fix(&mut self.target_image);
        self.cue_images.values_mut().for_each(fix);
        self.monetary_feedback_images.values_mut().for_each(fix);
        fix(&mut self.performance_feedback_images.hit);
        fix(&mut self.performance_feedback_images.miss);
    }
}

impl Default for Visuals {
    fn default() -> Self {
        let by_magnitude = |prefix: &str| -> HashMap<String, PathBuf> {
            [("0", "00"), ("1", "03"), ("5", "30")]
                .iter()
                .map(|(k, suffix)| {
                    (k.to_string(), PathBuf::from(format!("images/{}{}.png", prefix, suffix)))
                })
                .collect()
        };
        Visuals {
            target_image: PathBuf::from("images/Target.png"),
            cue_images: by_magnitude("Cue"),
            monetary_feedback_images: by_magnitude("MonetaryFeedbackPositiv"),
            performance_feedback_images: PerformanceImages::default(),
        }
    }
}

/// Participant-facing screen texts. `{block_num}`, `{total_blocks}` and
/// `{total_points}` are substituted at display time.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct TextContent {
    pub title: String,
    pub subtitle: String,
    pub start_instruction: String,
    pub task_instructions: String,
    pub practice_end: String,
    pub block_start: String,
    pub experiment_end: String,
    pub escape_message: String,
}

impl Default for TextContent {
    fn default() -> Self {
        TextContent {
            title: "M I D".to_string(),
            subtitle: "Monetary Incentive Delay Task".to_string(),
            start_instruction: "Press a response key to continue.".to_string(),
            task_instructions: "Keep your eyes on the centre of the screen.\n\
                A cue announces whether you can win a large amount (+), \
                a small amount (o) or nothing (-).\n\
                When the target appears, press the response key as fast as you can.\n\n\
                Press a response key to start."
                .to_string(),
            practice_end: "End of practice.\nPress a response key to start.".to_string(),
            block_start: "Block {block_num} of {total_blocks}\n\nPress a response key to start."
                .to_string(),
            experiment_end: "Done!\nTotal points: {total_points}\n\nThank you.".to_string(),
            escape_message: "Aborted by operator (ESC), saving data and exiting...".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentConfig {
    pub timings: Timings,
    pub staircase: StaircaseParams,
    pub rscore: RScoreParams,
    pub task: TaskParams,
    pub conditions: Vec<Condition>,
    pub visuals: Visuals,
    pub start_points: i64,
    pub text: TextContent,
}

impl ExperimentConfig {
    pub fn condition(&self, label: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.label == label)
    }
}

// --- Raw (unvalidated) Shape ---

#[derive(Deserialize)]
struct RawConfig {
    timings: Option<RawTimings>,
    staircase: Option<RawStaircase>,
    rscore: Option<RawRScore>,
    task: Option<RawTask>,
    conditions: Option<Vec<Value>>,
    #[serde(default)]
    visuals: Visuals,
    #[serde(default)]
    points: RawPoints,
    #[serde(default)]
    text: TextContent,
}

#[derive(Deserialize)]
struct RawTimings {
    cue_ms: Option<u32>,
    pause1_ms_range: Option<JitterRange>,
    pause2_ms_range: Option<JitterRange>,
    pause3_ms_range: Option<JitterRange>,
    feedback_ms: Option<u32>,
}

#[derive(Deserialize)]
struct RawStaircase {
    initial_ms: Option<u32>,
    min_ms: Option<u32>,
    max_ms: Option<u32>,
    step_ms: Option<u32>,
    #[serde(default)]
    per_condition_max_ms: HashMap<String, u32>,
}

#[derive(Deserialize)]
struct RawRScore {
    enabled: Option<bool>,
    window: Option<usize>,
    threshold: Option<f64>,
    scale: Option<f64>,
    scope: Option<String>,
}

#[derive(Deserialize)]
struct RawTask {
    n_blocks: Option<u32>,
    trials_per_block: Option<usize>,
    resp_keys: Option<Vec<String>>,
    show_cumulative_points: Option<bool>,
    practice_trials: Option<usize>,
    abort_key: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawPoints {
    #[serde(default)]
    start: i64,
}

// --- Public Interface ---

/// Loads and validates a config file. Relative asset paths are resolved
/// against the file's directory.
pub fn load_config(path: &Path) -> Result<ExperimentConfig, ConfigError> {
    info!("[Config] Loading {:?}", path);
    let text = fs::read_to_string(path)?;
    let mut config = parse_config(&text)?;
    if let Some(base) = path.parent() {
        config.visuals.rebase(base);
    }
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<ExperimentConfig, ConfigError> {
    let raw: RawConfig = serde_json::from_str(text)?;

    // Sections first, so a missing block is reported as a whole.
    let timings = raw.timings.ok_or_else(|| missing_section("timings"))?;
    let staircase = raw.staircase.ok_or_else(|| missing_section("staircase"))?;
    let rscore = raw.rscore.ok_or_else(|| missing_section("rscore"))?;
    let task = raw.task.ok_or_else(|| missing_section("task"))?;
    let conditions = match raw.conditions {
        Some(c) if !c.is_empty() => c,
        _ => return Err(missing_section("conditions")),
    };

    let conditions = conditions
        .iter()
        .enumerate()
        .map(|(i, v)| parse_condition(i, v))
        .collect::<Result<Vec<_>, _>>()?;
    check_unique_labels(&conditions)?;

    let config = ExperimentConfig {
        timings: validate_timings(timings)?,
        staircase: validate_staircase(staircase, &conditions)?,
        rscore: validate_rscore(rscore)?,
        task: validate_task(task)?,
        conditions,
        visuals: raw.visuals,
        start_points: raw.points.start,
        text: raw.text,
    };

    debug!(
        "[Config] {} conditions, {} blocks x {} trials, practice {}, rscore {} ({})",
        config.conditions.len(),
        config.task.n_blocks,
        config.task.trials_per_block,
        config.task.practice_trials,
        if config.rscore.enabled { "on" } else { "off" },
        config.rscore.scope
    );
    Ok(config)
}

// --- Validation ---

fn missing_section(name: &str) -> ConfigError {
    ConfigError::MissingSection(name.to_string())
}

fn require<T>(value: Option<T>, path: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField(path.to_string()))
}

fn invalid(path: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidField {
        path: path.to_string(),
        reason: reason.into(),
    }
}

fn validate_range(range: JitterRange, path: &str) -> Result<JitterRange, ConfigError> {
    if range.lo_ms > range.hi_ms {
        return Err(invalid(
            path,
            format!("lower bound {} exceeds upper bound {}", range.lo_ms, range.hi_ms),
        ));
    }
    Ok(range)
}

fn validate_timings(raw: RawTimings) -> Result<Timings, ConfigError> {
    Ok(Timings {
        cue_ms: require(raw.cue_ms, "timings.cue_ms")?,
        pre_cue: validate_range(
            require(raw.pause1_ms_range, "timings.pause1_ms_range")?,
            "timings.pause1_ms_range",
        )?,
        anticipation: validate_range(
            require(raw.pause2_ms_range, "timings.pause2_ms_range")?,
            "timings.pause2_ms_range",
        )?,
        post_feedback: validate_range(
            require(raw.pause3_ms_range, "timings.pause3_ms_range")?,
            "timings.pause3_ms_range",
        )?,
        feedback_ms: require(raw.feedback_ms, "timings.feedback_ms")?,
    })
}

fn validate_staircase(
    raw: RawStaircase,
    conditions: &[Condition],
) -> Result<StaircaseParams, ConfigError> {
    let initial_ms = require(raw.initial_ms, "staircase.initial_ms")?;
    let min_ms = require(raw.min_ms, "staircase.min_ms")?;
    let max_ms = require(raw.max_ms, "staircase.max_ms")?;
    let step_ms = require(raw.step_ms, "staircase.step_ms")?;

    if min_ms > max_ms {
        return Err(invalid("staircase.min_ms", format!("{} exceeds max_ms {}", min_ms, max_ms)));
    }
    if !(min_ms..=max_ms).contains(&initial_ms) {
        return Err(invalid(
            "staircase.initial_ms",
            format!("{} outside [{}, {}]", initial_ms, min_ms, max_ms),
        ));
    }
    if step_ms == 0 {
        return Err(invalid("staircase.step_ms", "must be greater than 0"));
    }
    for (label, &cap) in &raw.per_condition_max_ms {
        let path = format!("staircase.per_condition_max_ms.{}", label);
        if !conditions.iter().any(|c| &c.label == label) {
            return Err(invalid(&path, "no condition with this label"));
        }
        if cap < min_ms {
            return Err(invalid(&path, format!("{} is below min_ms {}", cap, min_ms)));
        }
    }

    Ok(StaircaseParams {
        initial_ms,
        min_ms,
        max_ms,
        step_ms,
        per_condition_max_ms: raw.per_condition_max_ms,
    })
}

fn validate_rscore(raw: RawRScore) -> Result<RScoreParams, ConfigError> {
    let enabled = require(raw.enabled, "rscore.enabled")?;
    let window = require(raw.window, "rscore.window")?;
    let threshold = require(raw.threshold, "rscore.threshold")?;
    let scale = require(raw.scale, "rscore.scale")?;
    let scope = require(raw.scope, "rscore.scope")?;

    if window == 0 {
        return Err(invalid("rscore.window", "must be greater than 0"));
    }
    if !(0.0..=100.0).contains(&threshold) {
        return Err(invalid("rscore.threshold", format!("{} is not a percentage", threshold)));
    }
    if !(scale.is_finite() && scale > 0.0) {
        return Err(invalid("rscore.scale", format!("{} must be a positive factor", scale)));
    }
    let scope = HistoryScope::from_str(&scope).map_err(|e| invalid("rscore.scope", e))?;

    Ok(RScoreParams {
        enabled,
        window,
        threshold,
        scale,
        scope,
    })
}

fn validate_task(raw: RawTask) -> Result<TaskParams, ConfigError> {
    let resp_keys = require(raw.resp_keys, "task.resp_keys")?;
    if resp_keys.is_empty() {
        return Err(invalid("task.resp_keys", "at least one response key is required"));
    }
    let abort_key = raw.abort_key.unwrap_or_else(|| DEFAULT_ABORT_KEY.to_string());
    if resp_keys.contains(&abort_key) {
        return Err(invalid("task.resp_keys", format!("'{}' is the abort key", abort_key)));
    }

    Ok(TaskParams {
        n_blocks: require(raw.n_blocks, "task.n_blocks")?,
        trials_per_block: require(raw.trials_per_block, "task.trials_per_block")?,
        resp_keys,
        show_cumulative_points: require(raw.show_cumulative_points, "task.show_cumulative_points")?,
        practice_trials: require(raw.practice_trials, "task.practice_trials")?,
        abort_key,
    })
}

fn parse_condition(index: usize, value: &Value) -> Result<Condition, ConfigError> {
    let malformed = |reason: String| ConfigError::MalformedCondition { index, reason };

    let items = value
        .as_array()
        .ok_or_else(|| malformed("not a list".to_string()))?;
    if items.len() != 5 {
        return Err(malformed(format!("has {} elements", items.len())));
    }

    let label = items[0]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| malformed("label must be a non-empty string".to_string()))?;
    let valence = items[1]
        .as_f64()
        .ok_or_else(|| malformed("valence must be a number".to_string()))?;
    let magnitude = items[2]
        .as_f64()
        .ok_or_else(|| malformed("magnitude must be a number".to_string()))?;
    let points_on_hit = as_points(&items[3])
        .ok_or_else(|| malformed("points_hit must be an integer".to_string()))?;
    let points_on_miss = as_points(&items[4])
        .ok_or_else(|| malformed("points_miss must be an integer".to_string()))?;

    Ok(Condition {
        label: label.to_string(),
        valence: Valence::from_sign(valence),
        magnitude,
        points_on_hit,
        points_on_miss,
    })
}

/// Accepts `10` as well as `10.0`; rejects fractional payouts.
fn as_points(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn check_unique_labels(conditions: &[Condition]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for (index, c) in conditions.iter().enumerate() {
        if !seen.insert(c.label.as_str()) {
            return Err(ConfigError::MalformedCondition {
                index,
                reason: format!("duplicate label '{}'", c.label),
            });
        }
    }
    Ok(())
}
