// src/constants.rs

// --- Timing ---
pub const POLL_INTERVAL_MS: u64 = 1; // Response/abort polling granularity
pub const TITLE_MIN_DISPLAY_MS: u64 = 800; // Title must be visible before a key counts
pub const GOODBYE_DISPLAY_MS: u64 = 2000;

// --- Staircase (1-up/2-down) ---
pub const HITS_TO_STEP_DOWN: u32 = 2;

// --- R-Score ---
pub const RSCORE_SCALE_EPSILON: f64 = 1e-9; // Absorbs float error before flooring

// --- Keys ---
pub const DEFAULT_ABORT_KEY: &str = "escape";

// --- Assets ---
pub const NEUTRAL_MAGNITUDE_KEY: &str = "0";
pub const PLACEHOLDER_TEXT: &str = "?";
pub const PLACEHOLDER_TARGET_TEXT: &str = "◉";
pub const FIXATION_TEXT: &str = "+";

// --- Output ---
pub const DEFAULT_OUT_DIR: &str = "data";
pub const FILE_PREFIX: &str = "MID";
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
