// src/error.rs

use thiserror::Error;

/// Result alias for task-level operations.
pub type Result<T> = std::result::Result<T, MidError>;

/// Fatal configuration problems. Every variant names the offending field so
/// the operator can fix the file before any trial runs.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("config is not valid JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("missing required section '{0}'")]
    MissingSection(String),

    #[error("missing required field '{0}'")]
    MissingField(String),

    #[error("invalid value for '{path}': {reason}")]
    InvalidField { path: String, reason: String },

    #[error("condition {index} is malformed: {reason} (expected [label, valence, magnitude, points_hit, points_miss])")]
    MalformedCondition { index: usize, reason: String },
}

#[derive(Error, Debug)]
pub enum MidError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown condition: {0}")]
    UnknownCondition(String),

    #[error("No stored session with id {0}")]
    SessionNotFound(i64),

    #[error("Frontend error: {0}")]
    Frontend(String),

    /// Operator cancellation. Raised at a suspension point and turned into an
    /// aborted summary by the session runner; never reported as a failure.
    #[error("session aborted by operator")]
    Aborted,
}

impl MidError {
    pub fn is_abort(&self) -> bool {
        matches!(self, MidError::Aborted)
    }
}
