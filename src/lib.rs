// src/lib.rs

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod executor;
pub mod frontend;
pub mod models;
pub mod repository;
pub mod rscore;
pub mod scheduler;
pub mod session;
pub mod simulate;
pub mod sink;
pub mod staircase;
pub mod stimuli;
pub mod terminal;
pub mod timing;

pub use config::{load_config, parse_config, ExperimentConfig};
pub use error::{ConfigError, MidError, Result};
pub use frontend::{AbortSignal, Frontend, KeyPress, Stimulus};
pub use models::{Condition, SessionInfo, SessionSummary, TrialOutcome};
pub use session::{Session, SessionState};
pub use sink::{CsvSink, FanoutSink, SqliteSink, TrialSink};
