// src/sink.rs

use crate::constants::{FILE_PREFIX, TIMESTAMP_FORMAT};
use crate::database::open_db;
use crate::error::Result;
use crate::models::{SessionInfo, TrialOutcome};
use crate::repository;
use chrono::{DateTime, Local};
use log::{debug, info, warn};
use rusqlite::Connection;
use serde::Serialize;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Durable destination for completed trials. `append` must persist the row
/// before returning; `close` must be idempotent.
pub trait TrialSink {
    fn append(&mut self, info: &SessionInfo, outcome: &TrialOutcome) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

/// `MID_<participant>_<session>_<timestamp>.csv`
pub fn log_file_name(info: &SessionInfo, started: &DateTime<Local>) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        FILE_PREFIX,
        info.participant,
        info.session,
        started.format(TIMESTAMP_FORMAT)
    )
}

// --- CSV ---

pub const CSV_HEADER: [&str; 22] = [
    "participant",
    "session",
    "timestamp",
    "block",
    "trial_index",
    "condition",
    "valence",
    "magnitude",
    "target_ms_pre",
    "target_ms_final",
    "rt_ms",
    "hit",
    "pause1_ms",
    "pause2_ms",
    "pause3_ms",
    "cue_ms",
    "feedback_ms",
    "points_change",
    "points_total",
    "key_pressed",
    "rscore_scope",
    "rscore_value",
];

#[derive(Serialize)]
struct CsvRow<'a> {
    participant: &'a str,
    session: &'a str,
    timestamp: String,
    block: u32,
    trial_index: u32,
    condition: &'a str,
    valence: i8,
    magnitude: String,
    target_ms_pre: u32,
    target_ms_final: u32,
    rt_ms: String,
    hit: u8,
    pause1_ms: u32,
    pause2_ms: u32,
    pause3_ms: u32,
    cue_ms: u32,
    feedback_ms: u32,
    points_change: i64,
    points_total: i64,
    key_pressed: &'a str,
    rscore_scope: &'a str,
    rscore_value: String,
}

impl<'a> CsvRow<'a> {
    fn new(info: &'a SessionInfo, o: &'a TrialOutcome) -> Self {
        CsvRow {
            participant: &info.participant,
            session: &info.session,
            timestamp: o.completed_at.format(TIMESTAMP_FORMAT).to_string(),
            block: o.block,
            trial_index: o.trial_index,
            condition: &o.condition,
            valence: o.valence.as_sign(),
            magnitude: format_number(o.magnitude),
            target_ms_pre: o.target_ms_pre,
            target_ms_final: o.target_ms_final,
            rt_ms: format_optional(o.reaction_time_ms),
            hit: u8::from(o.hit),
            pause1_ms: o.jitter.pre_cue_ms,
            pause2_ms: o.jitter.anticipation_ms,
            pause3_ms: o.jitter.post_feedback_ms,
            cue_ms: o.cue_ms,
            feedback_ms: o.feedback_ms,
            points_change: o.points_delta,
            points_total: o.points_total,
            key_pressed: o.key.as_deref().unwrap_or(""),
            rscore_scope: o.rscore_scope.as_str(),
            rscore_value: format_optional(o.rscore_percent),
        }
    }
}

/// Whole magnitudes print without a fractional part ("5", not "5.0").
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

fn format_optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.1}", v)).unwrap_or_default()
}

/// One CSV file per session. The header is written on creation, so even a
/// session aborted before its first trial leaves a readable file.
pub struct CsvSink {
    writer: Option<csv::Writer<File>>,
    path: PathBuf,
}

impl CsvSink {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        writer.write_record(CSV_HEADER)?;
        writer.flush()?;
        info!("[Sink] Logging trials to {:?}", path);
        Ok(CsvSink {
            writer: Some(writer),
            path: path.to_path_buf(),
        })
    }

    /// Creates `<dir>/MID_<participant>_<session>_<timestamp>.csv`.
    pub fn in_dir(dir: &Path, info: &SessionInfo, started: &DateTime<Local>) -> Result<Self> {
        Self::create(&dir.join(log_file_name(info, started)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TrialSink for CsvSink {
    fn append(&mut self, info: &SessionInfo, outcome: &TrialOutcome) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.serialize(CsvRow::new(info, outcome))?;
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!("[Sink] Closed {:?}", self.path);
        }
        Ok(())
    }
}

// --- SQLite ---

/// Mirrors the trial log into SQLite, one `sessions` row per run.
pub struct SqliteSink {
    conn: Connection,
    session_id: i64,
    trials: i64,
    last_total: Option<i64>,
    closed: bool,
}

impl SqliteSink {
    pub fn open(path: &Path, info: &SessionInfo) -> Result<Self> {
        let conn = open_db(path)?;
        Self::with_connection(conn, info)
    }

    /// Expects a connection whose schema is already initialised.
    pub fn with_connection(conn: Connection, info: &SessionInfo) -> Result<Self> {
        let session_id = repository::insert_session(&conn, info, &Local::now().to_rfc3339())?;
        info!("[DB] Recording session {}", session_id);
        Ok(SqliteSink {
            conn,
            session_id,
            trials: 0,
            last_total: None,
            closed: false,
        })
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl TrialSink for SqliteSink {
    fn append(&mut self, _info: &SessionInfo, outcome: &TrialOutcome) -> Result<()> {
        repository::log_trial(&self.conn, self.session_id, outcome)?;
        self.trials += 1;
        self.last_total = Some(outcome.points_total);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        repository::finish_session(
            &self.conn,
            self.session_id,
            &Local::now().to_rfc3339(),
            self.trials,
            self.last_total,
        )?;
        self.closed = true;
        debug!("[DB] Session {} closed after {} trials", self.session_id, self.trials);
        Ok(())
    }
}

/// A sink dropped on an early-exit path still stamps its session row.
impl Drop for SqliteSink {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("[DB] Failed to finish session {}: {}", self.session_id, e);
        }
    }
}

// --- Fan-out ---

/// Writes every trial to each inner sink in order.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn TrialSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, sink: Box<dyn TrialSink>) {
        self.sinks.push(sink);
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl TrialSink for FanoutSink {
    fn append(&mut self, info: &SessionInfo, outcome: &TrialOutcome) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.append(info, outcome)?;
        }
        Ok(())
    }

    /// Closes every sink even if one fails; the first error is returned.
    fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        for sink in self.sinks.iter_mut() {
            if let Err(e) = sink.close() {
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// In-memory sink for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub rows: Vec<TrialOutcome>,
    pub closed: bool,
}

impl TrialSink for MemorySink {
    fn append(&mut self, _info: &SessionInfo, outcome: &TrialOutcome) -> Result<()> {
        self.rows.push(outcome.clone());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
