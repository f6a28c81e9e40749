// src/database.rs

use log::debug;
use rusqlite::{Connection, Result};
use std::path::Path;

pub fn open_db(path: &Path) -> Result<Connection> {
    debug!("[DB] Opening {:?}", path);
    let conn = Connection::open(path)?;
    init_db(&conn)?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    debug!("[DB] init_db: Checking database schema...");

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY,
            participant TEXT NOT NULL,
            session TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            trials_completed INTEGER NOT NULL DEFAULT 0,
            points_total INTEGER
        );
        CREATE TABLE IF NOT EXISTS trials (
            id INTEGER PRIMARY KEY,
            session_id INTEGER NOT NULL REFERENCES sessions(id),
            block INTEGER NOT NULL,
            trial_index INTEGER NOT NULL,
            condition TEXT NOT NULL,
            valence INTEGER NOT NULL,
            magnitude REAL NOT NULL,
            target_ms_pre INTEGER NOT NULL,
            target_ms_final INTEGER NOT NULL,
            rt_ms REAL,
            key_pressed TEXT,
            hit INTEGER NOT NULL CHECK (hit IN (0, 1)),
            points_change INTEGER NOT NULL,
            points_total INTEGER NOT NULL,
            pause1_ms INTEGER NOT NULL,
            pause2_ms INTEGER NOT NULL,
            pause3_ms INTEGER NOT NULL,
            cue_ms INTEGER NOT NULL,
            feedback_ms INTEGER NOT NULL,
            rscore_scope TEXT NOT NULL CHECK (rscore_scope IN ('global','per_condition')),
            rscore_value REAL,
            completed_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_trials_session ON trials (session_id);
        ",
    )?;

    Ok(())
}
