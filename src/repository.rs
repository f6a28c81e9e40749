// src/repository.rs

use crate::models::{ConditionStats, SessionInfo, StoredSession, StoredTrial, TrialOutcome};
use log::debug;
use rusqlite::{params, Connection, OptionalExtension, Result};

/// Registers a new session and returns its row id.
pub fn insert_session(conn: &Connection, info: &SessionInfo, started_at: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO sessions (participant, session, started_at) VALUES (?, ?, ?)",
        params![info.participant, info.session, started_at],
    )?;
    let id = conn.last_insert_rowid();
    debug!("[DB] Session {} registered for '{}'", id, info.participant);
    Ok(id)
}

/// Records one completed trial. Autocommits, so the row is durable on return.
pub fn log_trial(conn: &Connection, session_id: i64, outcome: &TrialOutcome) -> Result<()> {
    conn.execute(
        "INSERT INTO trials (
            session_id, block, trial_index, condition, valence, magnitude,
            target_ms_pre, target_ms_final, rt_ms, key_pressed, hit,
            points_change, points_total, pause1_ms, pause2_ms, pause3_ms,
            cue_ms, feedback_ms, rscore_scope, rscore_value, completed_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            session_id,
            outcome.block,
            outcome.trial_index,
            outcome.condition,
            outcome.valence.as_sign(),
            outcome.magnitude,
            outcome.target_ms_pre,
            outcome.target_ms_final,
            outcome.reaction_time_ms,
            outcome.key,
            outcome.hit,
            outcome.points_delta,
            outcome.points_total,
            outcome.jitter.pre_cue_ms,
            outcome.jitter.anticipation_ms,
            outcome.jitter.post_feedback_ms,
            outcome.cue_ms,
            outcome.feedback_ms,
            outcome.rscore_scope.as_str(),
            outcome.rscore_percent,
            outcome.completed_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn finish_session(
    conn: &Connection,
    session_id: i64,
    finished_at: &str,
    trials_completed: i64,
    points_total: Option<i64>,
) -> Result<()> {
    conn.execute(
        "UPDATE sessions SET finished_at = ?, trials_completed = ?, points_total = ? WHERE id = ?",
        params![finished_at, trials_completed, points_total, session_id],
    )?;
    Ok(())
}

pub fn get_session(conn: &Connection, session_id: i64) -> Result<Option<StoredSession>> {
    conn.query_row(
        "SELECT id, participant, session, started_at, finished_at, trials_completed, points_total
         FROM sessions WHERE id = ?",
        [session_id],
        |row| {
            Ok(StoredSession {
                id: row.get(0)?,
                participant: row.get(1)?,
                session: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                trials_completed: row.get(5)?,
                points_total: row.get(6)?,
            })
        },
    )
    .optional()
}

pub fn list_sessions(conn: &Connection) -> Result<Vec<StoredSession>> {
    let mut stmt = conn.prepare(
        "SELECT id, participant, session, started_at, finished_at, trials_completed, points_total
         FROM sessions ORDER BY id ASC",
    )?;
    let sessions = stmt
        .query_map([], |row| {
            Ok(StoredSession {
                id: row.get(0)?,
                participant: row.get(1)?,
                session: row.get(2)?,
                started_at: row.get(3)?,
                finished_at: row.get(4)?,
                trials_completed: row.get(5)?,
                points_total: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(sessions)
}

pub fn get_trials_for_session(conn: &Connection, session_id: i64) -> Result<Vec<StoredTrial>> {
    let mut stmt = conn.prepare(
        "SELECT block, trial_index, condition, target_ms_final, rt_ms, hit, points_total
         FROM trials WHERE session_id = ? ORDER BY id ASC",
    )?;
    let trials = stmt
        .query_map([session_id], |row| {
            Ok(StoredTrial {
                block: row.get(0)?,
                trial_index: row.get(1)?,
                condition: row.get(2)?,
                target_ms_final: row.get(3)?,
                rt_ms: row.get(4)?,
                hit: row.get(5)?,
                points_total: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(trials)
}

/// Hit rate, mean RT of responded trials and the latest target per condition.
pub fn get_condition_stats(conn: &Connection, session_id: i64) -> Result<Vec<ConditionStats>> {
    let mut stmt = conn.prepare(
        "SELECT t.condition,
                count(*),
                sum(t.hit),
                avg(t.rt_ms),
                (SELECT t2.target_ms_final FROM trials t2
                 WHERE t2.session_id = t.session_id AND t2.condition = t.condition
                 ORDER BY t2.id DESC LIMIT 1)
         FROM trials t
         WHERE t.session_id = ?
         GROUP BY t.condition
         ORDER BY t.condition ASC",
    )?;
    let stats = stmt
        .query_map([session_id], |row| {
            let trials: i64 = row.get(1)?;
            let hits: i64 = row.get(2)?;
            Ok(ConditionStats {
                condition: row.get(0)?,
                trials,
                hits,
                hit_rate: if trials > 0 { hits as f64 / trials as f64 } else { 0.0 },
                mean_rt_ms: row.get(3)?,
                last_target_ms: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(stats)
}
