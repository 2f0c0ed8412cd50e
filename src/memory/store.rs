// src/memory/store.rs — SQLite operations for sessions, iterations and errors
//
// Every write is an INSERT except the single feedback attachment per iteration,
// goal/parent/plan edits on sessions that have no iterations yet, and the
// writer leases in `session_leases`.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use uuid::Uuid;

use crate::core::types::{
    ErrorKind, ErrorRecord, Feedback, Iteration, IterationRecord, Session, SessionHistory,
};
use crate::infra::errors::{CadLoopError, Result};

/// Low-level SQLite operations for all record sets.
pub struct Store {
    conn: Connection,
}

fn timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn lease_span(ttl: std::time::Duration) -> Result<Duration> {
    Duration::from_std(ttl).map_err(|e| CadLoopError::Config(format!("lease ttl: {e}")))
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    let created: String = row.get(4)?;
    Ok(Session {
        id: row.get(0)?,
        design_goal: row.get(1)?,
        parent_session_id: row.get(2)?,
        coding_plan: row.get(3)?,
        created_at: parse_timestamp(4, &created)?,
    })
}

fn iteration_from_row(row: &Row<'_>) -> rusqlite::Result<Iteration> {
    let feedback: Option<String> = row.get(4)?;
    let feedback = feedback
        .map(|raw| serde_json::from_str::<Feedback>(&raw))
        .transpose()
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(4, rusqlite::types::Type::Text, Box::new(e))
        })?;
    let created: String = row.get(5)?;
    Ok(Iteration {
        id: row.get(0)?,
        session_id: row.get(1)?,
        seq: row.get(2)?,
        code: row.get(3)?,
        feedback,
        created_at: parse_timestamp(5, &created)?,
    })
}

fn error_from_row(row: &Row<'_>) -> rusqlite::Result<ErrorRecord> {
    let kind: String = row.get(2)?;
    let error_type = ErrorKind::parse(&kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown error_type '{kind}'").into(),
        )
    })?;
    let created: String = row.get(6)?;
    Ok(ErrorRecord {
        id: row.get(0)?,
        iteration_id: row.get(1)?,
        error_type,
        error_message: row.get(3)?,
        error_line: row.get(4)?,
        trace: row.get(5)?,
        created_at: parse_timestamp(6, &created)?,
    })
}

const SESSION_COLUMNS: &str = "id, design_goal, parent_session_id, coding_plan, created_at";
const ITERATION_COLUMNS: &str = "id, session_id, seq, code, feedback, created_at";
const ERROR_COLUMNS: &str =
    "id, iteration_id, error_type, error_message, error_line, trace, created_at";

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Access the underlying connection (for raw queries in tests and tooling).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    // -- Sessions --

    pub fn create_session(&self, design_goal: &str, parent_id: Option<&str>) -> Result<String> {
        if let Some(parent) = parent_id {
            self.get_session(parent)?;
        }
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO sessions (id, design_goal, parent_session_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, design_goal, parent_id, timestamp(Utc::now())],
        )?;
        tracing::info!(session_id = %id, parent = ?parent_id, "Session created");
        Ok(id)
    }

    pub fn get_session(&self, id: &str) -> Result<Session> {
        self.conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            )
            .optional()?
            .ok_or_else(|| CadLoopError::not_found("session", id))
    }

    /// Correct the goal of a session that has no iterations yet.
    pub fn update_goal(&self, id: &str, design_goal: &str) -> Result<()> {
        self.ensure_editable(id)?;
        self.conn.execute(
            "UPDATE sessions SET design_goal = ?1 WHERE id = ?2",
            params![design_goal, id],
        )?;
        Ok(())
    }

    /// Re-parent a session that has no iterations yet. Rejects any parent that
    /// is the session itself or one of its descendants.
    pub fn set_parent(&self, id: &str, parent_id: Option<&str>) -> Result<()> {
        self.get_session(id)?;
        if let Some(parent) = parent_id {
            self.get_session(parent)?;
            if self.reaches_ancestor(parent, id)? {
                return Err(CadLoopError::CycleDetected {
                    session_id: id.to_string(),
                    parent_id: parent.to_string(),
                });
            }
        }
        self.ensure_editable(id)?;
        self.conn.execute(
            "UPDATE sessions SET parent_session_id = ?1 WHERE id = ?2",
            params![parent_id, id],
        )?;
        Ok(())
    }

    /// Store the coding plan of a session that has no iterations yet.
    pub fn set_coding_plan(&self, id: &str, plan: &str) -> Result<()> {
        self.ensure_editable(id)?;
        self.conn.execute(
            "UPDATE sessions SET coding_plan = ?1 WHERE id = ?2",
            params![plan, id],
        )?;
        Ok(())
    }

    fn ensure_editable(&self, id: &str) -> Result<()> {
        self.get_session(id)?;
        if self.count_iterations(id)? > 0 {
            return Err(CadLoopError::SessionLocked {
                session_id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Walks up the parent chain from `start` (inclusive) looking for `target`.
    fn reaches_ancestor(&self, start: &str, target: &str) -> Result<bool> {
        let hits: i64 = self.conn.query_row(
            "WITH RECURSIVE chain(id, parent) AS (
                 SELECT id, parent_session_id FROM sessions WHERE id = ?1
                 UNION
                 SELECT s.id, s.parent_session_id FROM sessions s
                 JOIN chain c ON s.id = c.parent
             )
             SELECT COUNT(*) FROM chain WHERE id = ?2",
            params![start, target],
            |r| r.get(0),
        )?;
        Ok(hits > 0)
    }

    /// Ancestors of a session, nearest first.
    pub fn lineage(&self, id: &str) -> Result<Vec<Session>> {
        self.get_session(id)?;
        let mut stmt = self.conn.prepare(
            "WITH RECURSIVE chain(id, parent, depth) AS (
                 SELECT id, parent_session_id, 0 FROM sessions WHERE id = ?1
                 UNION
                 SELECT s.id, s.parent_session_id, c.depth + 1 FROM sessions s
                 JOIN chain c ON s.id = c.parent
             )
             SELECT s.id, s.design_goal, s.parent_session_id, s.coding_plan, s.created_at
             FROM chain c JOIN sessions s ON s.id = c.id
             WHERE c.depth > 0
             ORDER BY c.depth",
        )?;
        let rows = stmt.query_map(params![id], session_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Direct children of a session, oldest first.
    pub fn children(&self, id: &str) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE parent_session_id = ?1
             ORDER BY created_at, id"
        ))?;
        let rows = stmt.query_map(params![id], session_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Most recent sessions first.
    pub fn list_sessions(&self, limit: u32) -> Result<Vec<Session>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions ORDER BY created_at DESC, id LIMIT ?1"
        ))?;
        let rows = stmt.query_map(params![limit], session_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -- Iterations --

    /// Append the next attempt. Sequence number and creation time are both
    /// strictly increasing within the session.
    pub fn append_iteration(&self, session_id: &str, code: &str) -> Result<String> {
        self.get_session(session_id)?;

        let tx = self.conn.unchecked_transaction()?;
        let (max_seq, last_created): (u32, Option<String>) = tx.query_row(
            "SELECT COALESCE(MAX(seq), 0), MAX(created_at) FROM iterations WHERE session_id = ?1",
            params![session_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let mut created = Utc::now();
        if let Some(last) = last_created {
            let last = parse_timestamp(1, &last)?;
            if created <= last {
                created = last + Duration::microseconds(1);
            }
        }

        let id = Uuid::new_v4().to_string();
        let seq = max_seq + 1;
        tx.execute(
            "INSERT INTO iterations (id, session_id, seq, code, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, session_id, seq, code, timestamp(created)],
        )?;
        tx.commit()?;

        tracing::debug!(session_id, iteration_id = %id, seq, "Iteration appended");
        Ok(id)
    }

    pub fn get_iteration(&self, id: &str) -> Result<Iteration> {
        self.conn
            .query_row(
                &format!("SELECT {ITERATION_COLUMNS} FROM iterations WHERE id = ?1"),
                params![id],
                iteration_from_row,
            )
            .optional()?
            .ok_or_else(|| CadLoopError::not_found("iteration", id))
    }

    /// Attach evaluator feedback. Fails with `FeedbackConflict` (leaving the
    /// stored feedback untouched) if feedback was already attached.
    pub fn attach_feedback(&self, iteration_id: &str, feedback: &Feedback) -> Result<()> {
        let json = serde_json::to_string(feedback).map_err(anyhow::Error::from)?;
        let updated = self.conn.execute(
            "UPDATE iterations SET feedback = ?1 WHERE id = ?2 AND feedback IS NULL",
            params![json, iteration_id],
        )?;
        if updated == 0 {
            self.get_iteration(iteration_id)?;
            return Err(CadLoopError::FeedbackConflict {
                iteration_id: iteration_id.to_string(),
            });
        }
        Ok(())
    }

    /// Iterations of a session, oldest first.
    pub fn list_iterations(&self, session_id: &str) -> Result<Vec<Iteration>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ITERATION_COLUMNS} FROM iterations WHERE session_id = ?1 ORDER BY seq"
        ))?;
        let rows = stmt.query_map(params![session_id], iteration_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn latest_iteration(&self, session_id: &str) -> Result<Option<Iteration>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {ITERATION_COLUMNS} FROM iterations WHERE session_id = ?1
                     ORDER BY seq DESC LIMIT 1"
                ),
                params![session_id],
                iteration_from_row,
            )
            .optional()?)
    }

    pub fn count_iterations(&self, session_id: &str) -> Result<u32> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM iterations WHERE session_id = ?1",
            params![session_id],
            |r| r.get(0),
        )?)
    }

    // -- Errors --

    pub fn record_error(
        &self,
        iteration_id: &str,
        error_type: ErrorKind,
        message: &str,
        line: Option<u32>,
        trace: Option<&str>,
    ) -> Result<String> {
        self.get_iteration(iteration_id)?;
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO errors
                 (id, iteration_id, error_type, error_message, error_line, trace, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                iteration_id,
                error_type.as_str(),
                message,
                line,
                trace,
                timestamp(Utc::now())
            ],
        )?;
        tracing::debug!(iteration_id, error_id = %id, kind = %error_type, "Error recorded");
        Ok(id)
    }

    pub fn list_errors(&self, iteration_id: &str) -> Result<Vec<ErrorRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ERROR_COLUMNS} FROM errors WHERE iteration_id = ?1
             ORDER BY created_at, rowid"
        ))?;
        let rows = stmt.query_map(params![iteration_id], error_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    // -- Writer leases --

    /// Claim the right to drive a session for `ttl`. Fails with `SessionBusy`
    /// while another holder's lease is unexpired; an expired one is taken over.
    pub fn acquire_lease(
        &self,
        session_id: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<()> {
        self.get_session(session_id)?;
        let now = Utc::now();
        let expires = now + lease_span(ttl)?;

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT holder, expires_at FROM session_leases WHERE session_id = ?1",
                params![session_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?;
        if let Some((other, other_expires)) = current {
            if other != holder {
                if parse_timestamp(1, &other_expires)? > now {
                    return Err(CadLoopError::SessionBusy {
                        session_id: session_id.to_string(),
                    });
                }
                tracing::warn!(session_id, stale_holder = %other, "Taking over expired lease");
            }
        }
        tx.execute(
            "INSERT INTO session_leases (session_id, holder, heartbeat_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                 holder = excluded.holder,
                 heartbeat_at = excluded.heartbeat_at,
                 expires_at = excluded.expires_at",
            params![session_id, holder, timestamp(now), timestamp(expires)],
        )?;
        tx.commit()?;
        tracing::debug!(session_id, holder, "Lease acquired");
        Ok(())
    }

    /// Extend a held lease. `SessionBusy` means it was lost to another writer.
    pub fn renew_lease(
        &self,
        session_id: &str,
        holder: &str,
        ttl: std::time::Duration,
    ) -> Result<()> {
        let now = Utc::now();
        let updated = self.conn.execute(
            "UPDATE session_leases SET heartbeat_at = ?1, expires_at = ?2
             WHERE session_id = ?3 AND holder = ?4",
            params![
                timestamp(now),
                timestamp(now + lease_span(ttl)?),
                session_id,
                holder
            ],
        )?;
        if updated == 0 {
            return Err(CadLoopError::SessionBusy {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    /// Drop a lease if `holder` still owns it.
    pub fn release_lease(&self, session_id: &str, holder: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM session_leases WHERE session_id = ?1 AND holder = ?2",
            params![session_id, holder],
        )?;
        Ok(())
    }

    /// Remove whatever lease a session has, e.g. one left by a killed process.
    pub fn clear_lease(&self, session_id: &str) -> Result<bool> {
        let removed = self.conn.execute(
            "DELETE FROM session_leases WHERE session_id = ?1",
            params![session_id],
        )?;
        Ok(removed > 0)
    }

    pub fn lease_holder(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT holder FROM session_leases WHERE session_id = ?1",
                params![session_id],
                |r| r.get(0),
            )
            .optional()?)
    }

    // -- Replay --

    /// Session plus every iteration (oldest first) and its errors.
    pub fn history(&self, session_id: &str) -> Result<SessionHistory> {
        let session = self.get_session(session_id)?;
        let iterations = self
            .list_iterations(session_id)?
            .into_iter()
            .map(|iteration| {
                let errors = self.list_errors(&iteration.id)?;
                Ok(IterationRecord { iteration, errors })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(SessionHistory {
            session,
            iterations,
        })
    }
}
