//! The append-only command event log.
//!
//! A row is created by `CommandStarted` with a NULL exit code and completed
//! in place by `CommandEnded`; once the exit code is recorded the row never
//! changes again. Both writes are idempotent on `(session_id, command_id)`.

use rusqlite::OptionalExtension;
use rusqlite::Row;
use rusqlite::Transaction;
use rusqlite::params;

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct NewCommandEvent {
    pub session_id: String,
    pub command_id: String,
    pub ts_ms: i64,
    pub cwd: String,
    pub repo_key: Option<String>,
    pub branch: Option<String>,
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub cmd_truncated: bool,
    pub template_id: String,
    pub ephemeral: bool,
}

#[derive(Debug, Clone)]
pub struct EventRow {
    pub event_id: i64,
    pub session_id: String,
    pub command_id: String,
    pub ts_ms: i64,
    pub cwd: String,
    pub repo_key: Option<String>,
    pub branch: Option<String>,
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub cmd_truncated: bool,
    pub template_id: String,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<i64>,
    pub ephemeral: bool,
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        event_id: row.get("event_id")?,
        session_id: row.get("session_id")?,
        command_id: row.get("command_id")?,
        ts_ms: row.get("ts_ms")?,
        cwd: row.get("cwd")?,
        repo_key: row.get("repo_key")?,
        branch: row.get("branch")?,
        cmd_raw: row.get("cmd_raw")?,
        cmd_norm: row.get("cmd_norm")?,
        cmd_truncated: row.get::<_, i64>("cmd_truncated")? != 0,
        template_id: row.get("template_id")?,
        exit_code: row.get("exit_code")?,
        duration_ms: row.get("duration_ms")?,
        ephemeral: row.get::<_, i64>("ephemeral")? != 0,
    })
}

const EVENT_COLUMNS: &str = "event_id, session_id, command_id, ts_ms, cwd, repo_key, branch,
     cmd_raw, cmd_norm, cmd_truncated, template_id, exit_code, duration_ms, ephemeral";

/// Fields of a just-completed event that feed derived-store learning.
#[derive(Debug, Clone)]
pub(crate) struct EndedEvent {
    pub cmd_raw: String,
    pub cmd_norm: String,
    pub template_id: String,
    pub repo_key: Option<String>,
    pub ephemeral: bool,
    pub truncated: bool,
}

pub(crate) fn insert_started_in_tx(tx: &Transaction<'_>, ev: &NewCommandEvent) -> Result<bool> {
    let inserted = tx.execute(
        "INSERT OR IGNORE INTO events
            (session_id, command_id, ts_ms, cwd, repo_key, branch,
             cmd_raw, cmd_norm, cmd_truncated, template_id, ephemeral)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            ev.session_id,
            ev.command_id,
            ev.ts_ms,
            ev.cwd,
            ev.repo_key,
            ev.branch,
            ev.cmd_raw,
            ev.cmd_norm,
            ev.cmd_truncated as i64,
            ev.template_id,
            ev.ephemeral as i64,
        ],
    )?;
    Ok(inserted > 0)
}

/// Complete a started event. Returns `None` when no open row matched, which
/// covers both out-of-order ends (no start seen) and duplicate ends.
pub(crate) fn mark_ended_in_tx(
    tx: &Transaction<'_>,
    session_id: &str,
    command_id: &str,
    exit_code: i32,
    duration_ms: i64,
) -> Result<Option<EndedEvent>> {
    let updated = tx.execute(
        "UPDATE events SET exit_code = ?3, duration_ms = ?4
         WHERE session_id = ?1 AND command_id = ?2 AND exit_code IS NULL",
        params![session_id, command_id, exit_code, duration_ms],
    )?;
    if updated == 0 {
        return Ok(None);
    }
    tx.query_row(
        "SELECT cmd_raw, cmd_norm, template_id, repo_key, ephemeral, cmd_truncated
         FROM events WHERE session_id = ?1 AND command_id = ?2",
        params![session_id, command_id],
        |row| {
            Ok(EndedEvent {
                cmd_raw: row.get(0)?,
                cmd_norm: row.get(1)?,
                template_id: row.get(2)?,
                repo_key: row.get(3)?,
                ephemeral: row.get::<_, i64>(4)? != 0,
                truncated: row.get::<_, i64>(5)? != 0,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub session_id: Option<String>,
    pub repo_key: Option<String>,
    /// Substring match against the raw command text.
    pub contains: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Aggregate usage of one template inside the frequency window.
#[derive(Debug, Clone)]
pub struct TemplateUsage {
    pub template_id: String,
    pub cmd_norm: String,
    pub count: u64,
    /// Most recent raw rendering, used as the suggestion text.
    pub last_raw: String,
    pub last_ts_ms: i64,
}

impl Database {
    pub fn count_events(&self) -> Result<u64> {
        self.with_conn(|conn| {
            Ok(conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get::<_, i64>(0))? as u64)
        })
    }

    /// Completed, learnable events of one session in timestamp order
    /// (insertion order breaking ties), newest `limit` rows.
    pub fn session_tail(&self, session_id: &str, limit: usize) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM (
                     SELECT * FROM events
                     WHERE session_id = ?1 AND exit_code IS NOT NULL AND ephemeral = 0
                     ORDER BY ts_ms DESC, event_id DESC LIMIT ?2
                 ) ORDER BY ts_ms ASC, event_id ASC"
            ))?;
            let rows = stmt
                .query_map(params![session_id, limit as i64], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Paginated history query, newest first.
    pub fn fetch_history(&self, filter: &EventFilter) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut sql = format!("SELECT {EVENT_COLUMNS} FROM events WHERE 1=1");
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
            if let Some(session) = &filter.session_id {
                sql.push_str(" AND session_id = ?");
                args.push(Box::new(session.clone()));
            }
            if let Some(repo) = &filter.repo_key {
                sql.push_str(" AND repo_key = ?");
                args.push(Box::new(repo.clone()));
            }
            if let Some(needle) = &filter.contains {
                sql.push_str(" AND cmd_raw LIKE '%' || ? || '%'");
                args.push(Box::new(needle.clone()));
            }
            sql.push_str(" ORDER BY ts_ms DESC, event_id DESC LIMIT ? OFFSET ?");
            args.push(Box::new(filter.limit as i64));
            args.push(Box::new(filter.offset as i64));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                args.iter().map(AsRef::as_ref).collect();
            let rows = stmt
                .query_map(&params[..], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Template frequency within `[since_ms, ..]`, optionally restricted to a
    /// repo, most used first. Relies on SQLite's bare-column-with-MAX rule to
    /// pick the raw text of the newest row per group.
    pub fn template_usage(
        &self,
        repo_key: Option<&str>,
        since_ms: i64,
        limit: usize,
    ) -> Result<Vec<TemplateUsage>> {
        self.with_conn(|conn| {
            let mut sql = String::from(
                "SELECT template_id, cmd_norm, COUNT(*) AS uses, cmd_raw, MAX(ts_ms) AS last_ts
                 FROM events
                 WHERE template_id != '' AND ephemeral = 0
                   AND exit_code IS NOT NULL AND ts_ms >= ?1",
            );
            let mut args: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(since_ms)];
            if let Some(repo) = repo_key {
                sql.push_str(" AND repo_key = ?2");
                args.push(Box::new(repo.to_string()));
            }
            sql.push_str(" GROUP BY template_id ORDER BY uses DESC, last_ts DESC LIMIT ?");
            args.push(Box::new(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> =
                args.iter().map(AsRef::as_ref).collect();
            let rows = stmt
                .query_map(&params[..], |row| {
                    Ok(TemplateUsage {
                        template_id: row.get(0)?,
                        cmd_norm: row.get(1)?,
                        count: row.get::<_, i64>(2)? as u64,
                        last_raw: row.get(3)?,
                        last_ts_ms: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Rows the workflow miner scans: completed, non-ephemeral events with a
    /// template, ordered per session by time then insertion.
    pub fn mining_rows(&self) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE template_id != '' AND ephemeral = 0 AND exit_code IS NOT NULL
                 ORDER BY session_id ASC, ts_ms ASC, event_id ASC"
            ))?;
            let rows = stmt
                .query_map([], event_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }
}
