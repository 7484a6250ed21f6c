//! Schema migrations. Two families are known: V1 is the raw event log, V2
//! adds the derived stores (slot values, workflow patterns, feedback
//! counters) and their indexes. Each migration applies in its own
//! transaction and is recorded in `schema_migrations`; a database whose
//! recorded version exceeds [`KNOWN_MAX_VERSION`] refuses to open.

use rusqlite::Connection;

use crate::error::ClaiErr;
use crate::error::Result;

pub const KNOWN_MAX_VERSION: i64 = 2;

const V1_EVENTS: &str = "
CREATE TABLE IF NOT EXISTS events (
    event_id      INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id    TEXT NOT NULL,
    command_id    TEXT NOT NULL,
    ts_ms         INTEGER NOT NULL,
    cwd           TEXT NOT NULL,
    repo_key      TEXT,
    branch        TEXT,
    cmd_raw       TEXT NOT NULL,
    cmd_norm      TEXT NOT NULL DEFAULT '',
    cmd_truncated INTEGER NOT NULL DEFAULT 0,
    template_id   TEXT NOT NULL DEFAULT '',
    exit_code     INTEGER,
    duration_ms   INTEGER,
    ephemeral     INTEGER NOT NULL DEFAULT 0,
    UNIQUE (session_id, command_id)
);
CREATE INDEX IF NOT EXISTS idx_events_session_ts ON events (session_id, ts_ms);
CREATE INDEX IF NOT EXISTS idx_events_ts ON events (ts_ms);
";

const V2_DERIVED: &str = "
CREATE TABLE IF NOT EXISTS slot_values (
    scope      TEXT NOT NULL,
    cmd_norm   TEXT NOT NULL,
    slot_idx   INTEGER NOT NULL,
    value      TEXT NOT NULL,
    count      REAL NOT NULL,
    last_ts_ms INTEGER NOT NULL,
    PRIMARY KEY (scope, cmd_norm, slot_idx, value)
);
CREATE INDEX IF NOT EXISTS idx_slot_values_group
    ON slot_values (scope, cmd_norm, slot_idx, count DESC);

CREATE TABLE IF NOT EXISTS workflow_patterns (
    pattern_id       TEXT PRIMARY KEY,
    template_chain   TEXT NOT NULL,
    display_chain    TEXT NOT NULL,
    scope            TEXT NOT NULL DEFAULT 'global',
    step_count       INTEGER NOT NULL,
    occurrence_count INTEGER NOT NULL,
    last_seen_ms     INTEGER NOT NULL,
    avg_duration_ms  REAL NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_workflow_scope ON workflow_patterns (scope, occurrence_count DESC);

CREATE TABLE IF NOT EXISTS feedback_stats (
    action TEXT PRIMARY KEY,
    count  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_events_template ON events (template_id) WHERE template_id != '';
";

pub(super) fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_ms INTEGER NOT NULL
        );",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;
    if current > KNOWN_MAX_VERSION {
        return Err(ClaiErr::SchemaTooNew {
            found: current,
            supported: KNOWN_MAX_VERSION,
        });
    }

    for version in (current + 1)..=KNOWN_MAX_VERSION {
        apply(conn, version)?;
    }
    Ok(())
}

fn apply(conn: &Connection, version: i64) -> Result<()> {
    let sql = match version {
        1 => V1_EVENTS,
        2 => V2_DERIVED,
        other => {
            return Err(ClaiErr::Config(format!(
                "no migration registered for schema version {other}"
            )));
        }
    };
    conn.execute_batch("BEGIN")?;
    let applied: Result<()> = (|| {
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_ms) VALUES (?1, ?2)",
            rusqlite::params![version, crate::now_ms()],
        )?;
        Ok(())
    })();
    match applied {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            tracing::info!(version, "applied schema migration");
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_reaches_known_max() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");
        let version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_migrations", [], |r| {
                r.get(0)
            })
            .expect("version");
        assert_eq!(version, KNOWN_MAX_VERSION);
        // Re-running is a no-op.
        run(&conn).expect("idempotent");
    }

    #[test]
    fn newer_schema_is_refused() {
        let conn = Connection::open_in_memory().expect("open");
        run(&conn).expect("migrate");
        conn.execute(
            "INSERT INTO schema_migrations (version, applied_ms) VALUES (?1, 0)",
            [KNOWN_MAX_VERSION + 1],
        )
        .expect("insert");
        let err = run(&conn).expect_err("must refuse");
        assert!(matches!(err, ClaiErr::SchemaTooNew { .. }));
    }
}
