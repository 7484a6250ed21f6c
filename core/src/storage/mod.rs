//! Durable state behind a single SQLite connection.
//!
//! The connection is owned by [`Database`] and guarded by one mutex: all
//! writes serialize through it (preserving the per-`(scope, template)` slot
//! invariants), and reads take the same short lock over WAL snapshots.
//! Components receive a cloned handle, never the raw connection.

pub(crate) mod event_log;
mod feedback;
mod migrations;
pub(crate) mod slot_store;
mod workflow_store;

pub use event_log::EventFilter;
pub use event_log::EventRow;
pub use event_log::NewCommandEvent;
pub use event_log::TemplateUsage;
pub use migrations::KNOWN_MAX_VERSION;
pub use slot_store::GLOBAL_SCOPE;
pub use slot_store::SlotValueRow;
pub use slot_store::repo_scope;
pub use workflow_store::PatternCandidate;
pub use workflow_store::WorkflowPatternRow;

use std::path::Path;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;

use crate::config::SlotConfig;
use crate::error::Result;

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    slot: SlotConfig,
}

impl Database {
    /// Open (or create) the database at `path` and bring the schema up to
    /// date. Fails with [`crate::ClaiErr::SchemaTooNew`] when the on-disk
    /// version outruns this build.
    pub fn open(path: &Path, slot: SlotConfig) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn, slot)
    }

    /// In-memory database for tests.
    pub fn open_in_memory(slot: SlotConfig) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, slot)
    }

    fn init(conn: Connection, slot: SlotConfig) -> Result<Self> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        migrations::run(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            slot,
        })
    }

    pub fn slot_config(&self) -> &SlotConfig {
        &self.slot
    }

    /// Run `f` with the connection. Lock poisoning is unrecoverable state
    /// corruption; we propagate the inner value rather than panic.
    pub(crate) fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&guard)
    }

    /// Run `f` inside a write transaction; commits on `Ok`, rolls back on
    /// `Err` on every exit path.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&rusqlite::Transaction<'_>) -> Result<T>,
    ) -> Result<T> {
        let mut guard = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = guard.transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
