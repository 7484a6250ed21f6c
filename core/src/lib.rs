//! Core of the `clai` suggestion service: command normalization, durable
//! event/slot/workflow storage, the layered suggestion cache, the ranker and
//! its candidate sources, discovery priors, and playbook handling.
//!
//! Everything time-dependent takes an explicit `now_ms` so decay and cooldown
//! math is deterministic under test; wall-clock sampling happens only at the
//! edges (daemon request handlers).

pub mod cache;
pub mod config;
pub mod discovery;
pub mod error;
pub mod git;
pub mod hash;
pub mod history_import;
pub mod ingest;
pub mod miner;
pub mod normalize;
pub mod paths;
pub mod playbook;
pub mod ranker;
pub mod sessions;
pub mod storage;
pub mod suggest;
pub mod text_to_command;

pub use error::ClaiErr;
pub use error::Result;

/// Milliseconds since the Unix epoch, the timestamp unit used throughout.
pub fn now_ms() -> i64 {
    use std::time::SystemTime;
    use std::time::UNIX_EPOCH;
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
