//! Workflow mining: periodically scan the event log for template chains that
//! keep recurring and promote them to `workflow_patterns`.
//!
//! A pass groups completed events by session, slides windows of
//! `min_steps..=max_steps` over each session's template sequence, aggregates
//! identical chains across sessions, and upserts every chain that reached
//! the occurrence threshold. Passes never overlap: a trigger that arrives
//! while one is running just marks the next pass pending.

use std::collections::HashMap;

use tokio::sync::Notify;

use crate::config::WorkflowConfig;
use crate::error::Result;
use crate::hash::stable_hex64_parts;
use crate::storage::Database;
use crate::storage::EventRow;
use crate::storage::PatternCandidate;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MineReport {
    pub scanned_events: usize,
    pub candidate_chains: usize,
    pub promoted: usize,
}

struct ChainAgg {
    template_chain: Vec<String>,
    display_chain: Vec<String>,
    occurrences: u64,
    last_seen_ms: i64,
    total_duration_ms: f64,
    duration_samples: u64,
    repo_keys: Vec<Option<String>>,
}

/// One full mining pass over the event log.
pub fn mine_once(db: &Database, config: &WorkflowConfig, now_ms: i64) -> Result<MineReport> {
    let rows = db.mining_rows()?;
    let scanned = rows.len();

    let mut sessions: HashMap<&str, Vec<&EventRow>> = HashMap::new();
    for row in &rows {
        sessions.entry(&row.session_id).or_default().push(row);
    }

    let mut chains: HashMap<String, ChainAgg> = HashMap::new();
    for events in sessions.values() {
        for width in config.min_steps..=config.max_steps {
            if events.len() < width {
                continue;
            }
            for window in events.windows(width) {
                let templates: Vec<String> =
                    window.iter().map(|e| e.template_id.clone()).collect();
                let key = templates.join("\u{1f}");
                let agg = chains.entry(key).or_insert_with(|| ChainAgg {
                    template_chain: templates,
                    display_chain: window.iter().map(|e| e.cmd_raw.clone()).collect(),
                    occurrences: 0,
                    last_seen_ms: 0,
                    total_duration_ms: 0.0,
                    duration_samples: 0,
                    repo_keys: window.iter().map(|e| e.repo_key.clone()).collect(),
                });
                agg.occurrences += 1;
                agg.last_seen_ms = agg
                    .last_seen_ms
                    .max(window.iter().map(|e| e.ts_ms).max().unwrap_or(0));
                for event in window {
                    if let Some(duration) = event.duration_ms {
                        agg.total_duration_ms += duration as f64;
                        agg.duration_samples += 1;
                    }
                }
            }
        }
    }

    let candidate_chains = chains.len();
    let mut promoted = 0usize;
    for agg in chains.into_values() {
        if agg.occurrences < config.min_occurrences {
            continue;
        }
        let pattern_id = {
            let chain_refs: Vec<&str> = agg.template_chain.iter().map(String::as_str).collect();
            stable_hex64_parts(&chain_refs)
        };
        let candidate = PatternCandidate {
            pattern_id,
            scope: shared_repo_scope(&agg.repo_keys),
            occurrence_count: agg.occurrences,
            last_seen_ms: if agg.last_seen_ms > 0 {
                agg.last_seen_ms
            } else {
                now_ms
            },
            avg_duration_ms: if agg.duration_samples > 0 {
                agg.total_duration_ms / agg.duration_samples as f64
            } else {
                0.0
            },
            template_chain: agg.template_chain,
            display_chain: agg.display_chain,
        };
        db.upsert_workflow_pattern(&candidate)?;
        promoted += 1;
    }

    Ok(MineReport {
        scanned_events: scanned,
        candidate_chains,
        promoted,
    })
}

/// `repo:<key>` when every step of every occurrence shares one repo,
/// otherwise global.
fn shared_repo_scope(repo_keys: &[Option<String>]) -> String {
    let mut shared: Option<&str> = None;
    for key in repo_keys {
        match (shared, key.as_deref()) {
            (_, None) | (_, Some("")) => return crate::storage::GLOBAL_SCOPE.to_string(),
            (None, Some(k)) => shared = Some(k),
            (Some(s), Some(k)) if s == k => {}
            _ => return crate::storage::GLOBAL_SCOPE.to_string(),
        }
    }
    match shared {
        Some(repo) => crate::storage::repo_scope(repo),
        None => crate::storage::GLOBAL_SCOPE.to_string(),
    }
}

/// Serializes mining passes and coalesces triggers that land mid-pass.
pub struct Miner {
    db: Database,
    config: WorkflowConfig,
    pass_lock: tokio::sync::Mutex<()>,
    pending: std::sync::atomic::AtomicBool,
    trigger: Notify,
}

impl Miner {
    pub fn new(db: Database, config: WorkflowConfig) -> Self {
        Self {
            db,
            config,
            pass_lock: tokio::sync::Mutex::new(()),
            pending: std::sync::atomic::AtomicBool::new(false),
            trigger: Notify::new(),
        }
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    /// Request a pass soon; coalesced if one is already queued.
    pub fn trigger(&self) {
        self.pending
            .store(true, std::sync::atomic::Ordering::Relaxed);
        self.trigger.notify_one();
    }

    pub fn trigger_notified(&self) -> &Notify {
        &self.trigger
    }

    pub fn take_pending(&self) -> bool {
        self.pending
            .swap(false, std::sync::atomic::Ordering::Relaxed)
    }

    /// Run one pass, unless another is already in flight (in which case the
    /// pending flag left by [`Miner::trigger`] gets it picked up next tick).
    pub fn run_pass(&self, now_ms: i64) -> Result<Option<MineReport>> {
        let Ok(_guard) = self.pass_lock.try_lock() else {
            return Ok(None);
        };
        let report = mine_once(&self.db, &self.config, now_ms)?;
        tracing::debug!(
            scanned = report.scanned_events,
            candidates = report.candidate_chains,
            promoted = report.promoted,
            "mining pass complete"
        );
        Ok(Some(report))
    }
}
