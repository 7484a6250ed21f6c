//! Promoted workflow patterns: recurring template chains mined from the
//! event log. Only chains that met the occurrence threshold are persisted;
//! the miner rewrites counts monotonically on every pass.

use rusqlite::params;

use super::Database;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowPatternRow {
    pub pattern_id: String,
    pub template_chain: Vec<String>,
    /// Representative raw commands, one per chain step.
    pub display_chain: Vec<String>,
    pub scope: String,
    pub step_count: usize,
    pub occurrence_count: u64,
    pub last_seen_ms: i64,
    pub avg_duration_ms: f64,
}

/// An aggregated chain produced by one mining pass.
#[derive(Debug, Clone)]
pub struct PatternCandidate {
    pub pattern_id: String,
    pub template_chain: Vec<String>,
    pub display_chain: Vec<String>,
    pub scope: String,
    pub occurrence_count: u64,
    pub last_seen_ms: i64,
    pub avg_duration_ms: f64,
}

impl Database {
    /// Upsert one promoted pattern. Counts and `last_seen_ms` only ever move
    /// up so repeated passes over the same log are stable.
    pub fn upsert_workflow_pattern(&self, candidate: &PatternCandidate) -> Result<()> {
        let chain_json = serde_json::to_string(&candidate.template_chain)?;
        let display_json = serde_json::to_string(&candidate.display_chain)?;
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO workflow_patterns
                    (pattern_id, template_chain, display_chain, scope, step_count,
                     occurrence_count, last_seen_ms, avg_duration_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (pattern_id) DO UPDATE SET
                    occurrence_count = MAX(occurrence_count, excluded.occurrence_count),
                    last_seen_ms = MAX(last_seen_ms, excluded.last_seen_ms),
                    avg_duration_ms = excluded.avg_duration_ms,
                    display_chain = excluded.display_chain,
                    scope = excluded.scope",
                params![
                    candidate.pattern_id,
                    chain_json,
                    display_json,
                    candidate.scope,
                    candidate.template_chain.len() as i64,
                    candidate.occurrence_count as i64,
                    candidate.last_seen_ms,
                    candidate.avg_duration_ms,
                ],
            )?;
            Ok(())
        })
    }

    /// All patterns at or above `min_occurrences`, most frequent first.
    pub fn workflow_patterns(&self, min_occurrences: u64) -> Result<Vec<WorkflowPatternRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pattern_id, template_chain, display_chain, scope, step_count,
                        occurrence_count, last_seen_ms, avg_duration_ms
                 FROM workflow_patterns
                 WHERE occurrence_count >= ?1
                 ORDER BY occurrence_count DESC, pattern_id ASC",
            )?;
            let rows = stmt
                .query_map(params![min_occurrences as i64], |row| {
                    let chain_json: String = row.get(1)?;
                    let display_json: String = row.get(2)?;
                    Ok((
                        WorkflowPatternRow {
                            pattern_id: row.get(0)?,
                            template_chain: Vec::new(),
                            display_chain: Vec::new(),
                            scope: row.get(3)?,
                            step_count: row.get::<_, i64>(4)? as usize,
                            occurrence_count: row.get::<_, i64>(5)? as u64,
                            last_seen_ms: row.get(6)?,
                            avg_duration_ms: row.get(7)?,
                        },
                        chain_json,
                        display_json,
                    ))
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let mut out = Vec::with_capacity(rows.len());
            for (mut row, chain_json, display_json) in rows {
                row.template_chain = serde_json::from_str(&chain_json)?;
                row.display_chain = serde_json::from_str(&display_json)?;
                out.push(row);
            }
            Ok(out)
        })
    }

    /// Remove patterns that fell below the threshold after a config change.
    pub fn prune_workflow_patterns(&self, min_occurrences: u64) -> Result<usize> {
        self.with_tx(|tx| {
            let removed = tx.execute(
                "DELETE FROM workflow_patterns WHERE occurrence_count < ?1",
                params![min_occurrences as i64],
            )?;
            Ok(removed)
        })
    }
}
