//! Time-decayed slot value counts.
//!
//! Each row is keyed by `(scope, cmd_norm, slot_idx, value)` and carries a
//! real-valued count that decays with half-life `tau`:
//!
//! ```text
//! new_count = old_count * exp(-(now - last_ts_ms) / tau_ms) + 1
//! ```
//!
//! Updates fold the decay into the stored count; reads decay on the fly and
//! never write back. After every update the group is pruned to the
//! configured TopK rows.

use rusqlite::OptionalExtension;
use rusqlite::Transaction;
use rusqlite::params;

use super::Database;
use crate::config::SlotConfig;
use crate::error::Result;

pub const GLOBAL_SCOPE: &str = "global";

/// Decayed counts below this are invisible to ranking reads.
const EPSILON: f64 = 1e-6;

pub fn repo_scope(repo_key: &str) -> String {
    format!("repo:{repo_key}")
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotValueRow {
    pub value: String,
    pub count: f64,
    pub last_ts_ms: i64,
}

fn decayed(count: f64, last_ts_ms: i64, now_ms: i64, tau_ms: i64) -> f64 {
    if now_ms <= last_ts_ms {
        return count;
    }
    count * (-((now_ms - last_ts_ms) as f64) / tau_ms as f64).exp()
}

/// Read-modify-write of one slot value row plus TopK pruning of its group,
/// inside the caller's transaction (the ingester runs this in the same
/// transaction as the event row write).
pub(crate) fn update_in_tx(
    tx: &Transaction<'_>,
    slot: &SlotConfig,
    scope: &str,
    cmd_norm: &str,
    slot_idx: usize,
    value: &str,
    now_ms: i64,
) -> Result<()> {
    let existing: Option<(f64, i64)> = tx
        .query_row(
            "SELECT count, last_ts_ms FROM slot_values
             WHERE scope = ?1 AND cmd_norm = ?2 AND slot_idx = ?3 AND value = ?4",
            params![scope, cmd_norm, slot_idx as i64, value],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;

    let (new_count, new_ts) = match existing {
        Some((count, last_ts)) => (
            decayed(count, last_ts, now_ms, slot.tau_ms) + 1.0,
            now_ms.max(last_ts),
        ),
        None => (1.0, now_ms),
    };

    tx.execute(
        "INSERT INTO slot_values (scope, cmd_norm, slot_idx, value, count, last_ts_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT (scope, cmd_norm, slot_idx, value)
         DO UPDATE SET count = excluded.count, last_ts_ms = excluded.last_ts_ms",
        params![scope, cmd_norm, slot_idx as i64, value, new_count, new_ts],
    )?;

    prune_group(tx, slot, scope, cmd_norm, slot_idx, now_ms)
}

/// Delete the lowest-count rows (by decayed count at `now_ms`) until at most
/// TopK remain in the group.
fn prune_group(
    tx: &Transaction<'_>,
    slot: &SlotConfig,
    scope: &str,
    cmd_norm: &str,
    slot_idx: usize,
    now_ms: i64,
) -> Result<()> {
    let mut stmt = tx.prepare(
        "SELECT value, count, last_ts_ms FROM slot_values
         WHERE scope = ?1 AND cmd_norm = ?2 AND slot_idx = ?3",
    )?;
    let mut rows: Vec<SlotValueRow> = stmt
        .query_map(params![scope, cmd_norm, slot_idx as i64], |row| {
            Ok(SlotValueRow {
                value: row.get(0)?,
                count: row.get(1)?,
                last_ts_ms: row.get(2)?,
            })
        })?
        .collect::<std::result::Result<_, _>>()?;
    drop(stmt);

    if rows.len() <= slot.top_k {
        return Ok(());
    }
    rows.sort_by(|a, b| {
        let da = decayed(a.count, a.last_ts_ms, now_ms, slot.tau_ms);
        let db = decayed(b.count, b.last_ts_ms, now_ms, slot.tau_ms);
        db.partial_cmp(&da)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.value.cmp(&b.value))
    });
    for row in &rows[slot.top_k..] {
        tx.execute(
            "DELETE FROM slot_values
             WHERE scope = ?1 AND cmd_norm = ?2 AND slot_idx = ?3 AND value = ?4",
            params![scope, cmd_norm, slot_idx as i64, row.value],
        )?;
    }
    Ok(())
}

impl Database {
    pub fn slot_update(
        &self,
        scope: &str,
        cmd_norm: &str,
        slot_idx: usize,
        value: &str,
        now_ms: i64,
    ) -> Result<()> {
        let slot = self.slot_config().clone();
        self.with_tx(|tx| update_in_tx(tx, &slot, scope, cmd_norm, slot_idx, value, now_ms))
    }

    /// Update the global scope and, when `repo_key` is non-empty, the repo
    /// scope as well.
    pub fn slot_update_both(
        &self,
        cmd_norm: &str,
        slot_idx: usize,
        value: &str,
        repo_key: Option<&str>,
        now_ms: i64,
    ) -> Result<()> {
        let slot = self.slot_config().clone();
        self.with_tx(|tx| {
            update_in_tx(tx, &slot, GLOBAL_SCOPE, cmd_norm, slot_idx, value, now_ms)?;
            if let Some(repo) = repo_key.filter(|r| !r.is_empty()) {
                update_in_tx(
                    tx,
                    &slot,
                    &repo_scope(repo),
                    cmd_norm,
                    slot_idx,
                    value,
                    now_ms,
                )?;
            }
            Ok(())
        })
    }

    /// Values of a group ordered by decayed count (desc, value asc to break
    /// ties deterministically). Counts are decayed to `now_ms`, not
    /// persisted.
    pub fn slot_top_values_at(
        &self,
        scope: &str,
        cmd_norm: &str,
        slot_idx: usize,
        limit: usize,
        now_ms: i64,
    ) -> Result<Vec<SlotValueRow>> {
        let slot = self.slot_config().clone();
        let limit = limit.min(slot.top_k);
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT value, count, last_ts_ms FROM slot_values
                 WHERE scope = ?1 AND cmd_norm = ?2 AND slot_idx = ?3",
            )?;
            let mut rows: Vec<SlotValueRow> = stmt
                .query_map(params![scope, cmd_norm, slot_idx as i64], |row| {
                    Ok(SlotValueRow {
                        value: row.get(0)?,
                        count: row.get(1)?,
                        last_ts_ms: row.get(2)?,
                    })
                })?
                .collect::<std::result::Result<_, _>>()?;
            for row in &mut rows {
                row.count = decayed(row.count, row.last_ts_ms, now_ms, slot.tau_ms);
            }
            rows.retain(|r| r.count > EPSILON);
            rows.sort_by(|a, b| {
                b.count
                    .partial_cmp(&a.count)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.value.cmp(&b.value))
            });
            rows.truncate(limit);
            Ok(rows)
        })
    }

    /// Distinct templates in a scope whose normalized text starts with
    /// `prefix`, for slot-completion lookups.
    pub fn slot_templates_with_prefix(
        &self,
        scope: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let escaped = prefix
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT cmd_norm FROM slot_values
                 WHERE scope = ?1 AND cmd_norm LIKE ?2 ESCAPE '\\'
                 ORDER BY cmd_norm ASC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![scope, format!("{escaped}%"), limit as i64], |row| {
                    row.get(0)
                })?
                .collect::<std::result::Result<Vec<String>, _>>()?;
            Ok(rows)
        })
    }

    /// Best value for a slot, preferring the repo scope. Returns `None`
    /// unless the confidence rule holds: a single positive candidate, or the
    /// leader at least twice the runner-up. A repo scope without a confident
    /// winner falls back to the global scope, judged on its own.
    pub fn slot_best_value_at(
        &self,
        cmd_norm: &str,
        slot_idx: usize,
        repo_key: Option<&str>,
        now_ms: i64,
    ) -> Result<Option<SlotValueRow>> {
        if let Some(repo) = repo_key.filter(|r| !r.is_empty()) {
            let rows =
                self.slot_top_values_at(&repo_scope(repo), cmd_norm, slot_idx, 2, now_ms)?;
            if let Some(top) = confident_top(&rows) {
                return Ok(Some(top.clone()));
            }
        }
        let rows = self.slot_top_values_at(GLOBAL_SCOPE, cmd_norm, slot_idx, 2, now_ms)?;
        Ok(confident_top(&rows).cloned())
    }
}

fn confident_top(rows: &[SlotValueRow]) -> Option<&SlotValueRow> {
    match rows {
        [] => None,
        [only] => (only.count > EPSILON).then_some(only),
        [first, second, ..] => {
            (first.count > EPSILON && first.count >= 2.0 * second.count).then_some(first)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotConfig;

    fn db_with(top_k: usize, tau_ms: i64) -> Database {
        Database::open_in_memory(SlotConfig { tau_ms, top_k }).expect("open")
    }

    const TMPL: &str = "git checkout {}";
    const TAU: i64 = 1_209_600_000;

    #[test]
    fn decay_across_one_half_life() {
        let db = db_with(20, TAU);
        let t0 = 1_000_000;
        let t1 = t0 + TAU;
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t0).expect("update");
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t1).expect("update");
        let rows = db
            .slot_top_values_at(GLOBAL_SCOPE, TMPL, 0, 10, t1)
            .expect("query");
        assert_eq!(rows.len(), 1);
        // 1 * e^-1 + 1
        assert!((rows[0].count - 1.3679).abs() < 0.01, "count = {}", rows[0].count);
    }

    #[test]
    fn query_time_decay_matches_formula_and_does_not_persist() {
        let db = db_with(20, TAU);
        let t0 = 50_000;
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t0).expect("update");
        let t_query = t0 + TAU / 2;
        let expected = (-0.5f64).exp();
        let rows = db
            .slot_top_values_at(GLOBAL_SCOPE, TMPL, 0, 10, t_query)
            .expect("query");
        assert!((rows[0].count - expected).abs() / expected < 0.01);
        // Reading again at t0 still sees the stored count, undecayed.
        let rows = db
            .slot_top_values_at(GLOBAL_SCOPE, TMPL, 0, 10, t0)
            .expect("query");
        assert!((rows[0].count - 1.0).abs() < 1e-9);
    }

    #[test]
    fn two_updates_at_same_instant_add_one_each() {
        let db = db_with(20, TAU);
        let t = 7_000;
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        let rows = db
            .slot_top_values_at(GLOBAL_SCOPE, TMPL, 0, 10, t)
            .expect("query");
        assert!((rows[0].count - 2.0).abs() < 1e-9);
    }

    #[test]
    fn group_is_pruned_to_top_k() {
        let db = db_with(3, TAU);
        let t = 1_000;
        // Established values first; the stragglers arriving after the group
        // is full are pruned right back out.
        for (v, n) in [("e", 4), ("d", 3), ("c", 2), ("b", 1), ("a", 1)] {
            for _ in 0..n {
                db.slot_update(GLOBAL_SCOPE, TMPL, 0, v, t).expect("update");
            }
        }
        let rows = db
            .slot_top_values_at(GLOBAL_SCOPE, TMPL, 0, 10, t)
            .expect("query");
        assert_eq!(
            rows.iter().map(|r| r.value.as_str()).collect::<Vec<_>>(),
            vec!["e", "d", "c"]
        );
    }

    #[test]
    fn repo_scope_is_preferred_over_global() {
        let db = db_with(20, TAU);
        let t = 1_000;
        for _ in 0..10 {
            db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        }
        for _ in 0..5 {
            db.slot_update(&repo_scope("/src/app"), TMPL, 0, "feature", t)
                .expect("update");
        }
        let best = db
            .slot_best_value_at(TMPL, 0, Some("/src/app"), t)
            .expect("query")
            .expect("confident");
        assert_eq!(best.value, "feature");
    }

    #[test]
    fn confidence_gate_requires_double_lead() {
        let db = db_with(20, TAU);
        let t = 1_000;
        for _ in 0..3 {
            db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        }
        for _ in 0..2 {
            db.slot_update(GLOBAL_SCOPE, TMPL, 0, "develop", t).expect("update");
        }
        assert!(db.slot_best_value_at(TMPL, 0, None, t).expect("query").is_none());

        for _ in 0..7 {
            db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        }
        // 10 vs 2: confident.
        let best = db
            .slot_best_value_at(TMPL, 0, None, t)
            .expect("query")
            .expect("confident");
        assert_eq!(best.value, "main");
    }

    #[test]
    fn unconfident_repo_falls_back_to_global() {
        let db = db_with(20, TAU);
        let t = 1_000;
        let repo = "/src/app";
        // Repo scope: 3 vs 2, not confident.
        for _ in 0..3 {
            db.slot_update(&repo_scope(repo), TMPL, 0, "a", t).expect("update");
        }
        for _ in 0..2 {
            db.slot_update(&repo_scope(repo), TMPL, 0, "b", t).expect("update");
        }
        // Global: single candidate.
        db.slot_update(GLOBAL_SCOPE, TMPL, 0, "main", t).expect("update");
        let best = db
            .slot_best_value_at(TMPL, 0, Some(repo), t)
            .expect("query")
            .expect("confident");
        assert_eq!(best.value, "main");
    }
}
