//! Persisted feedback counters. These feed the confidence model: a high
//! acceptance rate relaxes the ranker's score floor slightly, a high
//! dismissal rate tightens it.

use std::collections::HashMap;

use clai_protocol::FeedbackAction;
use rusqlite::params;

use super::Database;
use crate::error::Result;

impl Database {
    pub fn bump_feedback(&self, action: FeedbackAction) -> Result<()> {
        self.with_tx(|tx| {
            tx.execute(
                "INSERT INTO feedback_stats (action, count) VALUES (?1, 1)
                 ON CONFLICT (action) DO UPDATE SET count = count + 1",
                params![action.as_str()],
            )?;
            Ok(())
        })
    }

    pub fn feedback_totals(&self) -> Result<HashMap<String, u64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT action, count FROM feedback_stats")?;
            let rows = stmt
                .query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
                })?
                .collect::<std::result::Result<HashMap<_, _>, _>>()?;
            Ok(rows)
        })
    }

    /// Fraction of decided feedback that was an acceptance; `None` until
    /// enough signal exists to be meaningful.
    pub fn acceptance_rate(&self) -> Result<Option<f64>> {
        let totals = self.feedback_totals()?;
        let accepted = totals.get("accepted").copied().unwrap_or(0);
        let decided: u64 = ["accepted", "dismissed", "edited", "never"]
            .iter()
            .filter_map(|k| totals.get(*k))
            .sum();
        if decided < 10 {
            return Ok(None);
        }
        Ok(Some(accepted as f64 / decided as f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotConfig;

    #[test]
    fn counters_accumulate_and_rate_needs_signal() {
        let db = Database::open_in_memory(SlotConfig::default()).expect("open");
        for _ in 0..3 {
            db.bump_feedback(FeedbackAction::Accepted).expect("bump");
        }
        db.bump_feedback(FeedbackAction::Dismissed).expect("bump");
        let totals = db.feedback_totals().expect("totals");
        assert_eq!(totals.get("accepted"), Some(&3));
        // Only 4 decided actions: below the signal floor.
        assert_eq!(db.acceptance_rate().expect("rate"), None);

        for _ in 0..6 {
            db.bump_feedback(FeedbackAction::Accepted).expect("bump");
        }
        let rate = db.acceptance_rate().expect("rate").expect("some");
        assert!((rate - 0.9).abs() < 1e-9);
    }
}
