//! Event ingestion: validate incoming session/command lifecycle events,
//! persist them, and keep the derived stores in step.
//!
//! All operations are idempotent on `(session_id, command_id)`. Slot
//! learning for a completed command runs in the same transaction as the
//! event update, but a failing slot write is logged and skipped — learning
//! must never block ingestion.

use std::sync::Arc;

use clai_protocol::CommandEndedParams;
use clai_protocol::CommandStartedParams;
use clai_protocol::RecordFeedbackParams;
use clai_protocol::SessionEndParams;
use clai_protocol::SessionStartParams;
use tracing::warn;

use crate::cache::L1Cache;
use crate::error::ClaiErr;
use crate::error::Result;
use crate::normalize;
use crate::sessions::SessionRegistry;
use crate::storage::Database;
use crate::storage::NewCommandEvent;
use crate::storage::{self};

pub struct EventIngester {
    db: Database,
    registry: Arc<SessionRegistry>,
    cache: Option<Arc<L1Cache>>,
}

impl EventIngester {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            registry: Arc::new(SessionRegistry::new()),
            cache: None,
        }
    }

    pub fn with_registry(mut self, registry: Arc<SessionRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_cache(mut self, cache: Arc<L1Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn session_start(&self, params: &SessionStartParams) -> Result<()> {
        if params.session_id.is_empty() {
            return Err(ClaiErr::malformed("session_start requires session_id"));
        }
        self.registry.start(
            &params.session_id,
            &params.cwd,
            params.shell,
            params.client.clone(),
            params.ts_ms,
        );
        Ok(())
    }

    /// Ends the session's derived state and drops its cached suggestions.
    pub fn session_end(&self, params: &SessionEndParams) -> Result<()> {
        if params.session_id.is_empty() {
            return Err(ClaiErr::malformed("session_end requires session_id"));
        }
        self.registry.end(&params.session_id);
        if let Some(cache) = &self.cache {
            cache.invalidate_session(&params.session_id);
        }
        Ok(())
    }

    pub fn command_started(&self, params: &CommandStartedParams) -> Result<bool> {
        if params.session_id.is_empty() || params.command_id.is_empty() {
            return Err(ClaiErr::malformed(
                "command_started requires session_id and command_id",
            ));
        }
        if params.cmd_raw.is_empty() {
            return Err(ClaiErr::malformed("command_started requires command text"));
        }

        let shell = self.registry.shell_of(&params.session_id);
        let normalized = normalize::normalize(&params.cmd_raw, shell);
        let event = NewCommandEvent {
            session_id: params.session_id.clone(),
            command_id: params.command_id.clone(),
            ts_ms: params.ts_ms,
            cwd: params.cwd.clone(),
            repo_key: params.repo_root.clone().filter(|r| !r.is_empty()),
            branch: params.git_branch.clone().filter(|b| !b.is_empty()),
            cmd_raw: params.cmd_raw.clone(),
            cmd_norm: normalized.cmd_norm,
            cmd_truncated: normalized.truncated,
            template_id: normalized.template_id,
            ephemeral: params.ephemeral,
        };
        let inserted = self
            .db
            .with_tx(|tx| storage::event_log::insert_started_in_tx(tx, &event))?;
        if inserted {
            self.registry
                .note_command_started(&params.session_id, &params.command_id, &params.cwd);
        }
        Ok(inserted)
    }

    /// Completes a started event. An end with no matching open start (out of
    /// order, or a duplicate) is dropped silently per the ordering contract.
    pub fn command_ended(&self, params: &CommandEndedParams) -> Result<bool> {
        if params.session_id.is_empty() || params.command_id.is_empty() {
            return Err(ClaiErr::malformed(
                "command_ended requires session_id and command_id",
            ));
        }

        let shell = self.registry.shell_of(&params.session_id);
        let slot_config = self.db.slot_config().clone();
        let now_ms = params.ts_ms;
        let ended = self.db.with_tx(|tx| {
            let Some(ended) = storage::event_log::mark_ended_in_tx(
                tx,
                &params.session_id,
                &params.command_id,
                params.exit_code,
                params.duration_ms,
            )?
            else {
                return Ok(None);
            };

            if !ended.ephemeral && !ended.truncated && !ended.template_id.is_empty() {
                // Re-derive the slot bindings from the raw text; the event row
                // stores only the rendered template.
                let normalized = normalize::normalize(&ended.cmd_raw, shell);
                for slot in &normalized.slots {
                    let update = storage::slot_store::update_in_tx(
                        tx,
                        &slot_config,
                        storage::GLOBAL_SCOPE,
                        &normalized.cmd_norm,
                        slot.idx,
                        &slot.value,
                        now_ms,
                    )
                    .and_then(|()| match ended.repo_key.as_deref() {
                        Some(repo) if !repo.is_empty() => storage::slot_store::update_in_tx(
                            tx,
                            &slot_config,
                            &storage::repo_scope(repo),
                            &normalized.cmd_norm,
                            slot.idx,
                            &slot.value,
                            now_ms,
                        ),
                        _ => Ok(()),
                    });
                    if let Err(e) = update {
                        warn!(error = %e, slot = slot.idx, "slot learning failed; event still committed");
                    }
                }
            }
            Ok(Some(ended))
        })?;

        match ended {
            Some(ended) => {
                self.registry.note_command_ended(
                    &params.session_id,
                    &ended.template_id,
                    &ended.cmd_raw,
                    params.exit_code,
                );
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub fn record_feedback(&self, params: &RecordFeedbackParams) -> Result<()> {
        if params.session_id.is_empty() {
            return Err(ClaiErr::malformed("record_feedback requires session_id"));
        }
        self.db.bump_feedback(params.action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SlotConfig;
    use clai_protocol::ShellKind;
    use pretty_assertions::assert_eq;

    fn started(session: &str, command: &str, cmd: &str, ts: i64) -> CommandStartedParams {
        CommandStartedParams {
            session_id: session.into(),
            command_id: command.into(),
            ts_ms: ts,
            cwd: "/work".into(),
            cmd_raw: cmd.into(),
            git_branch: Some("main".into()),
            repo_name: None,
            repo_root: Some("/work".into()),
            prev_command_id: None,
            ephemeral: false,
        }
    }

    fn ended(session: &str, command: &str, ts: i64) -> CommandEndedParams {
        CommandEndedParams {
            session_id: session.into(),
            command_id: command.into(),
            ts_ms: ts,
            exit_code: 0,
            duration_ms: 42,
        }
    }

    fn harness() -> EventIngester {
        let db = Database::open_in_memory(SlotConfig::default()).expect("open");
        EventIngester::new(db)
    }

    #[test]
    fn start_then_end_is_idempotent() {
        let ingester = harness();
        assert!(ingester
            .command_started(&started("s1", "c1", "git checkout main", 1_000))
            .expect("start"));
        // Duplicate start is ignored.
        assert!(!ingester
            .command_started(&started("s1", "c1", "git checkout main", 1_000))
            .expect("start"));
        assert!(ingester.command_ended(&ended("s1", "c1", 2_000)).expect("end"));
        // Duplicate end is dropped.
        assert!(!ingester.command_ended(&ended("s1", "c1", 2_000)).expect("end"));
    }

    #[test]
    fn end_before_start_is_dropped() {
        let ingester = harness();
        assert!(!ingester.command_ended(&ended("s1", "c9", 2_000)).expect("end"));
    }

    #[test]
    fn completed_command_feeds_slot_store_in_both_scopes() {
        let ingester = harness();
        ingester
            .command_started(&started("s1", "c1", "git checkout main", 1_000))
            .expect("start");
        ingester.command_ended(&ended("s1", "c1", 2_000)).expect("end");

        let db = &ingester.db;
        let global = db
            .slot_top_values_at(storage::GLOBAL_SCOPE, "git checkout {}", 0, 5, 2_000)
            .expect("global");
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].value, "main");
        let repo = db
            .slot_top_values_at(&storage::repo_scope("/work"), "git checkout {}", 0, 5, 2_000)
            .expect("repo");
        assert_eq!(repo.len(), 1);
    }

    #[test]
    fn ephemeral_commands_do_not_learn() {
        let ingester = harness();
        let mut params = started("s1", "c1", "git checkout secret-branch", 1_000);
        params.ephemeral = true;
        ingester.command_started(&params).expect("start");
        ingester.command_ended(&ended("s1", "c1", 2_000)).expect("end");
        let rows = ingester
            .db
            .slot_top_values_at(storage::GLOBAL_SCOPE, "git checkout {}", 0, 5, 2_000)
            .expect("query");
        assert!(rows.is_empty());
    }

    #[test]
    fn incomplete_command_does_not_learn() {
        let ingester = harness();
        ingester
            .command_started(&started("s1", "c1", "git checkout main", 1_000))
            .expect("start");
        let rows = ingester
            .db
            .slot_top_values_at(storage::GLOBAL_SCOPE, "git checkout {}", 0, 5, 1_000)
            .expect("query");
        assert!(rows.is_empty());
    }

    #[test]
    fn malformed_events_are_rejected_not_fatal() {
        let ingester = harness();
        let mut bad = started("", "c1", "ls", 0);
        bad.session_id = String::new();
        assert!(matches!(
            ingester.command_started(&bad),
            Err(ClaiErr::Malformed(_))
        ));
    }

    #[test]
    fn session_end_invalidates_cached_suggestions() {
        let cache = Arc::new(L1Cache::new(&crate::config::L1Config::default()));
        let db = Database::open_in_memory(SlotConfig::default()).expect("open");
        let ingester = EventIngester::new(db).with_cache(Arc::clone(&cache));

        cache.put("s1:0:abc".into(), Vec::new(), 0);
        ingester
            .session_start(&SessionStartParams {
                session_id: "s1".into(),
                cwd: "/".into(),
                shell: ShellKind::Bash,
                ts_ms: 0,
                client: Default::default(),
            })
            .expect("start");
        ingester
            .session_end(&SessionEndParams {
                session_id: "s1".into(),
                ts_ms: 1,
            })
            .expect("end");
        assert!(cache.get("s1:0:abc", 1).is_none());
        assert_eq!(ingester.registry().len(), 0);
    }
}
