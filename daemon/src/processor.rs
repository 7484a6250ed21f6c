//! Request dispatch: one method per operation, all reached from the
//! per-connection task. Interactive operations run under the deadline the
//! connection layer derives from the op's budget; fire-and-forget work is
//! acked first and applied out-of-band.

use std::sync::Arc;
use std::time::Instant;

use clai_core::ClaiErr;
use clai_core::config::Config;
use clai_core::git;
use clai_core::history_import;
use clai_core::ingest::EventIngester;
use clai_core::miner::Miner;
use clai_core::sessions::SessionRegistry;
use clai_core::storage::Database;
use clai_core::storage::EventFilter;
use clai_core::suggest::SuggestDispatcher;
use clai_core::suggest::SuggestRequest;
use clai_core::text_to_command::TextToCommand;
use clai_protocol::ClientOp;
use clai_protocol::FetchHistoryParams;
use clai_protocol::HistoryEntry;
use clai_protocol::HistoryPage;
use clai_protocol::HistoryScope;
use clai_protocol::ImportHistoryParams;
use clai_protocol::ResponseBody;
use clai_protocol::StatusBody;
use clai_protocol::SuggestParams;
use clai_protocol::SuggestionsBody;
use clai_protocol::TextToCommandParams;
use clai_protocol::WireError;
use clai_protocol::WireErrorKind;
use tracing::warn;

const HISTORY_DEFAULT_LIMIT: usize = 50;
const HISTORY_MAX_LIMIT: usize = 500;

pub struct ServerState {
    pub config: Config,
    pub db: Database,
    pub registry: Arc<SessionRegistry>,
    pub ingester: Arc<EventIngester>,
    pub dispatcher: Arc<SuggestDispatcher>,
    pub text_to_command: Arc<TextToCommand>,
    pub miner: Arc<Miner>,
    pub started_at: Instant,
}

pub struct MessageProcessor {
    state: Arc<ServerState>,
}

impl MessageProcessor {
    pub fn new(state: Arc<ServerState>) -> Self {
        Self { state }
    }

    pub async fn process(&self, op: ClientOp) -> Result<ResponseBody, WireError> {
        match op {
            ClientOp::Ping => Ok(ResponseBody::Pong),
            ClientOp::GetStatus => Ok(self.handle_get_status()),
            ClientOp::SessionStart(params) => self
                .state
                .ingester
                .session_start(&params)
                .map(|()| ResponseBody::Ack)
                .map_err(wire_error),
            ClientOp::SessionEnd(params) => self
                .state
                .ingester
                .session_end(&params)
                .map(|()| ResponseBody::Ack)
                .map_err(wire_error),
            ClientOp::CommandStarted(params) => self
                .state
                .ingester
                .command_started(&params)
                .map(|_| ResponseBody::Ack)
                .map_err(wire_error),
            ClientOp::CommandEnded(params) => {
                let applied = self
                    .state
                    .ingester
                    .command_ended(&params)
                    .map_err(wire_error)?;
                if applied {
                    // New committed events can complete a workflow; let the
                    // miner fold them in soon.
                    self.state.miner.trigger();
                }
                Ok(ResponseBody::Ack)
            }
            ClientOp::RecordFeedback(params) => self
                .state
                .ingester
                .record_feedback(&params)
                .map(|()| ResponseBody::Ack)
                .map_err(wire_error),
            ClientOp::Suggest(params) => self.handle_suggest(params).await,
            ClientOp::TextToCommand(params) => self.handle_text_to_command(params).await,
            ClientOp::FetchHistory(params) => self.handle_fetch_history(params),
            ClientOp::ImportHistory(params) => self.handle_import_history(params).await,
        }
    }

    fn handle_get_status(&self) -> ResponseBody {
        let state = &self.state;
        ResponseBody::Status(StatusBody {
            version: env!("CARGO_PKG_VERSION").to_string(),
            pid: std::process::id(),
            uptime_secs: state.started_at.elapsed().as_secs(),
            active_sessions: state.registry.len(),
            commands_logged: state.db.count_events().unwrap_or_else(|e| {
                warn!(error = %e, "failed to count events");
                0
            }),
            cache: state.dispatcher.cache().metrics(),
        })
    }

    async fn handle_suggest(&self, params: SuggestParams) -> Result<ResponseBody, WireError> {
        let cwd = std::path::PathBuf::from(&params.cwd);
        let repo_root = git::resolve_repo_root(&cwd);
        let branch = repo_root.as_deref().and_then(git::read_branch);
        let request = SuggestRequest {
            session_id: params.session_id,
            cwd: params.cwd,
            buffer: params.buffer,
            cursor_pos: params.cursor_pos,
            repo_key: repo_root.map(|p| p.to_string_lossy().into_owned()),
            branch,
            max_results: params
                .max_results
                .unwrap_or(self.state.config.suggest.max_results),
            include_low_confidence: params.include_low_confidence,
            tab_generation: params.tab_generation,
        };
        let suggestions = self
            .state
            .dispatcher
            .suggest(request, clai_core::now_ms())
            .await
            .map_err(wire_error)?;
        Ok(ResponseBody::Suggestions(SuggestionsBody { suggestions }))
    }

    async fn handle_text_to_command(
        &self,
        params: TextToCommandParams,
    ) -> Result<ResponseBody, WireError> {
        // A few recent commands give the remote model grounding context.
        let history: Vec<String> = self
            .state
            .db
            .session_tail(&params.session_id, 10)
            .unwrap_or_default()
            .into_iter()
            .map(|e| e.cmd_raw)
            .collect();
        let suggestions = self
            .state
            .text_to_command
            .translate(
                &params.prompt,
                &params.cwd,
                &history,
                params.max_suggestions.unwrap_or(3),
            )
            .await
            .map_err(wire_error)?;
        Ok(ResponseBody::Suggestions(SuggestionsBody { suggestions }))
    }

    fn handle_fetch_history(
        &self,
        params: FetchHistoryParams,
    ) -> Result<ResponseBody, WireError> {
        let limit = params
            .limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT);
        let offset = params.offset.unwrap_or(0);
        let mut filter = EventFilter {
            contains: params.filter,
            limit,
            offset,
            ..Default::default()
        };
        match params.scope {
            HistoryScope::Global => {}
            HistoryScope::Session => filter.session_id = Some(params.session_id),
            HistoryScope::Repo => {
                let cwd = std::path::PathBuf::from(&params.cwd);
                match git::resolve_repo_root(&cwd) {
                    Some(root) => {
                        filter.repo_key = Some(root.to_string_lossy().into_owned());
                    }
                    None => {
                        return Ok(ResponseBody::History(HistoryPage {
                            entries: Vec::new(),
                            next_offset: None,
                        }));
                    }
                }
            }
        }

        let rows = self.state.db.fetch_history(&filter).map_err(wire_error)?;
        let full_page = rows.len() == limit;
        let entries: Vec<HistoryEntry> = rows
            .into_iter()
            .map(|row| HistoryEntry {
                event_id: row.event_id,
                session_id: row.session_id,
                ts_ms: row.ts_ms,
                cwd: row.cwd,
                cmd_raw: row.cmd_raw,
                exit_code: row.exit_code,
                duration_ms: row.duration_ms,
            })
            .collect();
        Ok(ResponseBody::History(HistoryPage {
            next_offset: full_page.then_some(offset + entries.len()),
            entries,
        }))
    }

    async fn handle_import_history(
        &self,
        params: ImportHistoryParams,
    ) -> Result<ResponseBody, WireError> {
        let home = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let path = match params.path.map(std::path::PathBuf::from) {
            Some(path) => path,
            None => history_import::default_history_path(params.shell, &home).ok_or_else(|| {
                WireError::new(
                    WireErrorKind::Malformed,
                    "import requires a shell with a known history file",
                )
            })?,
        };
        let db = self.state.db.clone();
        let shell = params.shell;
        let report =
            tokio::task::spawn_blocking(move || {
                history_import::import_file(&db, shell, &path, clai_core::now_ms())
            })
            .await
            .map_err(|e| WireError::new(WireErrorKind::Internal, e.to_string()))?
            .map_err(wire_error)?;
        // Imported history changes the frequency picture everywhere.
        self.state.dispatcher.cache().invalidate_all();
        self.state.miner.trigger();
        Ok(ResponseBody::Import(report))
    }
}

fn wire_error(err: ClaiErr) -> WireError {
    let kind = match &err {
        ClaiErr::DeadlineExceeded => WireErrorKind::DeadlineExceeded,
        ClaiErr::Malformed(_) | ClaiErr::Playbook(_) | ClaiErr::Yaml(_) => WireErrorKind::Malformed,
        ClaiErr::Remote(_) => WireErrorKind::Unavailable,
        _ => WireErrorKind::Internal,
    };
    WireError::new(kind, err.to_string())
}
