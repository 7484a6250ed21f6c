//! Wire types shared by the `clai` daemon and its shell clients.
//!
//! Every request carries a client-chosen `request_id`; the matching response
//! echoes it so a client multiplexing a socket (or recovering from a stale
//! read) can discard responses that do not belong to its outstanding request.

mod wire;

pub use wire::FrameError;
pub use wire::MAX_FRAME_BYTES;
pub use wire::read_frame;
pub use wire::write_frame;

use serde::Deserialize;
use serde::Serialize;

/// Per-operation deadline budgets, in milliseconds. The server derives its
/// internal deadlines from these; clients use them as socket read timeouts.
pub mod budget {
    /// Fire-and-forget events and liveness checks.
    pub const SHORT_MS: u64 = 500;
    /// Interactive suggestion queries driven by keystrokes.
    pub const SUGGEST_MS: u64 = 200;
    /// Remote natural-language translation.
    pub const TEXT_TO_COMMAND_MS: u64 = 10_000;
    /// Bulk history import.
    pub const IMPORT_MS: u64 = 120_000;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub request_id: u64,
    #[serde(flatten)]
    pub op: ClientOp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", content = "params", rename_all = "snake_case")]
pub enum ClientOp {
    Ping,
    GetStatus,
    SessionStart(SessionStartParams),
    SessionEnd(SessionEndParams),
    CommandStarted(CommandStartedParams),
    CommandEnded(CommandEndedParams),
    Suggest(SuggestParams),
    TextToCommand(TextToCommandParams),
    RecordFeedback(RecordFeedbackParams),
    FetchHistory(FetchHistoryParams),
    ImportHistory(ImportHistoryParams),
}

impl ClientOp {
    /// Deadline budget for this operation in milliseconds.
    pub fn budget_ms(&self) -> u64 {
        match self {
            ClientOp::Suggest(_) => budget::SUGGEST_MS,
            ClientOp::TextToCommand(_) => budget::TEXT_TO_COMMAND_MS,
            ClientOp::ImportHistory(_) => budget::IMPORT_MS,
            _ => budget::SHORT_MS,
        }
    }

    /// Fire-and-forget operations get an `Ack` as soon as the write is
    /// queued; the client may disconnect without waiting.
    pub fn is_fire_and_forget(&self) -> bool {
        matches!(
            self,
            ClientOp::SessionStart(_)
                | ClientOp::SessionEnd(_)
                | ClientOp::CommandStarted(_)
                | ClientOp::CommandEnded(_)
                | ClientOp::RecordFeedback(RecordFeedbackParams { sync: false, .. })
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShellKind {
    Bash,
    Zsh,
    Fish,
    #[default]
    Unknown,
}

impl std::str::FromStr for ShellKind {
    type Err = UnknownShellError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bash" => Ok(ShellKind::Bash),
            "zsh" => Ok(ShellKind::Zsh),
            "fish" => Ok(ShellKind::Fish),
            other => Err(UnknownShellError(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown shell: {0}")]
pub struct UnknownShellError(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ClientInfo {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub os: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStartParams {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub shell: ShellKind,
    pub ts_ms: i64,
    #[serde(default)]
    pub client: ClientInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEndParams {
    pub session_id: String,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandStartedParams {
    pub session_id: String,
    pub command_id: String,
    pub ts_ms: i64,
    pub cwd: String,
    pub cmd_raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_root: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_command_id: Option<String>,
    #[serde(default)]
    pub ephemeral: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEndedParams {
    pub session_id: String,
    pub command_id: String,
    pub ts_ms: i64,
    pub exit_code: i32,
    pub duration_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestParams {
    pub session_id: String,
    pub cwd: String,
    pub buffer: String,
    #[serde(default)]
    pub cursor_pos: Option<usize>,
    #[serde(default)]
    pub include_ai: bool,
    #[serde(default)]
    pub max_results: Option<usize>,
    #[serde(default)]
    pub include_low_confidence: bool,
    /// Distinguishes suggestion request types issued from the same session
    /// (inline widget vs. picker); part of the cache key.
    #[serde(default)]
    pub tab_generation: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextToCommandParams {
    pub session_id: String,
    pub cwd: String,
    pub prompt: String,
    #[serde(default)]
    pub max_suggestions: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackAction {
    Accepted,
    Dismissed,
    Edited,
    Never,
    Unblock,
    Ignored,
    Timeout,
}

impl FeedbackAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackAction::Accepted => "accepted",
            FeedbackAction::Dismissed => "dismissed",
            FeedbackAction::Edited => "edited",
            FeedbackAction::Never => "never",
            FeedbackAction::Unblock => "unblock",
            FeedbackAction::Ignored => "ignored",
            FeedbackAction::Timeout => "timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFeedbackParams {
    pub session_id: String,
    pub action: FeedbackAction,
    pub suggested: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    #[serde(default)]
    pub latency_ms: Option<u64>,
    /// When false the server acks immediately and records out-of-band.
    #[serde(default)]
    pub sync: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistoryScope {
    #[default]
    Global,
    Repo,
    Session,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchHistoryParams {
    pub session_id: String,
    pub cwd: String,
    #[serde(default)]
    pub scope: HistoryScope,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportHistoryParams {
    #[serde(default)]
    pub shell: ShellKind,
    /// Explicit history file path; defaults to the shell's well-known one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub request_id: u64,
    #[serde(flatten)]
    pub payload: ResponsePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResponsePayload {
    Ok { body: ResponseBody },
    Error { error: WireError },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ResponseBody {
    Pong,
    /// Fire-and-forget operation accepted for processing.
    Ack,
    Status(StatusBody),
    Suggestions(SuggestionsBody),
    History(HistoryPage),
    Import(ImportReport),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusBody {
    pub version: String,
    pub pid: u32,
    pub uptime_secs: u64,
    pub active_sessions: usize,
    pub commands_logged: u64,
    pub cache: CacheMetrics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionsBody {
    pub suggestions: Vec<Suggestion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionSourceKind {
    SessionTransition,
    Frequency,
    SlotFill,
    Workflow,
    Playbook,
    Discovery,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Risk {
    #[default]
    Safe,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reason {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    pub text: String,
    pub score: f64,
    pub source: SuggestionSourceKind,
    #[serde(default)]
    pub risk: Risk,
    pub confidence: f64,
    #[serde(default)]
    pub reasons: Vec<Reason>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub event_id: i64,
    pub session_id: String,
    pub ts_ms: i64,
    pub cwd: String,
    pub cmd_raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub entries: Vec<HistoryEntry>,
    /// Offset to pass for the next page; `None` when exhausted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_offset: Option<usize>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ImportReport {
    pub imported: u64,
    pub skipped: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireErrorKind {
    DeadlineExceeded,
    Malformed,
    Unavailable,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct WireError {
    pub kind: WireErrorKind,
    pub message: String,
}

impl WireError {
    pub fn new(kind: WireErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
