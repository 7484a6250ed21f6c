//! The ranker: turns a typing context plus stored state into an ordered,
//! explainable suggestion list.
//!
//! Candidates from every source are pooled, scored additively with the
//! config-driven weights (each source pre-weights its own signal),
//! risk-annotated, deduplicated by rendered text, gated by confidence and
//! truncated. Any single source failing is logged and skipped; only an
//! unparsable context fails the request.

pub mod risk;
mod sources;

pub use sources::SuggestionSource;

use std::collections::HashMap;
use std::sync::Arc;

use clai_protocol::Reason;
use clai_protocol::Risk;
use clai_protocol::Suggestion;
use clai_protocol::SuggestionSourceKind;
use tracing::warn;

use crate::config::Config;
use crate::discovery::DiscoveryEngine;
use crate::error::Result;
use crate::normalize;
use crate::playbook::Playbook;
use crate::sessions::SessionInfo;
use crate::sessions::SessionRegistry;
use crate::storage::Database;

/// A candidate's confidence at or above this is "high confidence" for the
/// discovery fallback rule.
const HIGH_CONFIDENCE: f64 = 0.6;
const DISCOVERY_BASE_SCORE: f64 = 0.3;

#[derive(Debug, Clone)]
pub struct RankRequest {
    pub session_id: String,
    pub cwd: String,
    pub buffer: String,
    pub cursor_pos: Option<usize>,
    pub repo_key: Option<String>,
    pub branch: Option<String>,
    pub max_results: usize,
    pub include_low_confidence: bool,
    pub now_ms: i64,
}

pub struct RankContext<'a> {
    pub request: &'a RankRequest,
    /// Buffer up to the cursor; what the user has actually typed.
    pub prefix_raw: String,
    pub shell: clai_protocol::ShellKind,
    pub session: Option<SessionInfo>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    pub source: SuggestionSourceKind,
    pub score: f64,
    pub confidence: f64,
    pub reasons: Vec<Reason>,
    pub description: String,
}

pub struct Ranker {
    db: Database,
    registry: Arc<SessionRegistry>,
    discovery: Arc<DiscoveryEngine>,
    config: Config,
    clai_home: std::path::PathBuf,
}

impl Ranker {
    pub fn new(
        db: Database,
        registry: Arc<SessionRegistry>,
        discovery: Arc<DiscoveryEngine>,
        config: Config,
        clai_home: std::path::PathBuf,
    ) -> Self {
        Self {
            db,
            registry,
            discovery,
            config,
            clai_home,
        }
    }

    pub fn rank(&self, request: &RankRequest) -> Result<Vec<Suggestion>> {
        let ctx = self.capture_context(request);
        let playbook = self.load_playbook(request);

        let weights = &self.config.rank;
        let sources: Vec<Box<dyn SuggestionSource + '_>> = vec![
            Box::new(sources::TransitionSource {
                db: &self.db,
                weights,
            }),
            Box::new(sources::FrequencySource {
                db: &self.db,
                weights,
            }),
            Box::new(sources::SlotFillSource {
                db: &self.db,
                weights,
            }),
            Box::new(sources::WorkflowSource {
                db: &self.db,
                weights,
                min_occurrences: self.config.workflow.min_occurrences,
            }),
            Box::new(sources::PlaybookSource {
                playbook: playbook.as_ref(),
                weights,
            }),
        ];

        let mut candidates: Vec<Candidate> = Vec::new();
        for source in &sources {
            match source.fetch(&ctx) {
                Ok(found) => candidates.extend(found),
                Err(e) => {
                    warn!(source = source.describe(), error = %e, "suggestion source failed");
                }
            }
        }

        // Keep only candidates that extend what is already typed.
        let typed = ctx.prefix_raw.trim_start();
        if !typed.is_empty() {
            candidates.retain(|c| c.text.starts_with(typed) && c.text != typed);
        }

        // Discovery is the fallback of last resort: empty prompt, nothing
        // confident from the scorers.
        if typed.is_empty()
            && !candidates.iter().any(|c| c.confidence >= HIGH_CONFIDENCE)
        {
            for (i, found) in self
                .discovery
                .discover(
                    std::path::Path::new(&request.cwd),
                    playbook.as_ref(),
                    request.now_ms,
                )
                .into_iter()
                .enumerate()
            {
                candidates.push(Candidate {
                    text: found.command,
                    source: SuggestionSourceKind::Discovery,
                    score: DISCOVERY_BASE_SCORE - i as f64 * 0.01,
                    confidence: 0.2,
                    reasons: vec![Reason {
                        kind: "discovery".to_string(),
                        description: found.description.clone(),
                    }],
                    description: found.description,
                });
            }
        }

        let mut suggestions = self.finalize(candidates);

        if !request.include_low_confidence {
            let floor = self.adjusted_score_floor();
            suggestions.retain(|s| s.score >= floor);
            // The single inline completion must clearly beat the runner-up.
            if request.max_results == 1
                && suggestions.len() >= 2
                && suggestions[0].score < 2.0 * suggestions[1].score
            {
                suggestions.clear();
            }
        }

        suggestions.truncate(request.max_results);
        Ok(suggestions)
    }

    fn capture_context<'r>(&self, request: &'r RankRequest) -> RankContext<'r> {
        let mut cursor = request
            .cursor_pos
            .unwrap_or(request.buffer.len())
            .min(request.buffer.len());
        while cursor > 0 && !request.buffer.is_char_boundary(cursor) {
            cursor -= 1;
        }
        RankContext {
            prefix_raw: request.buffer[..cursor].to_string(),
            shell: self.registry.shell_of(&request.session_id),
            session: self.registry.get(&request.session_id),
            request,
        }
    }

    fn load_playbook(&self, request: &RankRequest) -> Option<Playbook> {
        match Playbook::discover(std::path::Path::new(&request.cwd), &self.clai_home) {
            Ok(playbook) => playbook,
            Err(e) => {
                warn!(error = %e, "ignoring malformed playbook");
                None
            }
        }
    }

    /// Dedup by rendered text (keep the best score, merge reasons), apply the
    /// destructive penalty, and order deterministically.
    fn finalize(&self, candidates: Vec<Candidate>) -> Vec<Suggestion> {
        let penalty = self.config.rank.destructive_penalty;
        let mut by_text: HashMap<String, Suggestion> = HashMap::new();

        for candidate in candidates {
            let risk = risk::classify(
                &normalize::normalize(&candidate.text, clai_protocol::ShellKind::Bash).cmd_norm,
            );
            let mut score = candidate.score;
            if risk == Risk::Destructive {
                score *= penalty;
            }
            match by_text.get_mut(&candidate.text) {
                Some(existing) => {
                    for r in candidate.reasons {
                        if !existing.reasons.iter().any(|have| have.kind == r.kind) {
                            existing.reasons.push(r);
                        }
                    }
                    if score > existing.score {
                        existing.score = score;
                        existing.source = candidate.source;
                    }
                    existing.confidence = existing.confidence.max(candidate.confidence);
                    if existing.description.is_empty() {
                        existing.description = candidate.description;
                    }
                }
                None => {
                    by_text.insert(candidate.text.clone(), Suggestion {
                        text: candidate.text,
                        score,
                        source: candidate.source,
                        risk,
                        confidence: candidate.confidence,
                        reasons: candidate.reasons,
                        description: candidate.description,
                    });
                }
            }
        }

        let mut out: Vec<Suggestion> = by_text.into_values().collect();
        for suggestion in &mut out {
            suggestion.reasons.sort_by(|a, b| a.kind.cmp(&b.kind));
        }
        out.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.text.cmp(&b.text))
        });
        out
    }

    /// Score floor shifted by observed acceptance rate, within ±50% of the
    /// configured value.
    fn adjusted_score_floor(&self) -> f64 {
        let base = self.config.suggest.score_floor;
        match self.db.acceptance_rate() {
            Ok(Some(rate)) => (base * (1.5 - rate)).clamp(base * 0.5, base * 1.5),
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DiscoveryConfig;
    use crate::config::SlotConfig;
    use crate::ingest::EventIngester;
    use clai_protocol::CommandEndedParams;
    use clai_protocol::CommandStartedParams;
    use clai_protocol::SessionStartParams;
    use clai_protocol::ShellKind;
    use pretty_assertions::assert_eq;

    struct Harness {
        ranker: Ranker,
        ingester: EventIngester,
        _home: tempfile::TempDir,
        cwd: tempfile::TempDir,
        ts: i64,
    }

    impl Harness {
        fn new() -> Self {
            let db = Database::open_in_memory(SlotConfig::default()).expect("open");
            let registry = Arc::new(SessionRegistry::new());
            let discovery = Arc::new(DiscoveryEngine::new(DiscoveryConfig {
                cooldown_ms: 0,
                limit: 5,
                project_types: Vec::new(),
            }));
            let home = tempfile::tempdir().expect("home");
            let cwd = tempfile::tempdir().expect("cwd");
            let ranker = Ranker::new(
                db.clone(),
                Arc::clone(&registry),
                discovery,
                Config::default(),
                home.path().to_path_buf(),
            );
            let ingester = EventIngester::new(db).with_registry(registry);
            Harness {
                ranker,
                ingester,
                _home: home,
                cwd,
                ts: 1_000,
            }
        }

        fn start_session(&self, session: &str) {
            self.ingester
                .session_start(&SessionStartParams {
                    session_id: session.into(),
                    cwd: self.cwd.path().to_string_lossy().into_owned(),
                    shell: ShellKind::Bash,
                    ts_ms: 0,
                    client: Default::default(),
                })
                .expect("session start");
        }

        fn run(&mut self, session: &str, cmd: &str) {
            self.ts += 1_000;
            let command_id = format!("c{}", self.ts);
            self.ingester
                .command_started(&CommandStartedParams {
                    session_id: session.into(),
                    command_id: command_id.clone(),
                    ts_ms: self.ts,
                    cwd: self.cwd.path().to_string_lossy().into_owned(),
                    cmd_raw: cmd.into(),
                    git_branch: None,
                    repo_name: None,
                    repo_root: None,
                    prev_command_id: None,
                    ephemeral: false,
                })
                .expect("start");
            self.ingester
                .command_ended(&CommandEndedParams {
                    session_id: session.into(),
                    command_id,
                    ts_ms: self.ts + 10,
                    exit_code: 0,
                    duration_ms: 10,
                })
                .expect("end");
        }

        fn request(&self, session: &str, buffer: &str) -> RankRequest {
            RankRequest {
                session_id: session.into(),
                cwd: self.cwd.path().to_string_lossy().into_owned(),
                buffer: buffer.into(),
                cursor_pos: None,
                repo_key: None,
                branch: None,
                max_results: 5,
                include_low_confidence: false,
                now_ms: self.ts + 1_000,
            }
        }
    }

    #[test]
    fn transitions_dominate_after_a_repeated_pair() {
        let mut h = Harness::new();
        h.start_session("s1");
        for _ in 0..3 {
            h.run("s1", "git add .");
            h.run("s1", "git commit -m wip");
        }
        h.run("s1", "git add .");

        let out = h.ranker.rank(&h.request("s1", "")).expect("rank");
        assert!(!out.is_empty());
        assert_eq!(out[0].text, "git commit -m wip");
        assert_eq!(out[0].source, clai_protocol::SuggestionSourceKind::SessionTransition);
        assert!(out[0].reasons.iter().any(|r| r.kind == "session_transition"));
    }

    #[test]
    fn slot_fill_completes_an_open_template() {
        let mut h = Harness::new();
        h.start_session("s1");
        for _ in 0..4 {
            h.run("s1", "git checkout main");
        }
        let out = h.ranker.rank(&h.request("s1", "git checkout ")).expect("rank");
        assert!(out.iter().any(|s| {
            s.text == "git checkout main"
                && s.reasons.iter().any(|r| r.kind == "slot_fill")
        }));
    }

    #[test]
    fn typed_prefix_filters_candidates() {
        let mut h = Harness::new();
        h.start_session("s1");
        h.run("s1", "git status");
        h.run("s1", "cargo build");
        h.run("s1", "git status");

        let out = h.ranker.rank(&h.request("s1", "git")).expect("rank");
        assert!(out.iter().all(|s| s.text.starts_with("git")));
    }

    #[test]
    fn destructive_suggestions_are_demoted_below_safe_peers() {
        let mut h = Harness::new();
        h.start_session("s1");
        // rm -rf is used more, but the penalty should push it below.
        for _ in 0..5 {
            h.run("s1", "rm -rf build");
        }
        for _ in 0..4 {
            h.run("s1", "cargo build");
        }
        let mut req = h.request("s2", "");
        req.include_low_confidence = true;
        let out = h.ranker.rank(&req).expect("rank");
        let rm_pos = out.iter().position(|s| s.text == "rm -rf build");
        let cargo_pos = out.iter().position(|s| s.text == "cargo build");
        let (Some(rm_pos), Some(cargo_pos)) = (rm_pos, cargo_pos) else {
            panic!("both suggestions expected, got {out:?}");
        };
        assert!(cargo_pos < rm_pos);
        assert_eq!(out[rm_pos].risk, clai_protocol::Risk::Destructive);
    }

    #[test]
    fn inline_single_completion_requires_a_clear_winner() {
        let mut h = Harness::new();
        h.start_session("s1");
        // Two equally frequent commands, queried from a session with no
        // transition history.
        for _ in 0..3 {
            h.run("s1", "cargo build");
            h.run("s1", "cargo test");
        }
        let mut req = h.request("s-other", "");
        req.max_results = 1;
        let out = h.ranker.rank(&req).expect("rank");
        assert!(out.is_empty(), "ambiguous top must yield nothing: {out:?}");

        let mut req = h.request("s-other", "");
        req.max_results = 1;
        req.include_low_confidence = true;
        let out = h.ranker.rank(&req).expect("rank");
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn empty_history_falls_back_to_discovery() {
        let h = Harness::new();
        let mut req = h.request("s-none", "");
        req.include_low_confidence = true;
        let out = h.ranker.rank(&req).expect("rank");
        assert!(!out.is_empty());
        assert!(out
            .iter()
            .all(|s| s.source == clai_protocol::SuggestionSourceKind::Discovery));
        assert!(out.iter().any(|s| s.text == "git status"));
    }

    #[test]
    fn ranking_is_deterministic_for_identical_inputs() {
        let mut h = Harness::new();
        h.start_session("s1");
        for cmd in ["git add .", "git commit -m wip", "cargo test", "git add ."] {
            h.run("s1", cmd);
        }
        let req = h.request("s1", "");
        let a = h.ranker.rank(&req).expect("rank");
        let b = h.ranker.rank(&req).expect("rank");
        assert_eq!(a, b);
    }
}
