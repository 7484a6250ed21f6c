//! Suggestion dispatch: fingerprint the request, consult the L1 cache, and
//! fall through to the ranker on a miss.
//!
//! Concurrent misses on the same key collapse into a single ranker run
//! (single-flight); late arrivals wait on the in-flight computation instead
//! of repeating it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use clai_protocol::Suggestion;
use tokio::sync::watch;

use crate::cache::L1Cache;
use crate::cache::cache_key;
use crate::cache::prefix_hash;
use crate::error::Result;
use crate::ranker::RankRequest;
use crate::ranker::Ranker;

#[derive(Debug, Clone)]
pub struct SuggestRequest {
    pub session_id: String,
    pub cwd: String,
    pub buffer: String,
    pub cursor_pos: Option<usize>,
    pub repo_key: Option<String>,
    pub branch: Option<String>,
    pub max_results: usize,
    pub include_low_confidence: bool,
    pub tab_generation: u32,
}

type FlightResult = Option<Arc<Vec<Suggestion>>>;

pub struct SuggestDispatcher {
    ranker: Arc<Ranker>,
    cache: Arc<L1Cache>,
    inflight: Mutex<HashMap<String, watch::Receiver<FlightResult>>>,
}

impl SuggestDispatcher {
    pub fn new(ranker: Arc<Ranker>, cache: Arc<L1Cache>) -> Self {
        Self {
            ranker,
            cache,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<L1Cache> {
        &self.cache
    }

    pub fn fingerprint(&self, request: &SuggestRequest) -> String {
        let prefix = prefix_hash(
            &request.cwd,
            request.repo_key.as_deref().unwrap_or_default(),
            request.branch.as_deref().unwrap_or_default(),
        );
        cache_key(&request.session_id, request.tab_generation, &prefix)
    }

    pub async fn suggest(&self, request: SuggestRequest, now_ms: i64) -> Result<Vec<Suggestion>> {
        let key = self.fingerprint(&request);

        if let Some(hit) = self.cache.get(&key, now_ms) {
            return Ok(hit);
        }

        // Either join an in-flight computation or become its owner.
        let (tx, mut rx) = {
            let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
            match inflight.get(&key) {
                Some(rx) => (None, rx.clone()),
                None => {
                    let (tx, rx) = watch::channel::<FlightResult>(None);
                    inflight.insert(key.clone(), rx.clone());
                    (Some(tx), rx)
                }
            }
        };

        let Some(tx) = tx else {
            // Another task owns the computation; wait for it to publish.
            while rx.borrow().is_none() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
            let joined = rx.borrow().clone();
            return Ok(joined.map(|s| (*s).clone()).unwrap_or_default());
        };

        let ranker = Arc::clone(&self.ranker);
        let rank_request = RankRequest {
            session_id: request.session_id,
            cwd: request.cwd,
            buffer: request.buffer,
            cursor_pos: request.cursor_pos,
            repo_key: request.repo_key,
            branch: request.branch,
            max_results: request.max_results,
            include_low_confidence: request.include_low_confidence,
            now_ms,
        };
        // The ranker is synchronous database work; keep it off the async
        // worker threads.
        let computed = tokio::task::spawn_blocking(move || ranker.rank(&rank_request))
            .await
            .map_err(|e| crate::ClaiErr::Remote(format!("ranker task failed: {e}")))?;

        let (result, publish) = match computed {
            Ok(suggestions) => {
                self.cache.put(key.clone(), suggestions.clone(), now_ms);
                let shared = Arc::new(suggestions.clone());
                (Ok(suggestions), shared)
            }
            // Waiters get an empty list; the owner surfaces the error.
            Err(e) => (Err(e), Arc::new(Vec::new())),
        };
        let _ = tx.send(Some(publish));
        self.inflight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::config::SlotConfig;
    use crate::discovery::DiscoveryEngine;
    use crate::ingest::EventIngester;
    use crate::sessions::SessionRegistry;
    use crate::storage::Database;
    use clai_protocol::CommandEndedParams;
    use clai_protocol::CommandStartedParams;
    use pretty_assertions::assert_eq;

    fn dispatcher() -> (SuggestDispatcher, EventIngester, tempfile::TempDir) {
        let db = Database::open_in_memory(SlotConfig::default()).expect("open");
        let registry = std::sync::Arc::new(SessionRegistry::new());
        let home = tempfile::tempdir().expect("home");
        let config = Config::default();
        let ranker = Arc::new(Ranker::new(
            db.clone(),
            Arc::clone(&registry),
            Arc::new(DiscoveryEngine::new(config.discovery.clone())),
            config.clone(),
            home.path().to_path_buf(),
        ));
        let cache = Arc::new(L1Cache::new(&config.suggest.l1));
        let ingester = EventIngester::new(db).with_registry(registry);
        (SuggestDispatcher::new(ranker, cache), ingester, home)
    }

    fn seed(ingester: &EventIngester, session: &str, cmd: &str, ts: i64) {
        let command_id = format!("c{ts}");
        ingester
            .command_started(&CommandStartedParams {
                session_id: session.into(),
                command_id: command_id.clone(),
                ts_ms: ts,
                cwd: "/work".into(),
                cmd_raw: cmd.into(),
                git_branch: None,
                repo_name: None,
                repo_root: None,
                prev_command_id: None,
                ephemeral: false,
            })
            .expect("start");
        ingester
            .command_ended(&CommandEndedParams {
                session_id: session.into(),
                command_id,
                ts_ms: ts + 1,
                exit_code: 0,
                duration_ms: 1,
            })
            .expect("end");
    }

    fn request(session: &str, buffer: &str) -> SuggestRequest {
        SuggestRequest {
            session_id: session.into(),
            cwd: "/work".into(),
            buffer: buffer.into(),
            cursor_pos: None,
            repo_key: None,
            branch: None,
            max_results: 5,
            include_low_confidence: true,
            tab_generation: 0,
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn second_identical_request_is_served_from_cache() {
        let (dispatcher, ingester, _home) = dispatcher();
        for ts in [1_000, 2_000, 3_000] {
            seed(&ingester, "s1", "git status", ts);
        }
        let first = dispatcher.suggest(request("s1", "git"), 10_000).await.expect("first");
        let before = dispatcher.cache().metrics();
        let second = dispatcher.suggest(request("s1", "git"), 10_001).await.expect("second");
        let after = dispatcher.cache().metrics();
        assert_eq!(first, second);
        assert_eq!(after.hits, before.hits + 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_single_flight() {
        let (dispatcher, ingester, _home) = dispatcher();
        for ts in [1_000, 2_000, 3_000] {
            seed(&ingester, "s1", "git status", ts);
        }
        let dispatcher = Arc::new(dispatcher);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                d.suggest(request("s1", "git"), 10_000).await
            }));
        }
        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.expect("join").expect("suggest"));
        }
        for pair in results.windows(2) {
            assert_eq!(pair[0], pair[1]);
        }
        // Exactly one computation populated the cache.
        let metrics = dispatcher.cache().metrics();
        assert_eq!(metrics.entries, 1, "metrics: {metrics:?}");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn tab_generation_partitions_the_key_space() {
        let (dispatcher, _ingester, _home) = dispatcher();
        let mut a = request("s1", "");
        a.tab_generation = 0;
        let mut b = request("s1", "");
        b.tab_generation = 1;
        assert_ne!(dispatcher.fingerprint(&a), dispatcher.fingerprint(&b));
    }
}
