//! L1 suggestion cache: a bounded LRU of request fingerprint to ranked
//! suggestions, limited by entry count and by estimated bytes, with TTL
//! enforced on reads.
//!
//! One mutex guards the LRU structure; hit/miss/eviction counters and the
//! size gauges live in atomics so a metrics snapshot never has to wait on a
//! writer.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use clai_protocol::CacheMetrics;
use clai_protocol::Suggestion;
use lru::LruCache;

use crate::config::L1Config;
use crate::hash::stable_hex64_parts;

/// Fixed per-suggestion overhead used in the byte estimate.
const SUGGESTION_OVERHEAD_BYTES: usize = 24;

/// 16-hex-digit hash of the request context, the last segment of an L1 key.
pub fn prefix_hash(cwd: &str, repo_key: &str, branch: &str) -> String {
    stable_hex64_parts(&[cwd, repo_key, branch])
}

/// Full cache key. Session-scoped invalidation matches on the leading
/// `session_id:` segment.
pub fn cache_key(session_id: &str, tab_generation: u32, prefix: &str) -> String {
    format!("{session_id}:{tab_generation}:{prefix}")
}

fn estimate_bytes(suggestions: &[Suggestion]) -> usize {
    suggestions
        .iter()
        .map(|s| {
            s.text.len()
                + s.reasons
                    .iter()
                    .map(|r| r.description.len())
                    .sum::<usize>()
                + SUGGESTION_OVERHEAD_BYTES
        })
        .sum()
}

struct Entry {
    suggestions: Vec<Suggestion>,
    inserted_at_ms: i64,
    bytes: usize,
}

pub struct L1Cache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl_ms: i64,
    max_bytes: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    entries: AtomicUsize,
    bytes: AtomicUsize,
}

impl L1Cache {
    pub fn new(config: &L1Config) -> Self {
        let capacity = NonZeroUsize::new(config.capacity.max(1))
            .unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(LruCache::new(capacity)),
            ttl_ms: config.ttl_ms,
            max_bytes: config.max_bytes,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            entries: AtomicUsize::new(0),
            bytes: AtomicUsize::new(0),
        }
    }

    /// Fresh-entry lookup; an expired entry counts as a miss and is dropped.
    pub fn get(&self, key: &str, now_ms: i64) -> Option<Vec<Suggestion>> {
        let mut map = self.lock();
        let expired = match map.get(key) {
            Some(entry) if now_ms - entry.inserted_at_ms <= self.ttl_ms => {
                let out = entry.suggestions.clone();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(out);
            }
            Some(_) => true,
            None => false,
        };
        if expired && let Some(entry) = map.pop(key) {
            self.note_removed(&entry);
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    pub fn put(&self, key: String, suggestions: Vec<Suggestion>, now_ms: i64) {
        let bytes = estimate_bytes(&suggestions);
        let entry = Entry {
            suggestions,
            inserted_at_ms: now_ms,
            bytes,
        };
        let mut map = self.lock();
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
        // `push` hands back either the value replaced under the same key or
        // the entry LRU-evicted to make room; only the latter is an eviction.
        if let Some((old_key, old)) = map.push(key.clone(), entry) {
            self.note_removed(&old);
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.entries.store(map.len(), Ordering::Relaxed);
        self.rebalance_bytes(&mut map, self.max_bytes);
    }

    /// Evict least-recently-used entries until the byte estimate is at or
    /// below `target_bytes`.
    pub fn evict_to_size(&self, target_bytes: usize) {
        let mut map = self.lock();
        self.rebalance_bytes(&mut map, target_bytes);
    }

    fn rebalance_bytes(&self, map: &mut LruCache<String, Entry>, target: usize) {
        while self.bytes.load(Ordering::Relaxed) > target {
            match map.pop_lru() {
                Some((_, entry)) => {
                    self.note_removed(&entry);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.bytes.store(0, Ordering::Relaxed);
                    break;
                }
            }
        }
        self.entries.store(map.len(), Ordering::Relaxed);
    }

    /// Drop every entry belonging to `session_id`.
    pub fn invalidate_session(&self, session_id: &str) {
        let needle = format!("{session_id}:");
        let mut map = self.lock();
        let doomed: Vec<String> = map
            .iter()
            .filter(|(k, _)| k.starts_with(&needle))
            .map(|(k, _)| k.clone())
            .collect();
        for key in doomed {
            if let Some(entry) = map.pop(&key) {
                self.note_removed(&entry);
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.entries.store(map.len(), Ordering::Relaxed);
    }

    pub fn invalidate_all(&self) {
        let mut map = self.lock();
        let evicted = map.len() as u64;
        map.clear();
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        self.entries.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }

    /// Lock-free counter snapshot.
    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    fn note_removed(&self, entry: &Entry) {
        let _ = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |b| {
                Some(b.saturating_sub(entry.bytes))
            });
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<String, Entry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clai_protocol::Reason;
    use clai_protocol::Risk;
    use clai_protocol::SuggestionSourceKind;
    use pretty_assertions::assert_eq;

    fn config(capacity: usize) -> L1Config {
        L1Config {
            capacity,
            ttl_ms: 30_000,
            max_bytes: 1024 * 1024,
        }
    }

    fn suggestion(text: &str) -> Suggestion {
        Suggestion {
            text: text.to_string(),
            score: 1.0,
            source: SuggestionSourceKind::Frequency,
            risk: Risk::Safe,
            confidence: 0.8,
            reasons: vec![Reason {
                kind: "frequency".into(),
                description: "used often".into(),
            }],
            description: String::new(),
        }
    }

    #[test]
    fn get_within_ttl_hits_and_after_ttl_misses() {
        let cache = L1Cache::new(&config(8));
        cache.put("s:0:abc".into(), vec![suggestion("ls")], 1_000);
        assert!(cache.get("s:0:abc", 1_000 + 30_000).is_some());
        assert!(cache.get("s:0:abc", 1_000 + 30_001).is_none());
        // The expired entry is gone for good.
        assert_eq!(cache.metrics().entries, 0);
    }

    #[test]
    fn lru_eviction_at_capacity_two() {
        let cache = L1Cache::new(&config(2));
        cache.put("k1".into(), vec![suggestion("a")], 0);
        cache.put("k2".into(), vec![suggestion("b")], 0);
        cache.put("k3".into(), vec![suggestion("c")], 0);
        assert!(cache.get("k1", 1).is_none());
        assert!(cache.get("k2", 1).is_some());
        assert!(cache.get("k3", 1).is_some());
        assert_eq!(cache.metrics().entries, 2);
    }

    #[test]
    fn invalidate_session_removes_exactly_that_prefix() {
        let cache = L1Cache::new(&config(8));
        cache.put("sess-a:0:x".into(), vec![suggestion("a")], 0);
        cache.put("sess-a:1:y".into(), vec![suggestion("b")], 0);
        cache.put("sess-ab:0:z".into(), vec![suggestion("c")], 0);
        cache.invalidate_session("sess-a");
        assert!(cache.get("sess-a:0:x", 1).is_none());
        assert!(cache.get("sess-a:1:y", 1).is_none());
        // `sess-ab` does not share the `sess-a:` prefix.
        assert!(cache.get("sess-ab:0:z", 1).is_some());
    }

    #[test]
    fn evict_to_size_walks_lru_order() {
        let cache = L1Cache::new(&config(16));
        for i in 0..4 {
            cache.put(format!("k{i}"), vec![suggestion(&"x".repeat(100))], 0);
        }
        let before = cache.metrics().bytes;
        cache.evict_to_size(before / 2);
        let m = cache.metrics();
        assert!(m.bytes <= before / 2);
        assert!(m.entries < 4);
        // Newest entry survives.
        assert!(cache.get("k3", 1).is_some());
    }

    #[test]
    fn byte_estimate_matches_formula() {
        let s = suggestion("abcd");
        // 4 text + 9 reason + 24 overhead
        assert_eq!(estimate_bytes(&[s]), 4 + 9 + 24);
    }

    #[test]
    fn prefix_hash_is_16_hex() {
        let h = prefix_hash("/home/x", "/home/x/repo", "main");
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
