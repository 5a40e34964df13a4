//! Tool-call deduplication cache and repeated-set signature tracking
//!
//! Uses moka async cache (Send + Sync, TTL-based eviction). Keys are
//! `(tool name, canonicalized input JSON)` so argument ordering does not
//! defeat deduplication.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;

/// Canonicalize a JSON value: object keys sorted recursively, compact form.
pub fn canonical_json(value: &Value) -> String {
    fn normalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let sorted: BTreeMap<String, Value> = map
                    .iter()
                    .map(|(k, v)| (k.clone(), normalize(v)))
                    .collect();
                // BTreeMap iteration order is sorted; rebuild preserves it.
                Value::Object(sorted.into_iter().collect())
            }
            Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
            other => other.clone(),
        }
    }
    normalize(value).to_string()
}

/// Hash a string to u64 for compact signature storage.
pub fn hash_key(s: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    s.hash(&mut hasher);
    hasher.finish()
}

/// A previously observed tool result.
#[derive(Debug, Clone)]
pub struct CachedToolResult {
    pub output: String,
    /// Iteration the result was first observed in
    pub iteration: u32,
}

/// Per-task tool-result cache. Hits short-circuit execution and return the
/// prior output annotated with the observing iteration.
#[derive(Clone)]
pub struct ToolCallCache {
    entries: Cache<String, CachedToolResult>,
}

impl ToolCallCache {
    pub fn new(ttl: Duration) -> Self {
        ToolCallCache {
            entries: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    fn key(name: &str, input: &Value) -> String {
        format!("{}\u{1}{}", name, canonical_json(input))
    }

    pub async fn lookup(&self, name: &str, input: &Value) -> Option<CachedToolResult> {
        self.entries.get(&Self::key(name, input)).await
    }

    pub async fn insert(&self, name: &str, input: &Value, output: String, iteration: u32) {
        self.entries
            .insert(Self::key(name, input), CachedToolResult { output, iteration })
            .await;
    }
}

impl Default for ToolCallCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

/// Coarse cross-iteration loop signal: the identical tool-call set repeated
/// three iterations in a row. Observational only — the fine-grained
/// `LoopDetector` is authoritative for terminating the loop.
#[derive(Debug, Default)]
pub struct SignatureTracker {
    last: Option<u64>,
    run_length: u32,
}

impl SignatureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the signature of one iteration's tool-call set. Returns true
    /// when the same set has now been seen 3 consecutive times.
    pub fn record(&mut self, signature: u64) -> bool {
        if self.last == Some(signature) {
            self.run_length += 1;
        } else {
            self.last = Some(signature);
            self.run_length = 1;
        }
        self.run_length >= 3
    }

    pub fn reset(&mut self) {
        self.last = None;
        self.run_length = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"d": 2, "c": 3}});
        let b = json!({"a": {"c": 3, "d": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(canonical_json(&a), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[tokio::test]
    async fn cache_round_trips_by_canonical_key() {
        let cache = ToolCallCache::new(Duration::from_secs(60));
        let input = json!({"path": "a.txt", "limit": 5});
        assert!(cache.lookup("fs:read", &input).await.is_none());

        cache.insert("fs:read", &input, "contents".into(), 2).await;

        // Same arguments, different key ordering
        let reordered = json!({"limit": 5, "path": "a.txt"});
        let hit = cache.lookup("fs:read", &reordered).await.unwrap();
        assert_eq!(hit.output, "contents");
        assert_eq!(hit.iteration, 2);

        // Different tool, same arguments: miss
        assert!(cache.lookup("fs:list", &input).await.is_none());
    }

    #[test]
    fn signature_tracker_fires_on_third_repeat() {
        let mut tracker = SignatureTracker::new();
        assert!(!tracker.record(7));
        assert!(!tracker.record(7));
        assert!(tracker.record(7));

        tracker.reset();
        assert!(!tracker.record(7));
        assert!(!tracker.record(8));
        assert!(!tracker.record(7));
    }
}
