//! Context projection for LLM calls
//!
//! Keeps the full message history intact while bounding what is actually
//! sent to the model: single-result truncation, a sliding window over the
//! tail of the conversation, and a dedup cache for repeated tool calls.

pub mod dedup;

pub use dedup::{canonical_json, hash_key, CachedToolResult, SignatureTracker, ToolCallCache};

use std::sync::{Arc, Mutex, RwLock};

use crate::agent::types::{Message, Role};
use crate::config::ContextConfig;

/// Prefix marking injected memory summaries; projection always keeps them.
pub const SUMMARY_MARKER: &str = "[memory]";

/// Truncate a single tool-result payload, appending the original length and
/// a retrieval hint.
pub fn truncate_output(s: &str, max_len: usize) -> String {
    let total = s.chars().count();
    if total <= max_len {
        return s.to_string();
    }
    let prefix: String = s.chars().take(max_len).collect();
    format!(
        "{}\n[truncated: {} chars total; narrow the request and re-run the tool to retrieve more]",
        prefix, total
    )
}

/// Shared, insertion-ordered message history.
///
/// Appends are atomic; `snapshot` returns a deep copy unaffected by later
/// appends, so the summarizer never observes a partially-updated history.
#[derive(Clone, Default)]
pub struct History {
    inner: Arc<RwLock<Vec<Message>>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, message: Message) {
        self.inner.write().expect("history lock poisoned").push(message);
    }

    pub fn append_all(&self, messages: Vec<Message>) {
        self.inner
            .write()
            .expect("history lock poisoned")
            .extend(messages);
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("history lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deep copy of the history at this instant.
    pub fn snapshot(&self) -> Vec<Message> {
        self.inner.read().expect("history lock poisoned").clone()
    }
}

/// Projects the message history for LLM calls and owns the per-task
/// tool-result dedup structures.
pub struct ContextFilter {
    config: ContextConfig,
    history: History,
    cache: ToolCallCache,
    signatures: Mutex<SignatureTracker>,
}

impl ContextFilter {
    pub fn new(config: ContextConfig) -> Self {
        let cache = ToolCallCache::new(config.dedup_ttl);
        ContextFilter {
            config,
            history: History::new(),
            cache,
            signatures: Mutex::new(SignatureTracker::new()),
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn cache(&self) -> &ToolCallCache {
        &self.cache
    }

    pub fn max_output_length(&self) -> usize {
        self.config.max_output_length
    }

    /// Truncate a tool result per the configured limit.
    pub fn truncate(&self, s: &str) -> String {
        truncate_output(s, self.config.max_output_length)
    }

    /// Deep snapshot of the history (see [`History::snapshot`]).
    pub fn get_history_snapshot(&self) -> Vec<Message> {
        self.history.snapshot()
    }

    /// Record one iteration's tool-call-set signature. Returns true when
    /// the identical set has recurred 3 iterations in a row. Observational
    /// only; the `LoopDetector` is authoritative.
    pub fn record_signature(&self, signature: u64) -> bool {
        self.signatures
            .lock()
            .expect("signature lock poisoned")
            .record(signature)
    }

    /// Project the history for an LLM call: system prompt + initial task +
    /// injected summaries + the last `sliding_window_size` messages.
    ///
    /// Returns the projected messages and the number trimmed away.
    pub fn project(&self) -> (Vec<Message>, usize) {
        let messages = self.history.snapshot();
        let window = self.config.sliding_window_size;

        // Head: the leading system run plus the first user message (the task).
        let mut head_end = 0;
        while head_end < messages.len() && messages[head_end].role == Role::System {
            head_end += 1;
        }
        if head_end < messages.len() && messages[head_end].role == Role::User {
            head_end += 1;
        }

        if messages.len() <= head_end + window {
            return (messages, 0);
        }

        let tail_start = messages.len() - window;
        let mut projected: Vec<Message> = messages[..head_end].to_vec();
        let mut trimmed = 0;
        for message in &messages[head_end..tail_start] {
            if message.role == Role::System && message.content.starts_with(SUMMARY_MARKER) {
                projected.push(message.clone());
            } else {
                trimmed += 1;
            }
        }
        projected.extend_from_slice(&messages[tail_start..]);
        (projected, trimmed)
    }
}
