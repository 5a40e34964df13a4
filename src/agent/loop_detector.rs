//! Loop and stuck detection for the iteration loop
//!
//! Detects the LLM repeating itself: exact repeats of a tool-call set,
//! recurring tool-name sequences, and the broader no-progress pattern of
//! few tools, mostly failing, with near-identical reasoning text.

use std::collections::{HashSet, VecDeque};

use crate::context::dedup::{canonical_json, hash_key};
use crate::tools::{ToolCall, ToolResult};

/// Exact-repeat window: the newest hash is compared to this many priors.
const EXACT_WINDOW: usize = 3;
/// Sequence window size and required recurrences.
const SEQUENCE_WINDOW: usize = 6;
const SEQUENCE_RECURRENCES: usize = 3;
/// Stuck rubric window and thresholds.
const STUCK_WINDOW: usize = 5;
const STUCK_FAILURE_RATIO: f64 = 0.6;
const STUCK_REPETITION_RATIO: f64 = 2.5;
const STUCK_TEXT_HASHES: usize = 2;
/// Characters of assistant text hashed for the stuck rubric.
const TEXT_PREFIX_CHARS: usize = 200;

/// Per-iteration inputs to the detectors.
#[derive(Debug, Clone)]
pub struct IterationSignature {
    /// `{tool}:{canonical input}` entries for this iteration
    entries: Vec<String>,
    /// Tool names in declared order
    tool_names: Vec<String>,
    failed_calls: u32,
    total_calls: u32,
    text_prefix_hash: u64,
}

impl IterationSignature {
    /// Build the signature for one iteration's calls, results, and
    /// assistant text.
    pub fn build(calls: &[ToolCall], results: &[ToolResult], assistant_text: &str) -> Self {
        let entries: Vec<String> = calls
            .iter()
            .map(|c| format!("{}:{}", c.name, canonical_json(&c.input)))
            .collect();
        let tool_names = calls.iter().map(|c| c.name.clone()).collect();
        let failed_calls = results.iter().filter(|r| !r.success).count() as u32;
        let prefix: String = assistant_text.chars().take(TEXT_PREFIX_CHARS).collect();
        IterationSignature {
            entries,
            tool_names,
            failed_calls,
            total_calls: calls.len() as u32,
            text_prefix_hash: hash_key(&prefix),
        }
    }

    /// Hash of the sorted tool-call set. None for reasoning-only iterations.
    pub fn set_hash(&self) -> Option<u64> {
        if self.entries.is_empty() {
            return None;
        }
        let mut sorted = self.entries.clone();
        sorted.sort_unstable();
        Some(hash_key(&sorted.join("\u{1}")))
    }

    pub fn has_tool_calls(&self) -> bool {
        self.total_calls > 0
    }
}

/// A detected repetition pattern.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopSignal {
    /// The identical tool-call set was issued again within the window.
    ExactRepeat { confidence: f64 },
    /// The same tool-name sequence recurred across iterations.
    SequenceRepeat { confidence: f64, sequence: String },
}

/// Repetition detector over recent iterations.
#[derive(Debug, Default)]
pub struct LoopDetector {
    recent_hashes: VecDeque<u64>,
    sequences: VecDeque<String>,
}

impl LoopDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one iteration and check for repetition. Reasoning-only
    /// iterations are never hashed for exact equality. The exact-repeat
    /// flag fires on the third occurrence of a hash within the window.
    pub fn record(&mut self, signature: &IterationSignature) -> Option<LoopSignal> {
        if let Some(hash) = signature.set_hash() {
            let prior = self.recent_hashes.iter().filter(|h| **h == hash).count();
            self.recent_hashes.push_back(hash);
            while self.recent_hashes.len() > EXACT_WINDOW {
                self.recent_hashes.pop_front();
            }
            if prior >= 2 {
                return Some(LoopSignal::ExactRepeat { confidence: 1.0 });
            }
        }

        if signature.has_tool_calls() {
            let sequence = signature.tool_names.join(",");
            self.sequences.push_back(sequence.clone());
            while self.sequences.len() > SEQUENCE_WINDOW {
                self.sequences.pop_front();
            }
            let recurrences = self.sequences.iter().filter(|s| **s == sequence).count();
            if recurrences >= SEQUENCE_RECURRENCES {
                return Some(LoopSignal::SequenceRepeat {
                    confidence: 0.9,
                    sequence,
                });
            }
        }

        None
    }

    pub fn reset(&mut self) {
        self.recent_hashes.clear();
        self.sequences.clear();
    }
}

/// A detected no-progress pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct StuckSignal {
    pub confidence: f64,
    pub reason: String,
}

/// No-progress detector over the last five iterations.
#[derive(Debug, Default)]
pub struct StuckDetector {
    window: VecDeque<IterationSignature>,
}

impl StuckDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one iteration and evaluate the stuck rubric.
    pub fn record(&mut self, signature: IterationSignature) -> Option<StuckSignal> {
        self.window.push_back(signature);
        while self.window.len() > STUCK_WINDOW {
            self.window.pop_front();
        }
        if self.window.len() < STUCK_WINDOW {
            return None;
        }

        let total_calls: u32 = self.window.iter().map(|s| s.total_calls).sum();
        let failed_calls: u32 = self.window.iter().map(|s| s.failed_calls).sum();
        if total_calls == 0 {
            return None;
        }

        let unique_tools: HashSet<&str> = self
            .window
            .iter()
            .flat_map(|s| s.tool_names.iter().map(|n| n.as_str()))
            .collect();
        let repetition_ratio = total_calls as f64 / unique_tools.len().max(1) as f64;
        let narrow_tools = (1..=2).contains(&unique_tools.len())
            && repetition_ratio > STUCK_REPETITION_RATIO;

        let failure_ratio = failed_calls as f64 / total_calls as f64;
        let mostly_failing = failure_ratio > STUCK_FAILURE_RATIO;

        let text_hashes: HashSet<u64> =
            self.window.iter().map(|s| s.text_prefix_hash).collect();
        let repetitive_text = text_hashes.len() <= STUCK_TEXT_HASHES;

        if narrow_tools && mostly_failing && repetitive_text {
            return Some(StuckSignal {
                confidence: 0.75,
                reason: format!(
                    "{} tool(s) with {:.1}x repetition, {:.0}% failures, {} distinct reasoning prefixes",
                    unique_tools.len(),
                    repetition_ratio,
                    failure_ratio * 100.0,
                    text_hashes.len()
                ),
            });
        }
        None
    }

    /// Forget the current episode (after a recovery attempt).
    pub fn reset(&mut self) {
        self.window.clear();
    }
}
