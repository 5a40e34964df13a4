//! Working memory: the fact sheet kept in every LLM prompt
//!
//! Facts are compact categorized sentences derived from tool output or
//! model reasoning. The sheet is bounded by entry count and by an
//! estimated-token budget; adds are idempotent by semantic key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Category of a fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactCategory {
    FileContent,
    Architecture,
    Finding,
    Decision,
    Blocker,
    Correction,
    ToolResult,
    Environment,
}

impl std::fmt::Display for FactCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FactCategory::FileContent => "file_content",
            FactCategory::Architecture => "architecture",
            FactCategory::Finding => "finding",
            FactCategory::Decision => "decision",
            FactCategory::Blocker => "blocker",
            FactCategory::Correction => "correction",
            FactCategory::ToolResult => "tool_result",
            FactCategory::Environment => "environment",
        };
        write!(f, "{}", s)
    }
}

impl FactCategory {
    /// Parse a category name; unknown names fall back to `Finding`.
    pub fn parse(s: &str) -> FactCategory {
        match s.trim().to_lowercase().as_str() {
            "file_content" => FactCategory::FileContent,
            "architecture" => FactCategory::Architecture,
            "decision" => FactCategory::Decision,
            "blocker" => FactCategory::Blocker,
            "correction" => FactCategory::Correction,
            "tool_result" => FactCategory::ToolResult,
            "environment" => FactCategory::Environment,
            _ => FactCategory::Finding,
        }
    }
}

/// One entry in the fact sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub category: FactCategory,
    pub text: String,
    /// In [0, 1]
    pub confidence: f64,
    /// Tool name or "agent_reasoning"
    pub source: String,
    /// Iteration the fact was derived in
    pub iteration: u32,
    pub created_at: DateTime<Utc>,
}

impl Fact {
    pub fn new(
        category: FactCategory,
        text: impl Into<String>,
        confidence: f64,
        source: impl Into<String>,
        iteration: u32,
    ) -> Self {
        Fact {
            id: format!("fact-{}", Uuid::new_v4().simple()),
            category,
            text: text.into(),
            confidence: confidence.clamp(0.0, 1.0),
            source: source.into(),
            iteration,
            created_at: Utc::now(),
        }
    }
}

/// Estimate tokens as chars/4 plus a small per-entry overhead.
pub fn estimate_tokens(s: &str) -> usize {
    s.chars().count() / 4 + 10
}

/// What happened on an add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    /// Merged into an existing entry with the same semantic key.
    Merged,
}

/// The bounded fact sheet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactSheet {
    facts: Vec<Fact>,
    max_entries: usize,
    max_tokens_estimate: usize,
}

impl FactSheet {
    pub fn new(max_entries: usize, max_tokens_estimate: usize) -> Self {
        FactSheet {
            facts: Vec::new(),
            max_entries,
            max_tokens_estimate,
        }
    }

    /// Semantic key: category plus the normalized text prefix.
    fn semantic_key(category: FactCategory, text: &str) -> String {
        let normalized: String = text
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        let prefix: String = normalized.chars().take(80).collect();
        format!("{}:{}", category, prefix)
    }

    /// Add a fact. Duplicate adds (same semantic key) merge by taking the
    /// higher confidence and the later iteration. Returns the outcome and
    /// any facts evicted to stay within bounds.
    pub fn add(&mut self, fact: Fact) -> (AddOutcome, Vec<Fact>) {
        let key = Self::semantic_key(fact.category, &fact.text);
        if let Some(existing) = self
            .facts
            .iter_mut()
            .find(|f| Self::semantic_key(f.category, &f.text) == key)
        {
            existing.confidence = existing.confidence.max(fact.confidence);
            existing.iteration = existing.iteration.max(fact.iteration);
            return (AddOutcome::Merged, Vec::new());
        }

        self.facts.push(fact);
        let evicted = self.evict_to_bounds();
        (AddOutcome::Added, evicted)
    }

    /// Evict lowest-confidence-then-oldest entries until within bounds.
    fn evict_to_bounds(&mut self) -> Vec<Fact> {
        let mut evicted = Vec::new();
        while self.facts.len() > self.max_entries
            || self.estimated_tokens() > self.max_tokens_estimate
        {
            let victim = self
                .facts
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| {
                    a.confidence
                        .partial_cmp(&b.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.created_at.cmp(&b.created_at))
                })
                .map(|(idx, _)| idx);
            match victim {
                Some(idx) => evicted.push(self.facts.remove(idx)),
                None => break,
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    pub fn max_tokens_estimate(&self) -> usize {
        self.max_tokens_estimate
    }

    /// Estimated token footprint of the whole sheet.
    pub fn estimated_tokens(&self) -> usize {
        self.facts.iter().map(|f| estimate_tokens(&f.text)).sum()
    }

    pub fn facts(&self) -> &[Fact] {
        &self.facts
    }

    /// Render for prompt injection: one line per fact.
    pub fn render(&self) -> String {
        self.facts
            .iter()
            .map(|f| format!("- [{}] {} (confidence {:.2})", f.category, f.text, f.confidence))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(text: &str, confidence: f64, iteration: u32) -> Fact {
        Fact::new(FactCategory::Finding, text, confidence, "fs:search", iteration)
    }

    #[test]
    fn re_add_merges_and_keeps_count() {
        let mut sheet = FactSheet::new(10, 10_000);
        sheet.add(fact("config lives in src/config.rs", 0.6, 1));
        let (outcome, evicted) = sheet.add(fact("Config lives in  src/config.rs", 0.9, 3));

        assert_eq!(outcome, AddOutcome::Merged);
        assert!(evicted.is_empty());
        assert_eq!(sheet.len(), 1);
        assert!((sheet.facts()[0].confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(sheet.facts()[0].iteration, 3);
    }

    #[test]
    fn evicts_lowest_confidence_then_oldest() {
        let mut sheet = FactSheet::new(2, 10_000);
        sheet.add(fact("alpha", 0.9, 1));
        sheet.add(fact("beta", 0.2, 2));
        let (_, evicted) = sheet.add(fact("gamma", 0.8, 3));

        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].text, "beta");
        assert_eq!(sheet.len(), 2);
    }

    #[test]
    fn token_bound_is_enforced() {
        let mut sheet = FactSheet::new(100, 60);
        sheet.add(fact(&"a".repeat(100), 0.5, 1));
        let (_, evicted) = sheet.add(fact(&"b".repeat(100), 0.9, 2));

        assert_eq!(evicted.len(), 1);
        assert!(sheet.estimated_tokens() <= 60);
    }

    #[test]
    fn confidence_is_clamped() {
        let f = Fact::new(FactCategory::Decision, "x", 1.7, "agent_reasoning", 1);
        assert!((f.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn category_parse_defaults_to_finding() {
        assert_eq!(FactCategory::parse("environment"), FactCategory::Environment);
        assert_eq!(FactCategory::parse("unknown-thing"), FactCategory::Finding);
    }
}
