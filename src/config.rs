//! Runtime configuration
//!
//! Serde-backed configuration with layered loading: built-in defaults,
//! then an optional `kbagent.toml`, then `KBAGENT_*` environment overrides.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Top-level runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    /// Iteration-loop limits and generation settings.
    #[serde(default)]
    pub agent: AgentLoopConfig,
    /// Token budget policy.
    #[serde(default)]
    pub tokens: TokenBudgetConfig,
    /// Context projection and dedup-cache settings.
    #[serde(default)]
    pub context: ContextConfig,
    /// FactSheet and archive bounds.
    #[serde(default)]
    pub memory: MemoryConfig,
    /// Async summarizer settings.
    #[serde(default)]
    pub summarizer: SummarizerConfig,
    /// Orchestrator retry/adaptation settings.
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

/// Limits and generation settings for the iteration loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLoopConfig {
    /// Global ceiling on the iteration budget (classifier output is capped here).
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    /// Iteration budget used when classification fails.
    #[serde(default = "default_iteration_budget")]
    pub default_budget: u32,
    /// Whether tier escalation is allowed when a tier fails.
    #[serde(default = "default_true")]
    pub enable_escalation: bool,
    /// Sampling temperature for main-loop LLM calls.
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Max completion tokens per main-loop LLM call.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    /// Below this fraction of remaining iterations, expensive search tools
    /// are excluded from the offered tool set.
    #[serde(default = "default_prune_ratio")]
    pub expensive_tool_prune_ratio: f64,
}

impl Default for AgentLoopConfig {
    fn default() -> Self {
        AgentLoopConfig {
            max_iterations: default_max_iterations(),
            default_budget: default_iteration_budget(),
            enable_escalation: true,
            temperature: default_temperature(),
            max_tokens: None,
            expensive_tool_prune_ratio: default_prune_ratio(),
        }
    }
}

/// Token budget policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBudgetConfig {
    /// Whether the token budget is enforced at all.
    #[serde(default = "default_true")]
    pub active: bool,
    /// Total token allowance for a task.
    #[serde(default = "default_tokens_max")]
    pub tokens_max: u64,
    /// Fraction of `tokens_max` at which a convergence nudge is injected.
    #[serde(default = "default_soft_ratio")]
    pub soft_limit_ratio: f64,
    /// Fraction of `tokens_max` at which synthesis is forced.
    #[serde(default = "default_hard_ratio")]
    pub hard_limit_ratio: f64,
    /// If true, exceeding the hard limit stops the task even when synthesis fails.
    #[serde(default = "default_true")]
    pub hard_stop: bool,
    /// If true, the hard limit triggers a forced-synthesis call.
    #[serde(default = "default_true")]
    pub force_synthesis_on_hard_limit: bool,
    /// If true, expensive search tools are withheld past the soft limit.
    #[serde(default = "default_true")]
    pub restrict_broad_exploration_at_soft_limit: bool,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        TokenBudgetConfig {
            active: true,
            tokens_max: default_tokens_max(),
            soft_limit_ratio: default_soft_ratio(),
            hard_limit_ratio: default_hard_ratio(),
            hard_stop: true,
            force_synthesis_on_hard_limit: true,
            restrict_broad_exploration_at_soft_limit: true,
        }
    }
}

/// Context projection and tool-result handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Single tool-result messages beyond this length are truncated.
    #[serde(default = "default_max_output_length")]
    pub max_output_length: usize,
    /// How many trailing messages the sliding window keeps.
    #[serde(default = "default_sliding_window")]
    pub sliding_window_size: usize,
    /// TTL for the tool-call dedup cache.
    #[serde(with = "humantime_serde", default = "default_dedup_ttl")]
    pub dedup_ttl: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            max_output_length: default_max_output_length(),
            sliding_window_size: default_sliding_window(),
            dedup_ttl: default_dedup_ttl(),
        }
    }
}

/// Bounds for the fact sheet and archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of facts kept in the working fact sheet.
    #[serde(default = "default_fact_entries")]
    pub max_entries: usize,
    /// Estimated-token budget for the fact sheet.
    #[serde(default = "default_fact_tokens")]
    pub max_tokens_estimate: usize,
    /// Maximum entries retained by the archive before FIFO eviction.
    #[serde(default = "default_archive_entries")]
    pub archive_max_entries: usize,
    /// Maximum total characters retained by the archive.
    #[serde(default = "default_archive_chars")]
    pub archive_max_total_chars: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            max_entries: default_fact_entries(),
            max_tokens_estimate: default_fact_tokens(),
            archive_max_entries: default_archive_entries(),
            archive_max_total_chars: default_archive_chars(),
        }
    }
}

/// Async summarizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// LLM-based fact extraction runs every this many iterations.
    #[serde(default = "default_summarization_interval")]
    pub interval: u32,
    /// Bound of the summarization task queue.
    #[serde(default = "default_queue_bound")]
    pub queue_bound: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        SummarizerConfig {
            interval: default_summarization_interval(),
            queue_bound: default_queue_bound(),
        }
    }
}

/// Orchestrator retry and adaptation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Retries per tier before walking the escalation ladder.
    #[serde(default = "default_retries_per_tier")]
    pub max_retries_per_tier: u32,
    /// Minimum confidence for acting on an adaptation proposal.
    #[serde(default = "default_decision_confidence")]
    pub adaptation_confidence: f64,
    /// Minimum confidence for acting on early-stop/cancel decisions.
    #[serde(default = "default_decision_confidence")]
    pub decision_confidence: f64,
    /// Subtask failures at or above this priority abort the remaining plan.
    #[serde(default = "default_abort_priority")]
    pub abort_priority: u8,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            max_retries_per_tier: default_retries_per_tier(),
            adaptation_confidence: default_decision_confidence(),
            decision_confidence: default_decision_confidence(),
            abort_priority: default_abort_priority(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_iterations() -> u32 {
    20
}
fn default_iteration_budget() -> u32 {
    12
}
fn default_temperature() -> f32 {
    0.5
}
fn default_prune_ratio() -> f64 {
    0.25
}
fn default_tokens_max() -> u64 {
    200_000
}
fn default_soft_ratio() -> f64 {
    0.75
}
fn default_hard_ratio() -> f64 {
    0.95
}
fn default_max_output_length() -> usize {
    500
}
fn default_sliding_window() -> usize {
    20
}
fn default_dedup_ttl() -> Duration {
    Duration::from_secs(60)
}
fn default_fact_entries() -> usize {
    64
}
fn default_fact_tokens() -> usize {
    2_000
}
fn default_archive_entries() -> usize {
    512
}
fn default_archive_chars() -> usize {
    262_144
}
fn default_summarization_interval() -> u32 {
    3
}
fn default_queue_bound() -> usize {
    16
}
fn default_retries_per_tier() -> u32 {
    2
}
fn default_decision_confidence() -> f64 {
    0.7
}
fn default_abort_priority() -> u8 {
    8
}

/// Load configuration: defaults, then `kbagent.toml` if present, then
/// `KBAGENT_*` environment variables (e.g. `KBAGENT_AGENT__MAX_ITERATIONS`).
pub fn load_config(dir: &Path) -> Result<RuntimeConfig> {
    dotenvy::dotenv().ok();

    let file = dir.join("kbagent.toml");
    let mut builder = config::Config::builder();
    if file.is_file() {
        builder = builder.add_source(config::File::from(file));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix("KBAGENT")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let cfg = settings.try_deserialize::<RuntimeConfig>()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.agent.default_budget, 12);
        assert_eq!(cfg.agent.max_iterations, 20);
        assert!((cfg.tokens.soft_limit_ratio - 0.75).abs() < f64::EPSILON);
        assert!((cfg.tokens.hard_limit_ratio - 0.95).abs() < f64::EPSILON);
        assert_eq!(cfg.context.max_output_length, 500);
        assert_eq!(cfg.context.dedup_ttl, Duration::from_secs(60));
        assert_eq!(cfg.summarizer.interval, 3);
        assert_eq!(cfg.summarizer.queue_bound, 16);
        assert_eq!(cfg.orchestrator.max_retries_per_tier, 2);
        assert_eq!(cfg.orchestrator.abort_priority, 8);
    }

    #[test]
    fn loads_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.agent.default_budget, 12);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("kbagent.toml"),
            "[agent]\nmax_iterations = 8\n",
        )
        .unwrap();
        let cfg = load_config(dir.path()).unwrap();
        assert_eq!(cfg.agent.max_iterations, 8);
        assert_eq!(cfg.agent.default_budget, 12);
    }
}
