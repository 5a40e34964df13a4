//! LLM handle abstraction and tier routing
//!
//! The HTTP client is injected by the embedder; the runtime only sees the
//! `LlmHandle` trait. The `LlmRouter` keys handles by capability tier and
//! owns the tier table for ancillary calls (classification, reflection,
//! summarization, validation).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::agent::types::{GenerationOptions, Message, ToolChoice, ToolDefinition};
use crate::error::{Error, Result};

/// Coarse capability/cost level of a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Small,
    Medium,
    Large,
}

impl Tier {
    /// The next tier up the escalation ladder, if any.
    pub fn next(self) -> Option<Tier> {
        match self {
            Tier::Small => Some(Tier::Medium),
            Tier::Medium => Some(Tier::Large),
            Tier::Large => None,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Small => write!(f, "small"),
            Tier::Medium => write!(f, "medium"),
            Tier::Large => write!(f, "large"),
        }
    }
}

/// Ancillary call sites with their own tier defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AncillaryNode {
    Classification,
    Summarization,
    Reflection,
    Validation,
}

/// Tier used for an ancillary call given the task's current tier.
pub fn ancillary_tier(node: AncillaryNode, current: Tier) -> Tier {
    match node {
        AncillaryNode::Classification | AncillaryNode::Summarization => Tier::Small,
        AncillaryNode::Reflection => Tier::Medium,
        AncillaryNode::Validation => current,
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Tokens in the prompt
    pub prompt_tokens: u64,
    /// Tokens in the completion
    pub completion_tokens: u64,
}

impl Usage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }

    /// Sum another usage record into this one.
    pub fn accumulate(&mut self, delta: &Usage) {
        self.prompt_tokens += delta.prompt_tokens;
        self.completion_tokens += delta.completion_tokens;
    }
}

/// Options for a tool-calling chat request.
#[derive(Debug, Clone, Default)]
pub struct ChatOptions {
    /// Tool schemas offered this call (empty = no tools)
    pub tools: Vec<ToolDefinition>,
    /// Optional forced tool choice
    pub tool_choice: Option<ToolChoice>,
    /// Temperature / max-tokens settings
    pub generation: GenerationOptions,
}

/// Options for a plain completion request.
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub generation: GenerationOptions,
    /// Optional system prompt prepended to the completion
    pub system_prompt: Option<String>,
}

/// One reply from a tool-calling chat request.
#[derive(Debug, Clone)]
pub struct LlmReply {
    /// Assistant text content (may be empty when tool calls are present)
    pub content: String,
    /// Tool calls requested by the model, in declared order
    pub tool_calls: Vec<crate::agent::types::AssistantToolCall>,
    pub usage: Usage,
    /// Model identifier reported by the backend
    pub model: String,
}

/// One reply from a plain completion request.
#[derive(Debug, Clone)]
pub struct Completion {
    pub content: String,
    pub usage: Usage,
}

/// Injected LLM backend for a single tier.
#[async_trait]
pub trait LlmHandle: Send + Sync {
    /// Chat with tool schemas; returns content and/or tool calls.
    async fn chat_with_tools(&self, messages: Vec<Message>, options: ChatOptions)
        -> Result<LlmReply>;

    /// Plain completion of a prompt.
    async fn complete(&self, prompt: &str, options: CompletionOptions) -> Result<Completion>;
}

/// Tier-keyed registry of LLM handles.
#[derive(Clone)]
pub struct LlmRouter {
    handles: HashMap<Tier, Arc<dyn LlmHandle>>,
}

impl LlmRouter {
    pub fn new() -> Self {
        LlmRouter {
            handles: HashMap::new(),
        }
    }

    /// Use one handle for every tier (single-model deployments, tests).
    pub fn uniform(handle: Arc<dyn LlmHandle>) -> Self {
        let mut router = Self::new();
        for tier in [Tier::Small, Tier::Medium, Tier::Large] {
            router.handles.insert(tier, handle.clone());
        }
        router
    }

    /// Register the handle for a tier, replacing any previous one.
    pub fn insert(&mut self, tier: Tier, handle: Arc<dyn LlmHandle>) {
        self.handles.insert(tier, handle);
    }

    /// Get the handle for a tier.
    pub fn handle(&self, tier: Tier) -> Result<Arc<dyn LlmHandle>> {
        self.handles
            .get(&tier)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no LLM handle registered for tier {}", tier)))
    }

    /// Handle for an ancillary call site.
    pub fn ancillary(&self, node: AncillaryNode, current: Tier) -> Result<Arc<dyn LlmHandle>> {
        self.handle(ancillary_tier(node, current))
    }
}

impl Default for LlmRouter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_ladder_is_bounded() {
        assert_eq!(Tier::Small.next(), Some(Tier::Medium));
        assert_eq!(Tier::Medium.next(), Some(Tier::Large));
        assert_eq!(Tier::Large.next(), None);
    }

    #[test]
    fn ancillary_table_matches_policy() {
        assert_eq!(
            ancillary_tier(AncillaryNode::Classification, Tier::Large),
            Tier::Small
        );
        assert_eq!(
            ancillary_tier(AncillaryNode::Summarization, Tier::Medium),
            Tier::Small
        );
        assert_eq!(
            ancillary_tier(AncillaryNode::Reflection, Tier::Small),
            Tier::Medium
        );
        assert_eq!(
            ancillary_tier(AncillaryNode::Validation, Tier::Medium),
            Tier::Medium
        );
    }

    #[test]
    fn usage_accumulates() {
        let mut total = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
        total.accumulate(&Usage {
            prompt_tokens: 20,
            completion_tokens: 10,
        });
        assert_eq!(total.prompt_tokens, 30);
        assert_eq!(total.completion_tokens, 15);
        assert_eq!(total.total(), 45);
    }
}
