//! Task classification
//!
//! One small-tier call with a forced classification tool derives the
//! iteration budget for a task. Any failure falls back to the defaults.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent::types::{
    FunctionDefinition, GenerationOptions, Message, ToolChoice, ToolDefinition,
};
use crate::llm::{ChatOptions, LlmHandle};

/// Wire name of the classification tool.
pub const CLASSIFY_TOOL: &str = "classify_task";

/// Budget floor regardless of classification.
pub const MIN_BUDGET: u32 = 4;
/// Budget ceiling regardless of configuration.
pub const MAX_BUDGET: u32 = 20;
/// Defaults when classification fails.
pub const DEFAULT_BUDGET: u32 = 12;

/// Broad shape of the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TaskIntent {
    /// Change something
    Action,
    /// Find something
    Discovery,
    /// Understand something
    Analysis,
}

/// Classification result driving the iteration budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskClassification {
    pub intent: TaskIntent,
    pub budget: u32,
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ClassifyArgs {
    /// Broad intent of the task
    intent: TaskIntent,
    /// Proposed iteration budget
    budget: u32,
}

/// Classifies tasks with a small-tier model.
pub struct TaskClassifier {
    llm: Arc<dyn LlmHandle>,
    /// Configured ceiling; the effective one is min(configured, 20).
    configured_max: u32,
}

impl TaskClassifier {
    pub fn new(llm: Arc<dyn LlmHandle>, configured_max: u32) -> Self {
        TaskClassifier {
            llm,
            configured_max,
        }
    }

    fn clamp(&self, budget: u32) -> u32 {
        let upper = self.configured_max.min(MAX_BUDGET).max(MIN_BUDGET);
        budget.clamp(MIN_BUDGET, upper)
    }

    fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: CLASSIFY_TOOL.to_string(),
                description: "Classify the task and propose an iteration budget".to_string(),
                parameters: serde_json::to_value(schemars::schema_for!(ClassifyArgs))
                    .unwrap_or_else(|_| serde_json::json!({})),
            },
        }
    }

    /// Classify a goal. Never fails: any error or malformed reply yields
    /// the defaults.
    pub async fn classify(&self, goal: &str) -> TaskClassification {
        let fallback = TaskClassification {
            intent: TaskIntent::Action,
            budget: self.clamp(DEFAULT_BUDGET),
        };

        let messages = vec![
            Message::system(
                "Classify the user's task for an autonomous agent. Call classify_task exactly once.",
            ),
            Message::user(goal),
        ];
        let options = ChatOptions {
            tools: vec![self.tool_definition()],
            tool_choice: Some(ToolChoice::required(CLASSIFY_TOOL)),
            generation: GenerationOptions::precise(),
        };

        let reply = match self.llm.chat_with_tools(messages, options).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("task classification failed, using defaults: {}", e);
                return fallback;
            }
        };

        let Some(call) = reply.tool_calls.iter().find(|c| c.function.name == CLASSIFY_TOOL)
        else {
            warn!("classifier returned no classify_task call, using defaults");
            return fallback;
        };

        match serde_json::from_str::<ClassifyArgs>(&call.function.arguments) {
            Ok(args) => TaskClassification {
                intent: args.intent,
                budget: self.clamp(args.budget),
            },
            Err(e) => {
                warn!("classifier arguments malformed, using defaults: {}", e);
                fallback
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::AssistantToolCall;
    use crate::llm::{Completion, CompletionOptions, LlmReply, Usage};
    use async_trait::async_trait;

    struct ScriptedReply {
        arguments: Option<String>,
    }

    #[async_trait]
    impl LlmHandle for ScriptedReply {
        async fn chat_with_tools(
            &self,
            _messages: Vec<Message>,
            _options: ChatOptions,
        ) -> crate::error::Result<LlmReply> {
            let tool_calls = match &self.arguments {
                Some(args) => vec![AssistantToolCall::function("c1", CLASSIFY_TOOL, args.clone())],
                None => vec![],
            };
            Ok(LlmReply {
                content: String::new(),
                tool_calls,
                usage: Usage::default(),
                model: "small".into(),
            })
        }
        async fn complete(
            &self,
            _prompt: &str,
            _options: CompletionOptions,
        ) -> crate::error::Result<Completion> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn clamps_budget_into_range() {
        let classifier = TaskClassifier::new(
            Arc::new(ScriptedReply {
                arguments: Some(r#"{"intent": "discovery", "budget": 99}"#.into()),
            }),
            16,
        );
        let result = classifier.classify("find the config").await;
        assert_eq!(result.intent, TaskIntent::Discovery);
        assert_eq!(result.budget, 16);

        let classifier = TaskClassifier::new(
            Arc::new(ScriptedReply {
                arguments: Some(r#"{"intent": "analysis", "budget": 1}"#.into()),
            }),
            16,
        );
        assert_eq!(classifier.classify("why").await.budget, MIN_BUDGET);
    }

    #[tokio::test]
    async fn defaults_on_missing_call() {
        let classifier = TaskClassifier::new(Arc::new(ScriptedReply { arguments: None }), 20);
        let result = classifier.classify("do the thing").await;
        assert_eq!(result.intent, TaskIntent::Action);
        assert_eq!(result.budget, DEFAULT_BUDGET);
    }

    #[tokio::test]
    async fn defaults_on_malformed_arguments() {
        let classifier = TaskClassifier::new(
            Arc::new(ScriptedReply {
                arguments: Some("not json".into()),
            }),
            20,
        );
        assert_eq!(classifier.classify("x").await.budget, DEFAULT_BUDGET);
    }
}
