//! Plan creation and adaptation
//!
//! Planning forces a `create_execution_plan` tool call on a large-tier
//! model and validates the extracted plan (DAG closure, priorities,
//! recognized specialists, quality rubric with a single redraft).
//! Adaptation offers `revise_execution_plan` without forcing it.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::agent::types::{
    FunctionDefinition, GenerationOptions, Message, ToolChoice, ToolDefinition,
};
use crate::error::{Error, Result};
use crate::llm::{ChatOptions, LlmHandle};
use crate::verifier::assess_plan;

use super::types::{ExecutionPlan, Finding, Subtask};

/// Wire name of the planning tool.
pub const PLAN_TOOL: &str = "create_execution_plan";
/// Wire name of the adaptation tool.
pub const REVISE_TOOL: &str = "revise_execution_plan";

#[derive(Debug, Deserialize)]
struct PlanArgs {
    subtasks: Vec<Subtask>,
}

#[derive(Debug, Deserialize)]
struct ReviseArgs {
    action: String,
    #[serde(default)]
    subtasks: Vec<Subtask>,
    #[serde(default)]
    confidence: f64,
}

fn plan_tool_definition(specialists: &[&str]) -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: PLAN_TOOL.to_string(),
            description: "Create the execution plan: an ordered list of subtasks for specialists"
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "subtasks": {
                        "type": "array",
                        "minItems": 1,
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string", "pattern": "^subtask-[0-9]+$"},
                                "description": {"type": "string"},
                                "specialist_id": {"type": "string", "enum": specialists},
                                "dependencies": {"type": "array", "items": {"type": "string"}},
                                "priority": {"type": "integer", "minimum": 1, "maximum": 10},
                                "estimated_complexity": {"type": "string", "enum": ["low", "medium", "high"]},
                                "expected_outcome": {"type": "string"}
                            },
                            "required": ["id", "description", "specialist_id", "priority", "estimated_complexity"]
                        }
                    }
                },
                "required": ["subtasks"]
            }),
        },
    }
}

fn revise_tool_definition() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: REVISE_TOOL.to_string(),
            description: "Revise the execution plan in response to findings. \
                          Use action \"add\" to inject follow-up subtasks, \"none\" to leave the plan unchanged."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "enum": ["add", "none"]},
                    "subtasks": {"type": "array", "items": {"type": "object"}},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                },
                "required": ["action", "confidence"]
            }),
        },
    }
}

/// Plan creation against one LLM handle.
pub struct Planner {
    llm: Arc<dyn LlmHandle>,
}

impl Planner {
    pub fn new(llm: Arc<dyn LlmHandle>) -> Self {
        Planner { llm }
    }

    /// Create and validate a plan for `goal`. One redraft is allowed when
    /// the quality rubric permits it.
    pub async fn create_plan(&self, goal: &str, specialists: &[&str]) -> Result<ExecutionPlan> {
        let mut feedback: Option<String> = None;

        for attempt in 0..2 {
            let plan = self.draft_plan(goal, specialists, feedback.as_deref()).await?;
            plan.validate(specialists.iter().copied())?;

            let quality = assess_plan(&plan, goal);
            if quality.is_acceptable() {
                info!(
                    "plan accepted on attempt {} (score {:.2}, {} subtasks)",
                    attempt + 1,
                    quality.score,
                    plan.subtasks.len()
                );
                return Ok(plan);
            }
            if attempt == 0 && quality.retry_allowed {
                warn!("plan draft rejected, redrafting: {:?}", quality.severe_issues);
                feedback = Some(format!(
                    "The previous draft had these problems: {}. Produce a corrected plan.",
                    quality.severe_issues.join("; ")
                ));
                continue;
            }
            return Err(Error::PlanFailed(format!(
                "plan rejected: {}",
                quality.severe_issues.join("; ")
            )));
        }
        unreachable!("redraft loop returns on every path")
    }

    async fn draft_plan(
        &self,
        goal: &str,
        specialists: &[&str],
        feedback: Option<&str>,
    ) -> Result<ExecutionPlan> {
        let mut messages = vec![
            Message::system(format!(
                "You are the planning component of an agent orchestrator. Decompose the task \
                 into subtasks for these specialists: {}. Call {} exactly once. Every subtask \
                 needs a concrete description and an expected_outcome.",
                specialists.join(", "),
                PLAN_TOOL
            )),
            Message::user(goal),
        ];
        if let Some(feedback) = feedback {
            messages.push(Message::user(feedback));
        }

        let reply = self
            .llm
            .chat_with_tools(
                messages,
                ChatOptions {
                    tools: vec![plan_tool_definition(specialists)],
                    tool_choice: Some(ToolChoice::required(PLAN_TOOL)),
                    generation: GenerationOptions::precise(),
                },
            )
            .await?;

        let call = reply
            .tool_calls
            .iter()
            .find(|c| c.function.name == PLAN_TOOL)
            .ok_or_else(|| Error::PlanFailed("model did not call create_execution_plan".into()))?;

        let args: PlanArgs = serde_json::from_str(&call.function.arguments)
            .map_err(|e| Error::PlanFailed(format!("plan arguments malformed: {}", e)))?;
        Ok(ExecutionPlan {
            subtasks: args.subtasks,
        })
    }

    /// Offer the adaptation tool after actionable findings. Returns the
    /// subtasks to inject (dependencies rewritten to the current subtask)
    /// when the model calls it with `action="add"` and enough confidence.
    pub async fn propose_adaptation(
        &self,
        current: &Subtask,
        findings: &[Finding],
        confidence_threshold: f64,
    ) -> Option<Vec<Subtask>> {
        let findings_text: String = findings
            .iter()
            .map(|f| {
                format!(
                    "- [{:?}] {} : {}{}",
                    f.severity,
                    f.title,
                    f.description,
                    f.suggested_action
                        .as_ref()
                        .map(|a| format!(" (suggested {}: {})", a.action_type, a.description))
                        .unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let messages = vec![
            Message::system(format!(
                "A specialist finished subtask '{}' and reported findings. Decide whether the \
                 plan needs follow-up subtasks. You may call {}; leaving the plan unchanged is \
                 often correct.",
                current.id, REVISE_TOOL
            )),
            Message::user(findings_text),
        ];

        let reply = match self
            .llm
            .chat_with_tools(
                messages,
                ChatOptions {
                    tools: vec![revise_tool_definition()],
                    tool_choice: None,
                    generation: GenerationOptions::precise(),
                },
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!("adaptation call failed, keeping plan: {}", e);
                return None;
            }
        };

        let call = reply
            .tool_calls
            .iter()
            .find(|c| c.function.name == REVISE_TOOL)?;
        let args: ReviseArgs = match serde_json::from_str(&call.function.arguments) {
            Ok(args) => args,
            Err(e) => {
                warn!("adaptation arguments malformed, keeping plan: {}", e);
                return None;
            }
        };

        if args.action != "add" || args.confidence < confidence_threshold || args.subtasks.is_empty()
        {
            return None;
        }

        let injected: Vec<Subtask> = args
            .subtasks
            .into_iter()
            .map(|mut subtask| {
                subtask.dependencies = vec![current.id.clone()];
                subtask
            })
            .collect();
        info!(
            "plan adapted: injecting {} subtask(s) after {}",
            injected.len(),
            current.id
        );
        Some(injected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::AssistantToolCall;
    use crate::llm::{Completion, CompletionOptions, LlmReply, Usage};
    use crate::orchestrator::types::{Complexity, Severity};
    use async_trait::async_trait;

    struct ToolReply {
        name: &'static str,
        arguments: String,
    }

    #[async_trait]
    impl LlmHandle for ToolReply {
        async fn chat_with_tools(
            &self,
            _messages: Vec<Message>,
            _options: ChatOptions,
        ) -> crate::error::Result<LlmReply> {
            Ok(LlmReply {
                content: String::new(),
                tool_calls: vec![AssistantToolCall::function(
                    "c1",
                    self.name,
                    self.arguments.clone(),
                )],
                usage: Usage::default(),
                model: "large".into(),
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

    fn plan_json() -> String {
        json!({
            "subtasks": [
                {
                    "id": "subtask-1",
                    "description": "read the configuration loader module",
                    "specialist_id": "researcher",
                    "priority": 6,
                    "estimated_complexity": "low",
                    "expected_outcome": "notes on config layout"
                },
                {
                    "id": "subtask-2",
                    "description": "fix the configuration default handling",
                    "specialist_id": "coder",
                    "dependencies": ["subtask-1"],
                    "priority": 8,
                    "estimated_complexity": "medium",
                    "expected_outcome": "patch applied"
                }
            ]
        })
        .to_string()
    }

    #[tokio::test]
    async fn extracts_and_validates_plan() {
        let planner = Planner::new(Arc::new(ToolReply {
            name: PLAN_TOOL,
            arguments: plan_json(),
        }));
        let plan = planner
            .create_plan(
                "fix the configuration default handling",
                &["researcher", "coder"],
            )
            .await
            .unwrap();
        assert_eq!(plan.subtasks.len(), 2);
        assert_eq!(plan.subtasks[1].dependencies, vec!["subtask-1"]);
    }

    #[tokio::test]
    async fn rejects_unknown_specialist() {
        let planner = Planner::new(Arc::new(ToolReply {
            name: PLAN_TOOL,
            arguments: plan_json(),
        }));
        let err = planner
            .create_plan("fix configuration", &["researcher"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PlanFailed(_)));
    }

    #[tokio::test]
    async fn adaptation_rewrites_dependencies() {
        let planner = Planner::new(Arc::new(ToolReply {
            name: REVISE_TOOL,
            arguments: json!({
                "action": "add",
                "confidence": 0.9,
                "subtasks": [{
                    "id": "fix-1",
                    "description": "fix the reported overflow",
                    "specialist_id": "coder",
                    "dependencies": ["something-else"],
                    "priority": 8,
                    "estimated_complexity": "medium",
                    "expected_outcome": "overflow fixed"
                }]
            })
            .to_string(),
        }));
        let current = Subtask {
            id: "subtask-1".into(),
            description: "audit".into(),
            specialist_id: "researcher".into(),
            dependencies: vec![],
            priority: 5,
            estimated_complexity: Complexity::Low,
            expected_outcome: None,
        };
        let findings = vec![Finding::new(Severity::High, "bug", "overflow", "d")];
        let injected = planner
            .propose_adaptation(&current, &findings, 0.7)
            .await
            .unwrap();
        assert_eq!(injected.len(), 1);
        assert_eq!(injected[0].id, "fix-1");
        assert_eq!(injected[0].dependencies, vec!["subtask-1"]);
    }

    #[tokio::test]
    async fn low_confidence_adaptation_is_ignored() {
        let planner = Planner::new(Arc::new(ToolReply {
            name: REVISE_TOOL,
            arguments: json!({
                "action": "add",
                "confidence": 0.4,
                "subtasks": [{
                    "id": "fix-1",
                    "description": "x",
                    "specialist_id": "coder",
                    "priority": 5,
                    "estimated_complexity": "low"
                }]
            })
            .to_string(),
        }));
        let current = Subtask {
            id: "subtask-1".into(),
            description: "audit".into(),
            specialist_id: "researcher".into(),
            dependencies: vec![],
            priority: 5,
            estimated_complexity: Complexity::Low,
            expected_outcome: None,
        };
        assert!(planner
            .propose_adaptation(&current, &[], 0.7)
            .await
            .is_none());
    }
}
