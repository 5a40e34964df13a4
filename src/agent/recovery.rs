//! Error recovery for stuck episodes
//!
//! When the stuck rubric fires, the loop consults an LLM once per episode
//! for a recovery action. Retries are capped per tool name; exhausting the
//! cap converts a retry recommendation into giving up.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::agent::types::GenerationOptions;
use crate::llm::{CompletionOptions, LlmHandle};

/// Retries allowed per tool name within one task.
pub const MAX_RECOVERY_RETRIES_PER_TOOL: u32 = 2;

/// What the advisor recommends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// Try the same tool again
    Retry,
    /// Switch to a different tool
    AlternativeTool,
    /// Keep the tool, change the arguments
    ParameterAdjustment,
    /// Rerun the task at the next tier
    Escalate,
    /// Stop with a failure answer
    GiveUp,
}

/// LLM-backed recovery consultation with per-tool retry accounting.
pub struct RecoveryAdvisor {
    llm: Arc<dyn LlmHandle>,
    retries: HashMap<String, u32>,
}

impl RecoveryAdvisor {
    pub fn new(llm: Arc<dyn LlmHandle>) -> Self {
        RecoveryAdvisor {
            llm,
            retries: HashMap::new(),
        }
    }

    /// Whether `tool` still has retry budget.
    pub fn can_retry(&self, tool: &str) -> bool {
        self.retries.get(tool).copied().unwrap_or(0) < MAX_RECOVERY_RETRIES_PER_TOOL
    }

    /// Consult once for this stuck episode. `dominant_tool` is the tool the
    /// episode revolves around; a retry recommendation against an exhausted
    /// tool becomes `GiveUp`.
    pub async fn advise(
        &mut self,
        stuck_reason: &str,
        dominant_tool: Option<&str>,
        recent_errors: &str,
    ) -> RecoveryAction {
        let prompt = format!(
            r#"An autonomous agent appears stuck: {}

Recent errors:
{}

Reply with exactly one word — one of:
retry, alternative_tool, parameter_adjustment, escalate, give_up"#,
            stuck_reason, recent_errors
        );

        let response = self
            .llm
            .complete(
                &prompt,
                CompletionOptions {
                    generation: GenerationOptions::precise(),
                    system_prompt: None,
                },
            )
            .await;

        let action = match response {
            Ok(completion) => parse_action(&completion.content),
            Err(e) => {
                warn!("recovery consultation failed: {}", e);
                RecoveryAction::GiveUp
            }
        };

        match action {
            RecoveryAction::Retry => {
                let Some(tool) = dominant_tool else {
                    return RecoveryAction::GiveUp;
                };
                if !self.can_retry(tool) {
                    info!("retry budget for '{}' exhausted, giving up", tool);
                    return RecoveryAction::GiveUp;
                }
                *self.retries.entry(tool.to_string()).or_insert(0) += 1;
                RecoveryAction::Retry
            }
            other => other,
        }
    }
}

fn parse_action(response: &str) -> RecoveryAction {
    let lowered = response.trim().to_lowercase();
    if lowered.contains("alternative") {
        RecoveryAction::AlternativeTool
    } else if lowered.contains("parameter") || lowered.contains("adjust") {
        RecoveryAction::ParameterAdjustment
    } else if lowered.contains("escalate") {
        RecoveryAction::Escalate
    } else if lowered.contains("give") {
        RecoveryAction::GiveUp
    } else if lowered.contains("retry") {
        RecoveryAction::Retry
    } else {
        RecoveryAction::GiveUp
    }
}

/// Hint injected into the conversation when recovery keeps the loop alive.
pub fn recovery_hint(action: RecoveryAction, tool: Option<&str>) -> String {
    let tool = tool.unwrap_or("the failing tool");
    match action {
        RecoveryAction::Retry => format!(
            "Recovery: retry {} once more, then move on if it still fails.",
            tool
        ),
        RecoveryAction::AlternativeTool => format!(
            "Recovery: stop calling {}. Use a different tool or answer from what you already know.",
            tool
        ),
        RecoveryAction::ParameterAdjustment => format!(
            "Recovery: keep {} but change the arguments substantially; the current ones are not working.",
            tool
        ),
        RecoveryAction::Escalate | RecoveryAction::GiveUp => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::Message;
    use crate::llm::{ChatOptions, Completion, LlmReply, Usage};
    use async_trait::async_trait;

    struct OneWord(&'static str);

    #[async_trait]
    impl LlmHandle for OneWord {
        async fn chat_with_tools(
            &self,
            _messages: Vec<Message>,
            _options: ChatOptions,
        ) -> crate::error::Result<LlmReply> {
            unreachable!()
        }
        async fn complete(
            &self,
            _prompt: &str,
            _options: CompletionOptions,
        ) -> crate::error::Result<Completion> {
            Ok(Completion {
                content: self.0.to_string(),
                usage: Usage::default(),
            })
        }
    }

    #[test]
    fn parses_each_action() {
        assert_eq!(parse_action("retry"), RecoveryAction::Retry);
        assert_eq!(parse_action("alternative_tool"), RecoveryAction::AlternativeTool);
        assert_eq!(
            parse_action("parameter_adjustment"),
            RecoveryAction::ParameterAdjustment
        );
        assert_eq!(parse_action("Escalate."), RecoveryAction::Escalate);
        assert_eq!(parse_action("give_up"), RecoveryAction::GiveUp);
        assert_eq!(parse_action("???"), RecoveryAction::GiveUp);
    }

    #[tokio::test]
    async fn retry_budget_is_capped_per_tool() {
        let mut advisor = RecoveryAdvisor::new(Arc::new(OneWord("retry")));
        assert_eq!(
            advisor.advise("stuck", Some("fs:search"), "no matches").await,
            RecoveryAction::Retry
        );
        assert_eq!(
            advisor.advise("stuck", Some("fs:search"), "no matches").await,
            RecoveryAction::Retry
        );
        assert_eq!(
            advisor.advise("stuck", Some("fs:search"), "no matches").await,
            RecoveryAction::GiveUp
        );
        // A different tool has its own budget
        assert_eq!(
            advisor.advise("stuck", Some("fs:read"), "not found").await,
            RecoveryAction::Retry
        );
    }
}
