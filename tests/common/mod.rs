//! Shared test support: a scripted LLM handle and canned tools.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use kbagent::agent::{AssistantToolCall, Message, ToolChoice};
use kbagent::llm::{ChatOptions, Completion, CompletionOptions, LlmHandle, LlmReply, Usage};
use kbagent::tools::{Tool, ToolErrorDetail, ToolOutput};
use kbagent::{Error, Result};

/// One recorded chat request, for assertions about what the loop offered.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub tools_offered: usize,
    pub messages: usize,
    pub forced_tool: Option<String>,
}

/// Scripted LLM: replies drain from a queue in order. Requests that force
/// the `classify_task` tool are answered automatically so scripts only
/// describe the main conversation.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<LlmReply>>,
    completions: Mutex<VecDeque<String>>,
    pub recorded: Mutex<Vec<RecordedCall>>,
    classification_budget: u32,
    call_ids: AtomicU64,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        ScriptedLlm {
            replies: Mutex::new(VecDeque::new()),
            completions: Mutex::new(VecDeque::new()),
            recorded: Mutex::new(Vec::new()),
            classification_budget: 8,
            call_ids: AtomicU64::new(0),
        }
    }

    pub fn with_classification_budget(mut self, budget: u32) -> Self {
        self.classification_budget = budget;
        self
    }

    fn next_call_id(&self) -> String {
        format!("call-{}", self.call_ids.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn usage(prompt: u64, completion: u64) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
        }
    }

    /// Queue a plain text reply.
    pub fn push_text(&self, content: &str, prompt: u64, completion: u64) {
        self.replies.lock().unwrap().push_back(LlmReply {
            content: content.to_string(),
            tool_calls: vec![],
            usage: Self::usage(prompt, completion),
            model: "scripted".into(),
        });
    }

    /// Queue a reply carrying one tool call (wire-form tool name).
    pub fn push_tool_call(&self, content: &str, tool: &str, args: Value, prompt: u64, completion: u64) {
        self.push_tool_calls(content, vec![(tool, args)], prompt, completion);
    }

    /// Queue a reply carrying several tool calls in order.
    pub fn push_tool_calls(
        &self,
        content: &str,
        calls: Vec<(&str, Value)>,
        prompt: u64,
        completion: u64,
    ) {
        let tool_calls = calls
            .into_iter()
            .map(|(name, args)| {
                AssistantToolCall::function(self.next_call_id(), name, args.to_string())
            })
            .collect();
        self.replies.lock().unwrap().push_back(LlmReply {
            content: content.to_string(),
            tool_calls,
            usage: Self::usage(prompt, completion),
            model: "scripted".into(),
        });
    }

    /// Queue a reply for a `complete()` call.
    pub fn push_completion(&self, content: &str) {
        self.completions
            .lock()
            .unwrap()
            .push_back(content.to_string());
    }

    pub fn remaining_replies(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

fn forced_name(options: &ChatOptions) -> Option<String> {
    match &options.tool_choice {
        Some(ToolChoice::Specific { function, .. }) => Some(function.name.clone()),
        _ => None,
    }
}

#[async_trait]
impl LlmHandle for ScriptedLlm {
    async fn chat_with_tools(
        &self,
        messages: Vec<Message>,
        options: ChatOptions,
    ) -> Result<LlmReply> {
        let forced = forced_name(&options);

        // Classification is ambient; answer it without consuming the script.
        if forced.as_deref() == Some("classify_task") {
            return Ok(LlmReply {
                content: String::new(),
                tool_calls: vec![AssistantToolCall::function(
                    self.next_call_id(),
                    "classify_task",
                    json!({"intent": "action", "budget": self.classification_budget}).to_string(),
                )],
                usage: Self::usage(50, 10),
                model: "scripted".into(),
            });
        }

        self.recorded.lock().unwrap().push(RecordedCall {
            tools_offered: options.tools.len(),
            messages: messages.len(),
            forced_tool: forced,
        });

        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Llm("scripted replies exhausted".into()))
    }

    async fn complete(&self, _prompt: &str, _options: CompletionOptions) -> Result<Completion> {
        let content = self
            .completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| "{}".to_string());
        Ok(Completion {
            content,
            usage: Self::usage(20, 5),
        })
    }
}

/// A tool that always returns the same output.
pub struct CannedTool {
    pub name: String,
    pub output: String,
}

impl CannedTool {
    pub fn new(name: impl Into<String>, output: impl Into<String>) -> Self {
        CannedTool {
            name: name.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl Tool for CannedTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "canned test tool"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"pattern": {"type": "string"}, "path": {"type": "string"}}})
    }
    async fn execute(&self, _args: Value) -> std::result::Result<ToolOutput, ToolErrorDetail> {
        Ok(ToolOutput::text(self.output.clone()))
    }
}

/// A tool that always fails.
pub struct FailingTool {
    pub name: String,
    pub retryable: bool,
}

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "always fails"
    }
    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {"pattern": {"type": "string"}}})
    }
    fn retryable(&self) -> bool {
        self.retryable
    }
    async fn execute(&self, _args: Value) -> std::result::Result<ToolOutput, ToolErrorDetail> {
        Err(ToolErrorDetail::new("io_error", "simulated failure", self.retryable))
    }
}
