//! Type definitions for the agent module

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::llm::Tier;
use crate::tools::{ToolCall, ToolResult};

/// Role of a message in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message providing context and instructions
    System,
    /// User message
    User,
    /// Assistant (AI) response
    Assistant,
    /// Tool/function result
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in a conversation.
///
/// Messages are insertion-ordered; each carries the iteration it was
/// produced in (0 for the seed system/user messages).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Content of the message (may be empty when tool calls are present)
    pub content: String,
    /// Optional tool call ID (for tool messages)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Optional tool calls made by assistant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<AssistantToolCall>>,
    /// Iteration this message was produced in
    #[serde(default)]
    pub iteration: u32,
}

impl Message {
    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Message {
            role: Role::System,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            iteration: 0,
        }
    }

    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Message {
            role: Role::User,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            iteration: 0,
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
            iteration: 0,
        }
    }

    /// Create an assistant message carrying tool calls
    pub fn assistant_with_calls(
        content: impl Into<String>,
        tool_calls: Vec<AssistantToolCall>,
    ) -> Self {
        Message {
            role: Role::Assistant,
            content: content.into(),
            tool_call_id: None,
            tool_calls: Some(tool_calls),
            iteration: 0,
        }
    }

    /// Create a new tool result message
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            tool_calls: None,
            iteration: 0,
        }
    }

    /// Attach the producing iteration
    pub fn at_iteration(mut self, iteration: u32) -> Self {
        self.iteration = iteration;
        self
    }
}

/// Tool call made by the assistant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Type of tool call (usually "function")
    #[serde(rename = "type")]
    pub call_type: String,
    /// Function details
    pub function: FunctionCall,
}

impl AssistantToolCall {
    /// Create a function-typed tool call
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        AssistantToolCall {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// Function call details
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the function to call
    pub name: String,
    /// Arguments as JSON string
    pub arguments: String,
}

/// Tool definition for function calling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Type of tool (usually "function")
    #[serde(rename = "type")]
    pub tool_type: String,
    /// Function definition
    pub function: FunctionDefinition,
}

/// Function definition for tools
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Name of the function
    pub name: String,
    /// Description of what the function does
    pub description: String,
    /// JSON Schema for function parameters
    pub parameters: serde_json::Value,
}

/// Tool choice strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// Let the model decide
    Auto(String),
    /// Force a specific tool
    Specific {
        #[serde(rename = "type")]
        tool_type: String,
        function: FunctionName,
    },
}

impl ToolChoice {
    /// Force the named function
    pub fn required(name: impl Into<String>) -> Self {
        ToolChoice::Specific {
            tool_type: "function".to_string(),
            function: FunctionName { name: name.into() },
        }
    }
}

/// Function name for specific tool choice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionName {
    /// Name of the function to call
    pub name: String,
}

/// Generation options for LLM calls
#[derive(Debug, Clone, Default)]
pub struct GenerationOptions {
    /// Maximum tokens to generate
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0 - 2.0)
    pub temperature: Option<f32>,
    /// Top-p sampling (0.0 - 1.0)
    pub top_p: Option<f32>,
    /// Stop sequences
    pub stop: Option<Vec<String>>,
}

impl GenerationOptions {
    /// Create options for precise, deterministic output
    pub fn precise() -> Self {
        GenerationOptions {
            temperature: Some(0.0),
            ..Default::default()
        }
    }

    /// Create options for balanced output
    pub fn balanced() -> Self {
        GenerationOptions {
            temperature: Some(0.5),
            ..Default::default()
        }
    }
}

/// What the agent is being asked to do with the goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskMode {
    /// Carry the goal out
    Execute,
    /// Produce a plan without acting
    Plan,
    /// Diagnose a problem
    Debug,
    /// Apply a described change
    Edit,
}

impl Default for TaskMode {
    fn default() -> Self {
        TaskMode::Execute
    }
}

/// A task handed to the runtime. Immutable after start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique task ID (matches `^[A-Za-z0-9_-]+$`)
    pub id: String,
    /// Natural-language goal
    pub goal: String,
    /// Execution mode
    #[serde(default)]
    pub mode: TaskMode,
    /// Working directory all relative paths resolve against
    pub working_dir: PathBuf,
    /// Session this task belongs to
    pub session_id: String,
    /// Orchestrator agent that spawned this task, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_agent_id: Option<String>,
}

impl Task {
    /// Create a task with generated task/session ids.
    pub fn new(goal: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Task {
            id: format!("task-{}", Uuid::new_v4().simple()),
            goal: goal.into(),
            mode: TaskMode::Execute,
            working_dir: working_dir.into(),
            session_id: format!("session-{}", Uuid::new_v4().simple()),
            parent_agent_id: None,
        }
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: TaskMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the session id
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }
}

/// Validate a task/session id against the `^[A-Za-z0-9_-]+$` contract.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Phase of the iteration loop. Transitions form a DAG with `Reporting`
/// terminal; backward transitions are forbidden.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scoping,
    PlanningLite,
    Executing,
    Converging,
    Verifying,
    Reporting,
}

impl Phase {
    /// Whether moving from `self` to `next` is a legal forward edge.
    pub fn can_transition(self, next: Phase) -> bool {
        self != Phase::Reporting && next >= self
    }
}

/// One tick of the loop, as recorded for tracing and detection.
#[derive(Debug, Clone)]
pub struct IterationState {
    /// Monotonically increasing from 1
    pub seq: u32,
    pub started_at: DateTime<Utc>,
    pub tier: Tier,
    /// Digest of the projected message history sent to the LLM
    pub messages_digest: String,
    pub tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub tokens_consumed: u64,
    pub phase: Phase,
}

/// Why the loop terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// `report` tool invoked with a final answer
    ReportComplete,
    /// Clean stop (explicit marker or implicit)
    TaskComplete,
    LoopDetected,
    Stuck,
    /// Budget reached but a synthesized answer was produced
    MaxIterations,
    /// Budget reached with nothing to synthesize
    MaxIterationsExhausted,
    HardTokenLimit,
    AbortSignal,
    GiveUp,
    LlmError,
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReasonCode::ReportComplete => "report_complete",
            ReasonCode::TaskComplete => "task_complete",
            ReasonCode::LoopDetected => "loop_detected",
            ReasonCode::Stuck => "stuck",
            ReasonCode::MaxIterations => "max_iterations",
            ReasonCode::MaxIterationsExhausted => "max_iterations_exhausted",
            ReasonCode::HardTokenLimit => "hard_token_limit",
            ReasonCode::AbortSignal => "abort_signal",
            ReasonCode::GiveUp => "give_up",
            ReasonCode::LlmError => "llm_error",
        };
        write!(f, "{}", s)
    }
}

/// The terminal result of running a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
    pub answer: String,
    pub iterations_used: u32,
    pub tokens_used: u64,
    pub reason_code: ReasonCode,
    /// Human-readable roll-up: reason code, counters, suggested next steps.
    pub summary: String,
}

/// How a single-tier run of the loop ended: a terminal result, or a
/// request to rerun at the next tier.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Finished(TaskResult),
    Escalate { reason: String },
}

/// Explicit termination marker parsed from assistant text on a clean stop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationMarker {
    TaskComplete,
    NeedEscalation(String),
    GiveUp(String),
}

/// Parse a termination marker anywhere in the assistant text.
pub fn parse_termination_marker(text: &str) -> Option<TerminationMarker> {
    if text.contains("[TASK_COMPLETE]") {
        return Some(TerminationMarker::TaskComplete);
    }
    for (prefix, build) in [
        (
            "[NEED_ESCALATION:",
            TerminationMarker::NeedEscalation as fn(String) -> TerminationMarker,
        ),
        ("[GIVE_UP:", TerminationMarker::GiveUp as fn(String) -> TerminationMarker),
    ] {
        if let Some(start) = text.find(prefix) {
            let rest = &text[start + prefix.len()..];
            if let Some(end) = rest.find(']') {
                return Some(build(rest[..end].trim().to_string()));
            }
        }
    }
    None
}

/// Cooperative cancellation shared between the caller and the loop.
///
/// Checked at suspension points; `cancelled()` lets the LLM call be raced
/// against the signal.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request stop. Idempotent.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::SeqCst)
    }

    /// Resolve when cancellation is requested.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        // Re-check after registering to avoid a missed wakeup.
        let notified = self.inner.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_set_roles() {
        assert_eq!(Message::system("s").role, Role::System);
        assert_eq!(Message::user("u").role, Role::User);
        assert_eq!(Message::assistant("a").role, Role::Assistant);
        let t = Message::tool("call-1", "out");
        assert_eq!(t.role, Role::Tool);
        assert_eq!(t.tool_call_id.as_deref(), Some("call-1"));
    }

    #[test]
    fn id_pattern_enforced() {
        assert!(is_valid_id("task-123_A"));
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc/passwd"));
        assert!(!is_valid_id("task 1"));
    }

    #[test]
    fn phases_are_forward_only() {
        assert!(Phase::Scoping.can_transition(Phase::PlanningLite));
        assert!(Phase::Executing.can_transition(Phase::Executing));
        assert!(Phase::Executing.can_transition(Phase::Reporting));
        assert!(!Phase::Converging.can_transition(Phase::Executing));
        assert!(!Phase::Reporting.can_transition(Phase::Reporting));
    }

    #[test]
    fn parses_termination_markers() {
        assert_eq!(
            parse_termination_marker("done [TASK_COMPLETE]"),
            Some(TerminationMarker::TaskComplete)
        );
        assert_eq!(
            parse_termination_marker("[NEED_ESCALATION: task too complex]"),
            Some(TerminationMarker::NeedEscalation("task too complex".into()))
        );
        assert_eq!(
            parse_termination_marker("[GIVE_UP:no data]"),
            Some(TerminationMarker::GiveUp("no data".into()))
        );
        assert_eq!(parse_termination_marker("just text"), None);
    }

    #[tokio::test]
    async fn cancel_token_resolves_waiters() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        token.cancel();
        handle.await.unwrap();
        assert!(token.is_cancelled());
    }
}
