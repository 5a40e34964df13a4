//! Core tool trait and result types

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::types::{FunctionDefinition, ToolDefinition};
use crate::tools::sanitize_tool_name;

/// A tool that can be called by the LLM.
///
/// Names are namespaced (`fs:read`, `shell:exec`, `<pluginId>:<command>`);
/// the registry sanitizes them into wire-safe function names.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool name (namespaced form)
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for tool parameters
    fn parameters_schema(&self) -> Value;

    /// Whether transient failures of this tool may be retried by the executor
    fn retryable(&self) -> bool {
        false
    }

    /// Expensive tools are withheld from the LLM when budget runs low
    fn expensive(&self) -> bool {
        false
    }

    /// Execute the tool with given arguments
    async fn execute(&self, args: Value) -> std::result::Result<ToolOutput, ToolErrorDetail>;

    /// Convert to a wire tool definition (sanitized name)
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: sanitize_tool_name(self.name()),
                description: self.description().to_string(),
                parameters: self.parameters_schema(),
            },
        }
    }
}

/// Raw output of a successful tool invocation, before façade post-processing
/// (truncation, caching, duration capture).
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub content: String,
    pub metadata: Option<Value>,
}

impl ToolOutput {
    pub fn text(content: impl Into<String>) -> Self {
        ToolOutput {
            content: content.into(),
            metadata: None,
        }
    }

    pub fn with_metadata(content: impl Into<String>, metadata: Value) -> Self {
        ToolOutput {
            content: content.into(),
            metadata: Some(metadata),
        }
    }
}

/// Structured error detail carried in a failed `ToolResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolErrorDetail {
    /// Machine-readable code (`permission_denied`, `invalid_input`, `timeout`, ...)
    pub code: String,
    pub message: String,
    /// Whether the executor may retry this failure
    pub retryable: bool,
}

impl ToolErrorDetail {
    pub fn new(code: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        ToolErrorDetail {
            code: code.into(),
            message: message.into(),
            retryable,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new("invalid_input", message, false)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new("io_error", message, false)
    }
}

/// A tool call requested by the LLM. Ids are unique within a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool call ID
    pub id: String,
    /// Tool name (namespaced form)
    pub name: String,
    /// Tool input keyed by parameter name
    pub input: Value,
    /// When the LLM issued this call
    pub issued_at: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        ToolCall {
            id: id.into(),
            name: name.into(),
            input,
            issued_at: Utc::now(),
        }
    }
}

/// Result of a tool execution as observed by the loop and the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub success: bool,
    /// Result content (possibly truncated) or empty on failure
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ToolErrorDetail>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        ToolResult {
            tool_call_id: tool_call_id.into(),
            success: true,
            output: output.into(),
            error: None,
            duration_ms: 0,
            metadata: None,
        }
    }

    /// Create a failed result
    pub fn failure(tool_call_id: impl Into<String>, error: ToolErrorDetail) -> Self {
        ToolResult {
            tool_call_id: tool_call_id.into(),
            success: false,
            output: String::new(),
            error: Some(error),
            duration_ms: 0,
            metadata: None,
        }
    }

    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Render for the LLM: the output, or the error as an observation.
    pub fn observation(&self) -> String {
        if self.success {
            self.output.clone()
        } else {
            let detail = self.error.as_ref();
            format!(
                "Error ({}): {}",
                detail.map(|e| e.code.as_str()).unwrap_or("unknown"),
                detail.map(|e| e.message.as_str()).unwrap_or("tool failed"),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observation_renders_errors() {
        let ok = ToolResult::success("c1", "Done!");
        assert_eq!(ok.observation(), "Done!");

        let err = ToolResult::failure("c2", ToolErrorDetail::new("timeout", "took too long", true));
        assert_eq!(err.observation(), "Error (timeout): took too long");
        assert!(err.error.unwrap().retryable);
    }

    #[test]
    fn tool_call_records_issue_time() {
        let call = ToolCall::new("c1", "fs:read", serde_json::json!({"path": "a.txt"}));
        assert_eq!(call.name, "fs:read");
        assert!(call.issued_at <= Utc::now());
    }
}
