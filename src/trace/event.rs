//! Trace event types
//!
//! One NDJSON line per event. The envelope carries the global monotone
//! sequence number, an ISO-8601 timestamp, and the originating iteration;
//! the payload is an internally-tagged union over the event kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::agent::types::Phase;
use crate::llm::Tier;

/// Envelope written as one NDJSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Global monotone sequence number, assigned by the writer
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    /// Iteration the event originated in (0 for task-level events)
    pub iteration: u32,
    #[serde(flatten)]
    pub event: TraceEvent,
}

/// All event kinds the runtime emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TraceEvent {
    #[serde(rename = "task:start")]
    TaskStart {
        task_id: String,
        session_id: String,
        goal: String,
        mode: String,
        tier: Tier,
    },

    #[serde(rename = "iteration:detail")]
    IterationDetail {
        phase: Phase,
        tool_calls: Vec<String>,
        failed_tool_calls: u32,
        duration_ms: u64,
    },

    #[serde(rename = "llm:call")]
    LlmCall {
        tier: Tier,
        model: String,
        messages: usize,
        tools_offered: usize,
        prompt_tokens: u64,
        completion_tokens: u64,
        tool_calls_returned: usize,
        content_chars: usize,
    },

    #[serde(rename = "tool:execution")]
    ToolExecution {
        tool: String,
        success: bool,
        duration_ms: u64,
        output_chars: usize,
        /// Leading slice of the output, for offline alignment checks
        output_snippet: String,
        cached: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },

    #[serde(rename = "memory:snapshot")]
    MemorySnapshot {
        facts: usize,
        estimated_tokens: usize,
        archived: usize,
    },

    #[serde(rename = "fact:added")]
    FactAdded {
        category: String,
        confidence: f64,
        source: String,
    },

    #[serde(rename = "decision:point")]
    DecisionPoint {
        decision: String,
        confidence: f64,
        reason: String,
    },

    #[serde(rename = "synthesis:forced")]
    SynthesisForced { reason: String },

    #[serde(rename = "error:captured")]
    ErrorCaptured { kind: String, message: String },

    #[serde(rename = "stopping:analysis")]
    StoppingAnalysis {
        reason_code: String,
        iterations_used: u32,
        tokens_used: u64,
    },

    #[serde(rename = "tool:filter")]
    ToolFilter {
        offered: Vec<String>,
        excluded: Vec<String>,
        forced_reasoning: bool,
    },

    #[serde(rename = "context:trim")]
    ContextTrim {
        messages_total: usize,
        messages_sent: usize,
        trimmed: usize,
    },

    #[serde(rename = "llm:validation")]
    LlmValidation {
        valid: bool,
        violations: Vec<String>,
    },

    #[serde(rename = "status:change")]
    StatusChange { status: String, detail: String },

    #[serde(rename = "memory:summarization_llm_call")]
    SummarizationLlmCall {
        start_iteration: u32,
        end_iteration: u32,
        transcript_chars: usize,
    },

    #[serde(rename = "memory:summarization_result")]
    SummarizationResult {
        facts_extracted: usize,
        parse_ok: bool,
    },
}

/// Wire names of every event kind, for filter validation.
pub const EVENT_TYPES: &[&str] = &[
    "task:start",
    "iteration:detail",
    "llm:call",
    "tool:execution",
    "memory:snapshot",
    "fact:added",
    "decision:point",
    "synthesis:forced",
    "error:captured",
    "stopping:analysis",
    "tool:filter",
    "context:trim",
    "llm:validation",
    "status:change",
    "memory:summarization_llm_call",
    "memory:summarization_result",
];

impl TraceEvent {
    /// The wire name carried in the `type` field.
    pub fn type_name(&self) -> &'static str {
        match self {
            TraceEvent::TaskStart { .. } => "task:start",
            TraceEvent::IterationDetail { .. } => "iteration:detail",
            TraceEvent::LlmCall { .. } => "llm:call",
            TraceEvent::ToolExecution { .. } => "tool:execution",
            TraceEvent::MemorySnapshot { .. } => "memory:snapshot",
            TraceEvent::FactAdded { .. } => "fact:added",
            TraceEvent::DecisionPoint { .. } => "decision:point",
            TraceEvent::SynthesisForced { .. } => "synthesis:forced",
            TraceEvent::ErrorCaptured { .. } => "error:captured",
            TraceEvent::StoppingAnalysis { .. } => "stopping:analysis",
            TraceEvent::ToolFilter { .. } => "tool:filter",
            TraceEvent::ContextTrim { .. } => "context:trim",
            TraceEvent::LlmValidation { .. } => "llm:validation",
            TraceEvent::StatusChange { .. } => "status:change",
            TraceEvent::SummarizationLlmCall { .. } => "memory:summarization_llm_call",
            TraceEvent::SummarizationResult { .. } => "memory:summarization_result",
        }
    }

    /// Whether `name` is a known event type.
    pub fn is_known_type(name: &str) -> bool {
        EVENT_TYPES.contains(&name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_tag_with_colon_names() {
        let record = TraceRecord {
            seq: 1,
            timestamp: Utc::now(),
            iteration: 2,
            event: TraceEvent::ToolExecution {
                tool: "fs:read".into(),
                success: true,
                duration_ms: 3,
                output_chars: 10,
                output_snippet: "# Title".into(),
                cached: false,
                error_code: None,
            },
        };
        let line = serde_json::to_string(&record).unwrap();
        assert!(line.contains(r#""type":"tool:execution""#));
        assert!(line.contains(r#""seq":1"#));

        let back: TraceRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back.event.type_name(), "tool:execution");
        assert_eq!(back.iteration, 2);
    }

    #[test]
    fn every_variant_name_is_listed() {
        assert!(TraceEvent::is_known_type("llm:call"));
        assert!(TraceEvent::is_known_type("memory:summarization_result"));
        assert!(!TraceEvent::is_known_type("nonsense:event"));
        assert_eq!(EVENT_TYPES.len(), 16);
    }
}
