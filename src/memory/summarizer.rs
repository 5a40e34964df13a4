//! Async fact extraction from conversation history
//!
//! A single background worker drains a bounded FIFO of summarization tasks.
//! Each task projects a history snapshot into a compact transcript, asks a
//! small-tier model for a JSON array of facts, and writes the parsed facts
//! through the caller-supplied sink. The worker never blocks the main loop
//! and never propagates failures.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::types::{GenerationOptions, Message, Role};
use crate::llm::{CompletionOptions, LlmHandle};
use crate::trace::{TraceEvent, TraceWriter};

use super::factsheet::{Fact, FactCategory};

/// One queued unit of summarization work.
#[derive(Debug, Clone)]
pub struct SummarizationTask {
    pub start_iter: u32,
    pub end_iter: u32,
    /// Deep history snapshot covering the iteration range
    pub snapshot: Vec<Message>,
}

/// Receives extracted facts; implementations serialize writes with the
/// main loop's own fact-sheet updates.
pub trait FactSink: Send + Sync {
    fn absorb(&self, facts: Vec<Fact>);
}

/// Handle to the background summarization worker.
pub struct Summarizer {
    tx: mpsc::Sender<SummarizationTask>,
    worker: JoinHandle<()>,
}

impl Summarizer {
    /// Spawn the worker. `queue_bound` caps in-flight tasks; enqueueing
    /// past the bound drops the task with a warning.
    pub fn spawn(
        llm: Arc<dyn LlmHandle>,
        sink: Arc<dyn FactSink>,
        trace: Option<Arc<TraceWriter>>,
        queue_bound: usize,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<SummarizationTask>(queue_bound.max(1));
        let worker = tokio::spawn(async move {
            while let Some(task) = rx.recv().await {
                run_task(&*llm, &*sink, trace.as_deref(), task).await;
            }
        });
        Summarizer { tx, worker }
    }

    /// Enqueue without blocking. Returns false when the queue is full.
    pub fn enqueue(&self, task: SummarizationTask) -> bool {
        match self.tx.try_send(task) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(task)) => {
                warn!(
                    "summarization queue full, dropping iterations {}..{}",
                    task.start_iter, task.end_iter
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Close the queue and wait for queued work to drain.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("summarization worker ended abnormally: {}", e);
        }
    }
}

async fn run_task(
    llm: &dyn LlmHandle,
    sink: &dyn FactSink,
    trace: Option<&TraceWriter>,
    task: SummarizationTask,
) {
    let transcript = project_transcript(&task.snapshot);
    if transcript.is_empty() {
        return;
    }
    if let Some(trace) = trace {
        let _ = trace.record(
            task.end_iter,
            TraceEvent::SummarizationLlmCall {
                start_iteration: task.start_iter,
                end_iteration: task.end_iter,
                transcript_chars: transcript.chars().count(),
            },
        );
    }

    let prompt = extraction_prompt(&transcript);
    let response = llm
        .complete(
            &prompt,
            CompletionOptions {
                generation: GenerationOptions::precise(),
                system_prompt: None,
            },
        )
        .await;

    let content = match response {
        Ok(completion) => completion.content,
        Err(e) => {
            warn!("summarization LLM call failed: {}", e);
            if let Some(trace) = trace {
                let _ = trace.record(
                    task.end_iter,
                    TraceEvent::SummarizationResult {
                        facts_extracted: 0,
                        parse_ok: false,
                    },
                );
            }
            return;
        }
    };

    let (facts, parse_ok) = parse_facts(&content, task.end_iter);
    if let Some(trace) = trace {
        let _ = trace.record(
            task.end_iter,
            TraceEvent::SummarizationResult {
                facts_extracted: facts.len(),
                parse_ok,
            },
        );
    }
    if !facts.is_empty() {
        info!("summarizer extracted {} fact(s)", facts.len());
        sink.absorb(facts);
    } else {
        debug!("summarizer extracted no facts");
    }
}

/// Project a history snapshot into the compact transcript the extraction
/// prompt works over. Truncated to keep the small-tier context modest.
pub fn project_transcript(messages: &[Message]) -> String {
    let mut lines = Vec::new();
    for message in messages {
        match message.role {
            Role::Assistant => {
                if !message.content.is_empty() {
                    lines.push(format!("Agent reasoning: {}", message.content));
                }
                if let Some(calls) = &message.tool_calls {
                    for call in calls {
                        lines.push(format!(
                            "Tool: {}({})",
                            call.function.name, call.function.arguments
                        ));
                    }
                }
            }
            Role::Tool => lines.push(format!("Result: {}", message.content)),
            Role::System | Role::User => {}
        }
    }
    let text = lines.join("\n");
    if text.len() > 4_000 {
        let cut: String = text.chars().take(4_000).collect();
        format!("{}...\n[truncated]", cut)
    } else {
        text
    }
}

fn extraction_prompt(transcript: &str) -> String {
    format!(
        r#"Extract durable facts from this agent transcript.

Transcript:
---
{}
---

Respond ONLY with a valid JSON array (no markdown, no code blocks) of objects:
[{{"category": "file_content|architecture|finding|decision|blocker|correction|tool_result|environment", "fact": "one compact sentence", "confidence": 0.0, "source": "tool name or agent_reasoning"}}]

Use an empty array [] if there is nothing worth keeping. Keep each fact under 200 characters."#,
        transcript
    )
}

/// Parse the model's JSON array; confidences are clamped to [0, 1].
fn parse_facts(content: &str, iteration: u32) -> (Vec<Fact>, bool) {
    let parsed: Result<Value, _> = serde_json::from_str(content.trim());
    let Ok(Value::Array(items)) = parsed else {
        warn!(
            "failed to parse summarization response as JSON array: {}",
            content.chars().take(200).collect::<String>()
        );
        return (Vec::new(), false);
    };

    let facts = items
        .iter()
        .filter_map(|item| {
            let text = item.get("fact").and_then(|v| v.as_str())?.trim();
            if text.is_empty() {
                return None;
            }
            let category = item
                .get("category")
                .and_then(|v| v.as_str())
                .map(FactCategory::parse)
                .unwrap_or(FactCategory::Finding);
            let confidence = item
                .get("confidence")
                .and_then(|v| v.as_f64())
                .unwrap_or(0.5)
                .clamp(0.0, 1.0);
            let source = item
                .get("source")
                .and_then(|v| v.as_str())
                .unwrap_or("agent_reasoning");
            Some(Fact::new(category, text, confidence, source, iteration))
        })
        .collect();
    (facts, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::AssistantToolCall;
    use crate::llm::{ChatOptions, Completion, LlmReply, Usage};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CannedLlm {
        reply: String,
    }

    #[async_trait]
    impl LlmHandle for CannedLlm {
        async fn chat_with_tools(
            &self,
            _messages: Vec<Message>,
            _options: ChatOptions,
        ) -> crate::error::Result<LlmReply> {
            unreachable!("summarizer only uses complete()")
        }

        async fn complete(
            &self,
            _prompt: &str,
            _options: CompletionOptions,
        ) -> crate::error::Result<Completion> {
            Ok(Completion {
                content: self.reply.clone(),
                usage: Usage::default(),
            })
        }
    }

    #[derive(Default)]
    struct CollectingSink {
        facts: Mutex<Vec<Fact>>,
    }

    impl FactSink for CollectingSink {
        fn absorb(&self, facts: Vec<Fact>) {
            self.facts.lock().unwrap().extend(facts);
        }
    }

    #[test]
    fn transcript_projection_covers_calls_and_results() {
        let mut assistant = Message::assistant("thinking about the layout");
        assistant.tool_calls = Some(vec![AssistantToolCall::function(
            "c1",
            "fs__read",
            r#"{"path":"a.txt"}"#,
        )]);
        let messages = vec![
            Message::system("sys"),
            Message::user("task"),
            assistant,
            Message::tool("c1", "file body"),
        ];
        let transcript = project_transcript(&messages);
        assert!(transcript.contains("Agent reasoning: thinking about the layout"));
        assert!(transcript.contains(r#"Tool: fs__read({"path":"a.txt"})"#));
        assert!(transcript.contains("Result: file body"));
        assert!(!transcript.contains("sys"));
    }

    #[test]
    fn parse_clamps_confidence_and_defaults_category() {
        let (facts, ok) = parse_facts(
            r#"[{"fact": "the config is TOML", "confidence": 3.5},
                {"category": "environment", "fact": "repo has a tests dir", "confidence": 0.8, "source": "fs:list"},
                {"fact": ""}]"#,
            4,
        );
        assert!(ok);
        assert_eq!(facts.len(), 2);
        assert!((facts[0].confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(facts[0].category, FactCategory::Finding);
        assert_eq!(facts[1].category, FactCategory::Environment);
        assert_eq!(facts[1].iteration, 4);
    }

    #[test]
    fn parse_tolerates_garbage() {
        let (facts, ok) = parse_facts("I could not produce JSON", 1);
        assert!(!ok);
        assert!(facts.is_empty());
    }

    #[test]
    fn parse_tolerates_long_multibyte_prose() {
        // 200 bytes into this reply lands inside a multi-byte char; the
        // truncated log line must not split it.
        let prose = format!("I'm sorry — I can't produce JSON here {}", "—".repeat(120));
        let (facts, ok) = parse_facts(&prose, 1);
        assert!(!ok);
        assert!(facts.is_empty());
    }

    #[tokio::test]
    async fn worker_extracts_through_sink() {
        let llm = Arc::new(CannedLlm {
            reply: r#"[{"category": "finding", "fact": "needle is in a.txt", "confidence": 0.9, "source": "fs:search"}]"#
                .into(),
        });
        let sink = Arc::new(CollectingSink::default());
        let summarizer = Summarizer::spawn(llm, sink.clone(), None, 4);

        let mut assistant = Message::assistant("searching");
        assistant.tool_calls = Some(vec![AssistantToolCall::function("c1", "fs__search", "{}")]);
        let queued = summarizer.enqueue(SummarizationTask {
            start_iter: 1,
            end_iter: 3,
            snapshot: vec![assistant, Message::tool("c1", "a.txt:1: needle")],
        });
        assert!(queued);
        summarizer.shutdown().await;

        let facts = sink.facts.lock().unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "needle is in a.txt");
        assert_eq!(facts[0].iteration, 3);
    }
}
