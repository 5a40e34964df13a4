//! The bounded iteration loop
//!
//! Drives one task: LLM call, tool dispatch, observation, termination
//! check, repeated under iteration and token budgets. Composes the context
//! filter, budget controller, detectors, memory, and trace writer; the
//! orchestrator runs one of these per specialist subtask.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use crate::budget::{BudgetController, ProgressKind};
use crate::config::RuntimeConfig;
use crate::context::{ContextFilter, SUMMARY_MARKER};
use crate::error::Result;
use crate::llm::{AncillaryNode, ChatOptions, LlmRouter, Tier};
use crate::memory::{
    extract_fact, ArchiveMemory, FactSheet, MemoryStore, SummarizationTask, Summarizer,
};
use crate::tools::{
    restore_tool_name, ToolCall, ToolExecutor, ToolPermissions, ToolRegistry, ToolResult,
};
use crate::trace::{TraceEvent, TraceWriter};

use super::classifier::TaskClassifier;
use super::loop_detector::{IterationSignature, LoopDetector, LoopSignal, StuckDetector};
use super::recovery::{recovery_hint, RecoveryAction, RecoveryAdvisor};
use super::types::{
    parse_termination_marker, AssistantToolCall, CancelToken, FunctionDefinition, GenerationOptions,
    IterationState, Message, Phase, ReasonCode, RunOutcome, Task, TaskResult, TerminationMarker,
    ToolDefinition,
};

/// Heartbeat interval while forced synthesis is in flight.
pub const SYNTH_HEARTBEAT_MS: u64 = 10_000;
/// Total cap on the forced-synthesis LLM call.
pub const SYNTH_TIMEOUT_MS: u64 = 90_000;

/// Name of the terminal report tool; intercepted by the loop, never
/// dispatched to the executor.
pub const REPORT_TOOL: &str = "report";

fn report_tool_definition() -> ToolDefinition {
    ToolDefinition {
        tool_type: "function".to_string(),
        function: FunctionDefinition {
            name: REPORT_TOOL.to_string(),
            description: "Report the final answer when the task is complete".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "answer": {"type": "string", "description": "The final answer"}
                },
                "required": ["answer"]
            }),
        },
    }
}

/// A task runner over one tool registry and LLM router.
pub struct IterationLoop {
    task: Task,
    system_prompt: String,
    llm: LlmRouter,
    registry: Arc<ToolRegistry>,
    permissions: ToolPermissions,
    config: RuntimeConfig,
    memory: MemoryStore,
    trace: Arc<TraceWriter>,
    cancel: CancelToken,
    initial_tier: Tier,
}

impl IterationLoop {
    /// Wire up a loop for `task`. Creates the trace file and the memory
    /// snapshot directory under the task working directory.
    pub fn new(
        task: Task,
        llm: LlmRouter,
        registry: Arc<ToolRegistry>,
        config: RuntimeConfig,
    ) -> Result<Self> {
        let trace = Arc::new(TraceWriter::create(&task.working_dir, &task.id)?);
        let memory = MemoryStore::new(
            FactSheet::new(config.memory.max_entries, config.memory.max_tokens_estimate),
            ArchiveMemory::create(
                &task.working_dir,
                &task.session_id,
                config.memory.archive_max_entries,
                config.memory.archive_max_total_chars,
            )?,
        );
        Ok(IterationLoop {
            system_prompt: default_system_prompt(&task),
            task,
            llm,
            registry,
            permissions: ToolPermissions::allow_all(),
            config,
            memory,
            trace,
            cancel: CancelToken::new(),
            initial_tier: Tier::Small,
        })
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.initial_tier = tier;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn trace(&self) -> &TraceWriter {
        &self.trace
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    /// Run the task to completion, walking the tier ladder on escalation
    /// signals (bounded at three attempts overall).
    pub async fn run(&self) -> Result<TaskResult> {
        self.trace.record(
            0,
            TraceEvent::TaskStart {
                task_id: self.task.id.clone(),
                session_id: self.task.session_id.clone(),
                goal: self.task.goal.clone(),
                mode: format!("{:?}", self.task.mode).to_lowercase(),
                tier: self.initial_tier,
            },
        )?;

        let classification = match self.llm.ancillary(AncillaryNode::Classification, self.initial_tier)
        {
            Ok(handle) => {
                TaskClassifier::new(handle, self.config.agent.max_iterations)
                    .classify(&self.task.goal)
                    .await
            }
            Err(_) => super::classifier::TaskClassification {
                intent: super::classifier::TaskIntent::Action,
                budget: self.config.agent.default_budget,
            },
        };
        self.trace.record(
            0,
            TraceEvent::DecisionPoint {
                decision: format!("budget:{}", classification.budget),
                confidence: 1.0,
                reason: format!("classified intent {:?}", classification.intent),
            },
        )?;

        let mut budget = BudgetController::new(
            classification.budget,
            self.initial_tier,
            self.config.tokens.clone(),
            self.config.agent.max_iterations,
        );

        loop {
            let outcome = self.run_tier(&mut budget).await?;
            match outcome {
                RunOutcome::Finished(result) => {
                    self.trace.record(
                        budget.iterations_used(),
                        TraceEvent::StoppingAnalysis {
                            reason_code: result.reason_code.to_string(),
                            iterations_used: result.iterations_used,
                            tokens_used: result.tokens_used,
                        },
                    )?;
                    if let Err(e) = self.memory.persist() {
                        warn!("memory snapshot failed: {}", e);
                    }
                    self.trace.close()?;
                    return Ok(result);
                }
                RunOutcome::Escalate { reason } => {
                    let escalated = if self.config.agent.enable_escalation {
                        budget.escalate(&reason)
                    } else {
                        None
                    };
                    match escalated {
                        Some(tier) => {
                            info!("escalating to tier {} ({})", tier, reason);
                            self.trace.record(
                                0,
                                TraceEvent::StatusChange {
                                    status: "tier_escalated".into(),
                                    detail: format!("to {} ({})", tier, reason),
                                },
                            )?;
                        }
                        None => {
                            let result = self.finish(
                                &budget,
                                false,
                                format!("Task could not be completed: {}", reason),
                                ReasonCode::GiveUp,
                            );
                            self.trace.close()?;
                            return Ok(result);
                        }
                    }
                }
            }
        }
    }

    /// One run at the current tier, from a clean conversation state.
    async fn run_tier(&self, budget: &mut BudgetController) -> Result<RunOutcome> {
        let tier = budget.current_tier();
        let handle = self.llm.handle(tier)?;

        let context = Arc::new(ContextFilter::new(self.config.context.clone()));
        let executor = ToolExecutor::new(
            self.registry.clone(),
            self.permissions.clone(),
            context.clone(),
        );
        let summarizer = self
            .llm
            .ancillary(AncillaryNode::Summarization, tier)
            .ok()
            .map(|small| {
                Summarizer::spawn(
                    small,
                    Arc::new(self.memory.clone()),
                    Some(self.trace.clone()),
                    self.config.summarizer.queue_bound,
                )
            });
        let mut detector = LoopDetector::new();
        let mut stuck_detector = StuckDetector::new();
        let mut advisor = self
            .llm
            .ancillary(AncillaryNode::Reflection, tier)
            .ok()
            .map(RecoveryAdvisor::new);

        context.history().append(Message::system(&self.system_prompt));
        context.history().append(Message::user(&self.task.goal));

        let mut prev_executed_tools = false;
        let mut prev_content_empty = false;
        let mut prev_was_pause = false;
        let mut last_summarized_iter: u32 = 0;
        let mut recovery_attempted = false;

        let outcome = 'iterations: loop {
            // --- Pre-flight ------------------------------------------------
            if self.cancel.is_cancelled() {
                break self.abort_outcome(budget);
            }
            if budget.hard_limit_reached() {
                break self.hard_limit_outcome(budget, &context, &handle).await;
            }
            if budget.iterations_exhausted() {
                break RunOutcome::Finished(self.finish(
                    budget,
                    false,
                    "Iteration budget exhausted without a final answer.".into(),
                    ReasonCode::MaxIterationsExhausted,
                ));
            }

            let iteration = budget.start_iteration();
            let iter_start = Instant::now();
            let started_at = chrono::Utc::now();
            let phase = phase_for(iteration, budget);
            info!(
                "iteration {}/{} (tier {}, phase {:?})",
                iteration,
                budget.budget().iterations_max,
                tier,
                phase
            );

            // --- Tool-set selection ---------------------------------------
            let forced_reasoning = prev_executed_tools && prev_content_empty;
            let (definitions, offered, excluded) = if forced_reasoning {
                (Vec::new(), Vec::new(), Vec::new())
            } else {
                self.select_tools(budget)
            };
            self.trace.record(
                iteration,
                TraceEvent::ToolFilter {
                    offered: offered.clone(),
                    excluded,
                    forced_reasoning,
                },
            )?;

            // --- LLM call --------------------------------------------------
            let (projected, trimmed) = context.project();
            if trimmed > 0 {
                self.trace.record(
                    iteration,
                    TraceEvent::ContextTrim {
                        messages_total: context.history().len(),
                        messages_sent: projected.len(),
                        trimmed,
                    },
                )?;
            }
            let messages = self.inject_facts(projected);
            let options = ChatOptions {
                tools: definitions,
                tool_choice: None,
                generation: GenerationOptions {
                    temperature: Some(self.config.agent.temperature),
                    max_tokens: self.config.agent.max_tokens,
                    ..Default::default()
                },
            };

            let tools_offered = offered.len();
            let message_count = messages.len();
            let messages_digest = format!(
                "{:016x}",
                crate::context::hash_key(&serde_json::to_string(&messages).unwrap_or_default())
            );
            let reply = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break self.abort_outcome(budget),
                reply = handle.chat_with_tools(messages, options) => reply,
            };
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    self.trace.record(
                        iteration,
                        TraceEvent::ErrorCaptured {
                            kind: e.code().to_string(),
                            message: e.to_string(),
                        },
                    )?;
                    break RunOutcome::Finished(self.finish(
                        budget,
                        false,
                        format!("LLM call failed: {}", e),
                        ReasonCode::LlmError,
                    ));
                }
            };
            budget.record_usage(&reply.usage);
            self.trace.record(
                iteration,
                TraceEvent::LlmCall {
                    tier,
                    model: reply.model.clone(),
                    messages: message_count,
                    tools_offered,
                    prompt_tokens: reply.usage.prompt_tokens,
                    completion_tokens: reply.usage.completion_tokens,
                    tool_calls_returned: reply.tool_calls.len(),
                    content_chars: reply.content.chars().count(),
                },
            )?;

            if budget.take_soft_nudge() {
                context.history().append(
                    Message::user(
                        "Token budget is running low. Stop broad exploration and converge on \
                         a final answer using what you already have.",
                    )
                    .at_iteration(iteration),
                );
            }

            // --- Report tool: terminal regardless of other calls ----------
            if let Some(answer) = find_report_answer(&reply.tool_calls) {
                break RunOutcome::Finished(self.finish(
                    budget,
                    true,
                    answer,
                    ReasonCode::ReportComplete,
                ));
            }

            // --- Tool dispatch --------------------------------------------
            let tool_calls: Vec<ToolCall> = if forced_reasoning {
                Vec::new()
            } else {
                reply.tool_calls.iter().map(to_tool_call).collect()
            };

            if !tool_calls.is_empty() {
                context.history().append(
                    Message::assistant_with_calls(reply.content.clone(), reply.tool_calls.clone())
                        .at_iteration(iteration),
                );

                let mut results: Vec<ToolResult> = Vec::new();
                for call in &tool_calls {
                    if self.cancel.is_cancelled() {
                        break 'iterations self.abort_outcome(budget);
                    }
                    let result = executor.execute(call, iteration).await;
                    self.trace.record(
                        iteration,
                        TraceEvent::ToolExecution {
                            tool: call.name.clone(),
                            success: result.success,
                            duration_ms: result.duration_ms,
                            output_chars: result.output.chars().count(),
                            output_snippet: result.output.chars().take(160).collect(),
                            cached: result
                                .metadata
                                .as_ref()
                                .and_then(|m| m.get("cached"))
                                .and_then(|v| v.as_bool())
                                .unwrap_or(false),
                            error_code: result.error.as_ref().map(|e| e.code.clone()),
                        },
                    )?;
                    context
                        .history()
                        .append(Message::tool(&call.id, result.observation()).at_iteration(iteration));
                    self.record_observation(budget, iteration, call, &result)?;
                    results.push(result);
                }

                let state = IterationState {
                    seq: iteration,
                    started_at,
                    tier,
                    messages_digest,
                    tool_calls,
                    tool_results: results,
                    tokens_consumed: reply.usage.total(),
                    phase,
                };
                let failed = state
                    .tool_results
                    .iter()
                    .filter(|r| !r.success)
                    .count() as u32;
                self.trace.record(
                    iteration,
                    TraceEvent::IterationDetail {
                        phase,
                        tool_calls: state.tool_calls.iter().map(|c| c.name.clone()).collect(),
                        failed_tool_calls: failed,
                        duration_ms: iter_start.elapsed().as_millis() as u64,
                    },
                )?;

                // Periodic async summarization
                if let Some(summarizer) = &summarizer {
                    if iteration - last_summarized_iter >= self.config.summarizer.interval {
                        summarizer.enqueue(SummarizationTask {
                            start_iter: last_summarized_iter + 1,
                            end_iter: iteration,
                            snapshot: context.get_history_snapshot(),
                        });
                        last_summarized_iter = iteration;
                    }
                }

                // Detection
                let signature =
                    IterationSignature::build(&state.tool_calls, &state.tool_results, &reply.content);
                if let Some(hash) = signature.set_hash() {
                    if context.record_signature(hash) {
                        debug!("coarse repeated tool-call-set signature observed");
                    }
                }
                if let Some(signal) = detector.record(&signature) {
                    break self.loop_detected_outcome(budget, signal, &state.tool_calls);
                }
                if let Some(stuck) = stuck_detector.record(signature) {
                    self.trace.record(
                        iteration,
                        TraceEvent::ErrorCaptured {
                            kind: "stuck".into(),
                            message: stuck.reason.clone(),
                        },
                    )?;
                    let dominant = state.tool_calls.first().map(|c| c.name.clone());
                    let action = match (&mut advisor, recovery_attempted) {
                        (Some(advisor), false) => {
                            recovery_attempted = true;
                            let errors: String = state
                                .tool_results
                                .iter()
                                .filter(|r| !r.success)
                                .map(|r| r.observation())
                                .collect::<Vec<_>>()
                                .join("\n");
                            advisor
                                .advise(&stuck.reason, dominant.as_deref(), &errors)
                                .await
                        }
                        _ => RecoveryAction::GiveUp,
                    };
                    self.trace.record(
                        iteration,
                        TraceEvent::DecisionPoint {
                            decision: format!("recovery:{:?}", action),
                            confidence: stuck.confidence,
                            reason: stuck.reason.clone(),
                        },
                    )?;
                    match action {
                        RecoveryAction::Escalate => {
                            break RunOutcome::Escalate {
                                reason: "stuck_reasoning".into(),
                            }
                        }
                        RecoveryAction::GiveUp => {
                            break RunOutcome::Finished(self.finish(
                                budget,
                                false,
                                format!("Stopped after repeated failures: {}", stuck.reason),
                                ReasonCode::Stuck,
                            ));
                        }
                        action => {
                            let hint = recovery_hint(action, dominant.as_deref());
                            context
                                .history()
                                .append(Message::system(hint).at_iteration(iteration));
                            stuck_detector.reset();
                        }
                    }
                }

                if let Some(new_max) = budget.maybe_extend() {
                    self.trace.record(
                        iteration,
                        TraceEvent::StatusChange {
                            status: "budget_extended".into(),
                            detail: format!("iterations_max now {}", new_max),
                        },
                    )?;
                }

                // Budget reached while the model still wants tools: synthesize.
                if budget.iterations_exhausted() {
                    break self
                        .max_iterations_outcome(budget, &context, &handle)
                        .await;
                }

                prev_executed_tools = true;
                prev_content_empty = reply.content.trim().is_empty();
                prev_was_pause = false;
                continue;
            }

            // --- No tool calls --------------------------------------------
            context
                .history()
                .append(Message::assistant(reply.content.clone()).at_iteration(iteration));
            self.trace.record(
                iteration,
                TraceEvent::IterationDetail {
                    phase,
                    tool_calls: Vec::new(),
                    failed_tool_calls: 0,
                    duration_ms: iter_start.elapsed().as_millis() as u64,
                },
            )?;

            let terminate_here = !prev_was_pause;
            prev_executed_tools = false;
            prev_content_empty = false;
            prev_was_pause = forced_reasoning;

            if terminate_here {
                match parse_termination_marker(&reply.content) {
                    Some(TerminationMarker::TaskComplete) => {
                        let answer = strip_marker(&reply.content);
                        break RunOutcome::Finished(self.finish(
                            budget,
                            true,
                            answer,
                            ReasonCode::TaskComplete,
                        ));
                    }
                    Some(TerminationMarker::NeedEscalation(reason)) => {
                        break RunOutcome::Escalate { reason };
                    }
                    Some(TerminationMarker::GiveUp(reason)) => {
                        break RunOutcome::Finished(self.finish(
                            budget,
                            false,
                            format!("The agent gave up: {}", reason),
                            ReasonCode::GiveUp,
                        ));
                    }
                    None => {
                        if reply.content.trim().is_empty() {
                            // Nothing to act on; give the model one more turn.
                            if budget.iterations_exhausted() {
                                break RunOutcome::Finished(self.finish(
                                    budget,
                                    false,
                                    "Model returned an empty response.".into(),
                                    ReasonCode::MaxIterationsExhausted,
                                ));
                            }
                            continue;
                        }
                        // Implicit success on a clean stop; validate the
                        // answer is not an inability statement first.
                        let refusal = looks_unsuccessful(&reply.content);
                        self.trace.record(
                            iteration,
                            TraceEvent::LlmValidation {
                                valid: !refusal,
                                violations: if refusal {
                                    vec!["inability_statement".into()]
                                } else {
                                    Vec::new()
                                },
                            },
                        )?;
                        if refusal && self.config.agent.enable_escalation {
                            break RunOutcome::Escalate {
                                reason: "tier_result_unsuccessful".into(),
                            };
                        }
                        break RunOutcome::Finished(self.finish(
                            budget,
                            true,
                            reply.content.clone(),
                            ReasonCode::TaskComplete,
                        ));
                    }
                }
            }
            // Reply following a pause that did not terminate: keep looping.
        };

        if let Some(summarizer) = summarizer {
            summarizer.shutdown().await;
        }
        self.trace.record(
            budget.iterations_used(),
            TraceEvent::MemorySnapshot {
                facts: self.memory.fact_count(),
                estimated_tokens: self.memory.estimated_tokens(),
                archived: self.memory.archived_count(),
            },
        )?;
        Ok(outcome)
    }

    /// Compute the tool subset offered this iteration.
    fn select_tools(
        &self,
        budget: &BudgetController,
    ) -> (Vec<ToolDefinition>, Vec<String>, Vec<String>) {
        let mut definitions = vec![report_tool_definition()];
        let mut offered = vec![REPORT_TOOL.to_string()];
        let mut excluded = Vec::new();

        let low_budget = budget.remaining_ratio() < self.config.agent.expensive_tool_prune_ratio;
        let soft_restricted =
            budget.soft_limit_reached() && budget.restrict_exploration_at_soft_limit();

        for name in self.registry.names() {
            if !self.permissions.permits(name) {
                excluded.push(name.to_string());
                continue;
            }
            let Some(tool) = self.registry.get(name) else {
                continue;
            };
            if tool.expensive() && (low_budget || soft_restricted) {
                excluded.push(name.to_string());
                continue;
            }
            definitions.push(tool.to_definition());
            offered.push(name.to_string());
        }
        (definitions, offered, excluded)
    }

    /// Insert the fact sheet after the head of the projection.
    fn inject_facts(&self, mut messages: Vec<Message>) -> Vec<Message> {
        if self.memory.fact_count() == 0 {
            return messages;
        }
        let facts = format!("{} Known facts:\n{}", SUMMARY_MARKER, self.memory.render_facts());
        let insert_at = messages
            .iter()
            .position(|m| m.role != super::types::Role::System)
            .unwrap_or(messages.len());
        messages.insert(insert_at, Message::system(facts));
        messages
    }

    /// Record facts and progress signals from one tool observation.
    fn record_observation(
        &self,
        budget: &mut BudgetController,
        iteration: u32,
        call: &ToolCall,
        result: &ToolResult,
    ) -> Result<()> {
        if !result.success {
            return Ok(());
        }
        match call.name.as_str() {
            "fs:read" => budget.note_progress(iteration, ProgressKind::FileRead),
            "fs:search" => {
                let matched = result
                    .metadata
                    .as_ref()
                    .and_then(|m| m.get("matches"))
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                if matched > 0 {
                    budget.note_progress(iteration, ProgressKind::SearchSignal);
                }
            }
            _ => {}
        }
        if let Some(fact) = extract_fact(call, result, iteration) {
            self.trace.record(
                iteration,
                TraceEvent::FactAdded {
                    category: fact.category.to_string(),
                    confidence: fact.confidence,
                    source: fact.source.clone(),
                },
            )?;
            self.memory.add_fact(fact);
            budget.note_progress(iteration, ProgressKind::NewFact);
        }
        Ok(())
    }

    fn abort_outcome(&self, budget: &BudgetController) -> RunOutcome {
        RunOutcome::Finished(self.finish(
            budget,
            false,
            "Task aborted by cancellation signal.".into(),
            ReasonCode::AbortSignal,
        ))
    }

    fn loop_detected_outcome(
        &self,
        budget: &BudgetController,
        signal: LoopSignal,
        calls: &[ToolCall],
    ) -> RunOutcome {
        let attempted: Vec<String> = calls
            .iter()
            .map(|c| format!("{}({})", c.name, c.input))
            .collect();
        let detail = match signal {
            LoopSignal::ExactRepeat { .. } => "identical tool calls repeated".to_string(),
            LoopSignal::SequenceRepeat { sequence, .. } => {
                format!("tool sequence [{}] kept recurring", sequence)
            }
        };
        RunOutcome::Finished(self.finish(
            budget,
            false,
            format!(
                "Stopped: {}. Attempted calls: {}",
                detail,
                attempted.join(", ")
            ),
            ReasonCode::LoopDetected,
        ))
    }

    async fn hard_limit_outcome(
        &self,
        budget: &mut BudgetController,
        context: &ContextFilter,
        handle: &Arc<dyn crate::llm::LlmHandle>,
    ) -> RunOutcome {
        if budget.force_synthesis_on_hard_limit() {
            if let Some(answer) = self
                .force_synthesize(budget, context, handle, "hard_token_limit")
                .await
            {
                return RunOutcome::Finished(self.finish(
                    budget,
                    true,
                    answer,
                    ReasonCode::HardTokenLimit,
                ));
            }
        }
        let fallback = self.facts_fallback_answer();
        RunOutcome::Finished(self.finish(budget, true, fallback, ReasonCode::HardTokenLimit))
    }

    async fn max_iterations_outcome(
        &self,
        budget: &mut BudgetController,
        context: &ContextFilter,
        handle: &Arc<dyn crate::llm::LlmHandle>,
    ) -> RunOutcome {
        match self
            .force_synthesize(budget, context, handle, "max_iterations")
            .await
        {
            Some(answer) => {
                RunOutcome::Finished(self.finish(budget, true, answer, ReasonCode::MaxIterations))
            }
            None => RunOutcome::Finished(self.finish(
                budget,
                false,
                "Iteration budget exhausted and synthesis failed.".into(),
                ReasonCode::MaxIterationsExhausted,
            )),
        }
    }

    /// One final LLM call with no tools and a synthesis directive, under a
    /// heartbeat and a total timeout.
    async fn force_synthesize(
        &self,
        budget: &mut BudgetController,
        context: &ContextFilter,
        handle: &Arc<dyn crate::llm::LlmHandle>,
        reason: &str,
    ) -> Option<String> {
        let iteration = budget.iterations_used();
        let _ = self.trace.record(
            iteration,
            TraceEvent::SynthesisForced {
                reason: reason.to_string(),
            },
        );

        let (projected, _) = context.project();
        let mut messages = vec![Message::system(
            "Emit only a final answer using the information already in this context. \
             Do not request tools.",
        )];
        messages.extend(self.inject_facts(projected));
        let options = ChatOptions {
            tools: Vec::new(),
            tool_choice: None,
            generation: GenerationOptions::balanced(),
        };

        let call = handle.chat_with_tools(messages, options);
        tokio::pin!(call);
        let deadline = tokio::time::sleep(Duration::from_millis(SYNTH_TIMEOUT_MS));
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                reply = &mut call => {
                    return match reply {
                        Ok(reply) => {
                            budget.record_usage(&reply.usage);
                            if reply.content.trim().is_empty() {
                                None
                            } else {
                                Some(reply.content)
                            }
                        }
                        Err(e) => {
                            warn!("forced synthesis failed: {}", e);
                            None
                        }
                    };
                }
                _ = &mut deadline => {
                    warn!("forced synthesis timed out after {}ms", SYNTH_TIMEOUT_MS);
                    return None;
                }
                _ = tokio::time::sleep(Duration::from_millis(SYNTH_HEARTBEAT_MS)) => {
                    debug!("forced synthesis still in flight");
                }
            }
        }
    }

    /// Answer assembled from the fact sheet when synthesis is unavailable.
    fn facts_fallback_answer(&self) -> String {
        if self.memory.fact_count() == 0 {
            "Token budget exhausted before an answer could be produced.".to_string()
        } else {
            format!(
                "Token budget exhausted. What was established so far:\n{}",
                self.memory.render_facts()
            )
        }
    }

    fn finish(
        &self,
        budget: &BudgetController,
        success: bool,
        answer: String,
        reason_code: ReasonCode,
    ) -> TaskResult {
        TaskResult {
            success,
            answer,
            iterations_used: budget.iterations_used(),
            tokens_used: budget.tokens_used(),
            reason_code,
            summary: summarize_result(reason_code, budget),
        }
    }
}

/// Phase for an iteration: scoping, light planning, then executing until
/// the budget tail turns it into converging.
fn phase_for(iteration: u32, budget: &BudgetController) -> Phase {
    if iteration == 1 {
        Phase::Scoping
    } else if iteration == 2 {
        Phase::PlanningLite
    } else if budget.remaining_ratio() <= 0.2 {
        Phase::Converging
    } else {
        Phase::Executing
    }
}

/// Convert a wire tool call into the dispatch form (restored name, parsed
/// arguments; malformed argument JSON becomes an empty object).
fn to_tool_call(tc: &AssistantToolCall) -> ToolCall {
    let name = restore_tool_name(&tc.function.name);
    let input = serde_json::from_str(&tc.function.arguments).unwrap_or_else(|e| {
        warn!("failed to parse arguments for {}: {}", name, e);
        json!({})
    });
    ToolCall::new(tc.id.clone(), name, input)
}

/// Extract the answer from a `report` tool call, if present.
fn find_report_answer(calls: &[AssistantToolCall]) -> Option<String> {
    calls
        .iter()
        .find(|c| restore_tool_name(&c.function.name) == REPORT_TOOL)
        .map(|c| {
            serde_json::from_str::<serde_json::Value>(&c.function.arguments)
                .ok()
                .and_then(|v| v.get("answer").and_then(|a| a.as_str()).map(String::from))
                .unwrap_or_default()
        })
}

fn strip_marker(text: &str) -> String {
    text.replace("[TASK_COMPLETE]", "").trim().to_string()
}

/// Clean stops that are inability statements escalate instead of passing
/// as implicit success.
fn looks_unsuccessful(answer: &str) -> bool {
    let lowered = answer.trim().to_lowercase();
    ["i cannot", "i can't", "i am unable", "i'm unable"]
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

/// Terminal summary with reason code, counters, and suggested next steps.
fn summarize_result(reason: ReasonCode, budget: &BudgetController) -> String {
    let mut summary = format!(
        "reason={} iterations={}/{} tokens={} tier={}",
        reason,
        budget.iterations_used(),
        budget.budget().iterations_max,
        budget.tokens_used(),
        budget.current_tier(),
    );
    let suggestion = match reason {
        ReasonCode::MaxIterations | ReasonCode::MaxIterationsExhausted => {
            Some("increase the iteration budget or narrow the task scope")
        }
        ReasonCode::LoopDetected => Some("narrow the scope or provide an exact file path"),
        ReasonCode::Stuck => Some("provide an exact file path or rephrase the goal"),
        ReasonCode::HardTokenLimit => Some("raise the token budget or split the task"),
        ReasonCode::GiveUp => Some("rephrase the goal with more context"),
        _ => None,
    };
    if let Some(suggestion) = suggestion {
        summary.push_str(&format!("; suggested next steps: {}", suggestion));
    }
    summary
}

/// Default system prompt for a bare task run.
fn default_system_prompt(task: &Task) -> String {
    format!(
        "You are an autonomous agent working in {}. Use the available tools to \
         accomplish the task, then report the final answer with the report tool \
         or end with [TASK_COMPLETE]. If the task is beyond your capability, \
         emit [NEED_ESCALATION:reason]; if it is impossible, emit [GIVE_UP:reason].",
        task.working_dir.display()
    )
}
