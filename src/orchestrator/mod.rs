//! Hierarchical orchestration: plan, execute, adapt, synthesize
//!
//! The orchestrator decomposes a goal into subtasks with a large-tier
//! planner, delegates each to a specialist (an iteration loop with its own
//! identity, tier, and permissions), retries and walks the escalation
//! ladder on failure, adapts the plan when specialists report actionable
//! findings, and synthesizes a final answer from the subtask outputs.

pub mod findings;
pub mod planner;
pub mod types;

pub use findings::FindingsStore;
pub use planner::{Planner, PLAN_TOOL, REVISE_TOOL};
pub use types::{
    Complexity, ExecutionPlan, FailureKind, Finding, Severity, SpecialistFailure,
    SpecialistOutcome, SpecialistProfile, SpecialistSuccess, Subtask, SuggestedAction,
};

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::agent::types::{GenerationOptions, Task, TaskResult};
use crate::agent::IterationLoop;
use crate::config::{OrchestratorConfig, RuntimeConfig};
use crate::error::Result;
use crate::llm::{CompletionOptions, LlmRouter, Tier};
use crate::memory::SessionState;
use crate::tools::{ToolPermissions, ToolRegistry};
use crate::verifier::SpecialistVerifier;

/// Relative cost units per tier, accumulated per specialist attempt.
fn tier_cost(tier: Tier) -> u64 {
    match tier {
        Tier::Small => 1,
        Tier::Medium => 3,
        Tier::Large => 10,
    }
}

/// Executes one subtask at one tier. The default implementation runs an
/// `IterationLoop`; tests inject scripted runners.
#[async_trait]
pub trait SpecialistRunner: Send + Sync {
    async fn run(
        &self,
        subtask: &Subtask,
        profile: &SpecialistProfile,
        tier: Tier,
        prior_results: &str,
    ) -> SpecialistOutcome;
}

/// Default runner: one `IterationLoop` per subtask.
pub struct LoopSpecialistRunner {
    llm: LlmRouter,
    registry: Arc<ToolRegistry>,
    config: RuntimeConfig,
    working_dir: PathBuf,
    session_id: String,
}

impl LoopSpecialistRunner {
    pub fn new(
        llm: LlmRouter,
        registry: Arc<ToolRegistry>,
        config: RuntimeConfig,
        working_dir: PathBuf,
        session_id: String,
    ) -> Self {
        LoopSpecialistRunner {
            llm,
            registry,
            config,
            working_dir,
            session_id,
        }
    }
}

#[async_trait]
impl SpecialistRunner for LoopSpecialistRunner {
    async fn run(
        &self,
        subtask: &Subtask,
        profile: &SpecialistProfile,
        tier: Tier,
        prior_results: &str,
    ) -> SpecialistOutcome {
        let task_id = format!("{}-{}", self.session_id, subtask.id);
        let task = Task {
            id: task_id.clone(),
            goal: subtask.description.clone(),
            mode: Default::default(),
            working_dir: self.working_dir.clone(),
            session_id: self.session_id.clone(),
            parent_agent_id: Some("orchestrator".to_string()),
        };

        let mut system_prompt = profile.identity_prompt.clone();
        if !prior_results.is_empty() {
            system_prompt.push_str("\n\nResults from earlier subtasks:\n");
            system_prompt.push_str(prior_results);
        }
        let permissions = match &profile.allowed_tools {
            Some(tools) => ToolPermissions::allow_only(tools.iter().cloned()),
            None => ToolPermissions::allow_all(),
        };

        // One escalation attempt per ladder rung is the orchestrator's job;
        // the inner loop must not walk the ladder on its own.
        let mut config = self.config.clone();
        config.agent.enable_escalation = false;

        let outcome = match IterationLoop::new(
            task,
            self.llm.clone(),
            self.registry.clone(),
            config,
        ) {
            Ok(agent) => {
                agent
                    .with_system_prompt(system_prompt)
                    .with_permissions(permissions)
                    .with_tier(tier)
                    .run()
                    .await
            }
            Err(e) => {
                return SpecialistOutcome::Failure(SpecialistFailure {
                    kind: FailureKind::ToolError,
                    message: format!("specialist setup failed: {}", e),
                    suggested_retry: false,
                    partial: None,
                })
            }
        };

        match outcome {
            Ok(result) if result.success => {
                let findings = parse_findings(&result.answer);
                SpecialistOutcome::Ok(SpecialistSuccess {
                    output: result.answer,
                    tokens_used: result.tokens_used,
                    trace_ref: Some(task_id),
                    findings,
                })
            }
            Ok(result) => SpecialistOutcome::Failure(task_failure(result)),
            Err(e) => SpecialistOutcome::Failure(SpecialistFailure {
                kind: FailureKind::LlmError,
                message: e.to_string(),
                suggested_retry: e.is_retryable(),
                partial: None,
            }),
        }
    }
}

/// Specialists report structured findings by emitting a JSON object with a
/// `findings` array as their answer; plain-text answers carry none.
fn parse_findings(answer: &str) -> Vec<Finding> {
    let trimmed = answer.trim();
    if !trimmed.starts_with('{') {
        return Vec::new();
    }
    serde_json::from_str::<Value>(trimmed)
        .ok()
        .and_then(|v| v.get("findings").cloned())
        .and_then(|f| serde_json::from_value(f).ok())
        .unwrap_or_default()
}

/// Map an unsuccessful task result onto a specialist failure.
fn task_failure(result: TaskResult) -> SpecialistFailure {
    use crate::agent::types::ReasonCode;
    let (kind, suggested_retry) = match result.reason_code {
        ReasonCode::LlmError => (FailureKind::LlmError, true),
        ReasonCode::MaxIterations | ReasonCode::MaxIterationsExhausted => {
            (FailureKind::MaxIterations, false)
        }
        ReasonCode::AbortSignal => (FailureKind::Timeout, false),
        _ => (FailureKind::ToolError, false),
    };
    SpecialistFailure {
        kind,
        suggested_retry,
        message: result.summary,
        partial: if result.answer.is_empty() {
            None
        } else {
            Some(result.answer)
        },
    }
}

/// Result of one subtask, as recorded by the orchestrator.
#[derive(Debug, Clone)]
pub struct SubtaskRecord {
    pub subtask_id: String,
    pub outcome: SpecialistOutcome,
    /// Skipped because a dependency failed
    pub skipped: bool,
}

/// Final output of an orchestrator session.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    pub answer: String,
    pub success: bool,
    pub records: Vec<SubtaskRecord>,
    pub plan: ExecutionPlan,
    pub cost_units: u64,
}

/// A positive progress decision from the large-tier check.
enum Decision {
    Solved(String),
    Cancel(String),
}

/// The plan-execute-synthesize engine.
pub struct Orchestrator {
    llm: LlmRouter,
    specialists: Vec<SpecialistProfile>,
    runner: Arc<dyn SpecialistRunner>,
    config: OrchestratorConfig,
    working_dir: PathBuf,
    session: SessionState,
    findings: FindingsStore,
}

impl Orchestrator {
    pub fn new(
        llm: LlmRouter,
        specialists: Vec<SpecialistProfile>,
        runner: Arc<dyn SpecialistRunner>,
        config: OrchestratorConfig,
        working_dir: PathBuf,
        session_id: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        Orchestrator {
            llm,
            specialists,
            runner,
            config,
            working_dir,
            session: SessionState::new(session_id),
            findings: FindingsStore::new(),
        }
    }

    /// Convenience constructor wiring the default loop-backed runner.
    pub fn with_loop_runner(
        llm: LlmRouter,
        specialists: Vec<SpecialistProfile>,
        runtime: RuntimeConfig,
        registry: Arc<ToolRegistry>,
        working_dir: PathBuf,
        session_id: impl Into<String>,
    ) -> Self {
        let session_id = session_id.into();
        let runner = Arc::new(LoopSpecialistRunner::new(
            llm.clone(),
            registry,
            runtime.clone(),
            working_dir.clone(),
            session_id.clone(),
        ));
        Self::new(
            llm,
            specialists,
            runner,
            runtime.orchestrator,
            working_dir,
            session_id,
        )
    }

    pub fn findings(&self) -> &FindingsStore {
        &self.findings
    }

    fn profile(&self, specialist_id: &str) -> Option<&SpecialistProfile> {
        self.specialists.iter().find(|p| p.id == specialist_id)
    }

    /// Run the whole session. Cleanup runs on every exit path.
    pub async fn run(&mut self, goal: &str) -> Result<OrchestratorResult> {
        let result = self.run_inner(goal).await;
        self.cleanup();
        result
    }

    async fn run_inner(&mut self, goal: &str) -> Result<OrchestratorResult> {
        let specialist_ids: Vec<&str> =
            self.specialists.iter().map(|p| p.id.as_str()).collect();
        let planner = Planner::new(self.llm.handle(Tier::Large)?);
        let mut plan = planner.create_plan(goal, &specialist_ids).await?;
        info!("plan created with {} subtask(s)", plan.subtasks.len());

        let mut records: Vec<SubtaskRecord> = Vec::new();
        let mut unsuccessful: HashSet<String> = HashSet::new();
        let mut outputs: Vec<(String, String)> = Vec::new();
        let mut cost_units: u64 = 0;
        let mut stop_reason: Option<String> = None;

        let mut idx = 0;
        while idx < plan.subtasks.len() {
            let subtask = plan.subtasks[idx].clone();

            if subtask
                .dependencies
                .iter()
                .any(|dep| unsuccessful.contains(dep))
            {
                warn!("skipping {}: dependency failed", subtask.id);
                unsuccessful.insert(subtask.id.clone());
                records.push(SubtaskRecord {
                    subtask_id: subtask.id.clone(),
                    outcome: SpecialistOutcome::Failure(SpecialistFailure {
                        kind: FailureKind::ToolError,
                        message: "skipped: dependency failed".into(),
                        suggested_retry: false,
                        partial: None,
                    }),
                    skipped: true,
                });
                idx += 1;
                continue;
            }

            let Some(profile) = self.profile(&subtask.specialist_id).cloned() else {
                // Validation guarantees this; adaptation-injected subtasks
                // could still name an unknown specialist.
                unsuccessful.insert(subtask.id.clone());
                records.push(SubtaskRecord {
                    subtask_id: subtask.id.clone(),
                    outcome: SpecialistOutcome::Failure(SpecialistFailure {
                        kind: FailureKind::ToolError,
                        message: format!("unknown specialist {}", subtask.specialist_id),
                        suggested_retry: false,
                        partial: None,
                    }),
                    skipped: true,
                });
                idx += 1;
                continue;
            };

            let prior = outputs
                .iter()
                .map(|(id, output)| format!("[{}] {}", id, output))
                .collect::<Vec<_>>()
                .join("\n");
            let (outcome, cost) = self
                .execute_with_escalation(&subtask, &profile, &prior)
                .await;
            cost_units += cost;

            match &outcome {
                SpecialistOutcome::Ok(success) => {
                    outputs.push((subtask.id.clone(), success.output.clone()));
                    for finding in &success.findings {
                        self.session.push_finding(format!(
                            "[{:?}] {}",
                            finding.severity, finding.title
                        ));
                    }
                    self.findings.insert(
                        &self.session.session_id,
                        &subtask.id,
                        success.findings.clone(),
                    );

                    // Conditional adaptation
                    if success.findings.iter().any(Finding::triggers_adaptation) {
                        if let Some(injected) = planner
                            .propose_adaptation(
                                &subtask,
                                &success.findings,
                                self.config.adaptation_confidence,
                            )
                            .await
                        {
                            plan.subtasks.splice(idx + 1..idx + 1, injected);
                        }
                    }

                    records.push(SubtaskRecord {
                        subtask_id: subtask.id.clone(),
                        outcome,
                        skipped: false,
                    });

                    // Early stop / cancel, only with at least 2 remaining
                    let remaining = plan.subtasks.len() - idx - 1;
                    if remaining >= 2 {
                        match self.progress_decision(goal, &outputs, remaining).await {
                            Some(Decision::Solved(reason)) => {
                                info!("early stop: {}", reason);
                                stop_reason = Some(format!("solved early: {}", reason));
                                break;
                            }
                            Some(Decision::Cancel(reason)) => {
                                warn!("cancelling remaining plan: {}", reason);
                                stop_reason = Some(format!("cancelled: {}", reason));
                                break;
                            }
                            None => {}
                        }
                    }
                }
                SpecialistOutcome::Failure(failure) => {
                    warn!("subtask {} failed: {}", subtask.id, failure.message);
                    unsuccessful.insert(subtask.id.clone());
                    let priority = subtask.priority;
                    records.push(SubtaskRecord {
                        subtask_id: subtask.id.clone(),
                        outcome,
                        skipped: false,
                    });
                    if priority >= self.config.abort_priority {
                        warn!(
                            "priority {} failure aborts the remaining plan",
                            priority
                        );
                        stop_reason = Some("high-priority subtask failed".into());
                        break;
                    }
                }
            }
            idx += 1;
        }

        let (answer, synthesized) = self.synthesize(goal, &outputs, stop_reason.as_deref()).await;
        let success = !outputs.is_empty() && synthesized;
        self.session.set_summary(answer.clone());

        Ok(OrchestratorResult {
            answer,
            success,
            records,
            plan,
            cost_units,
        })
    }

    /// Walk the specialist's escalation ladder, retrying per tier.
    async fn execute_with_escalation(
        &self,
        subtask: &Subtask,
        profile: &SpecialistProfile,
        prior: &str,
    ) -> (SpecialistOutcome, u64) {
        let mut cost = 0;
        let mut last: Option<SpecialistOutcome> = None;
        for tier in profile.ladder() {
            let outcome = self
                .execute_with_retry(subtask, profile, tier, prior, &mut cost)
                .await;
            if outcome.is_ok() {
                return (outcome, cost);
            }
            warn!(
                "subtask {} unsuccessful at tier {}, walking ladder",
                subtask.id, tier
            );
            last = Some(outcome);
        }
        let outcome = last.unwrap_or_else(|| {
            SpecialistOutcome::Failure(SpecialistFailure {
                kind: FailureKind::LlmError,
                message: "specialist has an empty escalation ladder".into(),
                suggested_retry: false,
                partial: None,
            })
        });
        (outcome, cost)
    }

    /// Retry within one tier with exponential backoff, gated on
    /// `suggested_retry`. Verification failures count as retryable.
    async fn execute_with_retry(
        &self,
        subtask: &Subtask,
        profile: &SpecialistProfile,
        tier: Tier,
        prior: &str,
        cost: &mut u64,
    ) -> SpecialistOutcome {
        let max_attempts = 1 + self.config.max_retries_per_tier;
        let mut last: Option<SpecialistOutcome> = None;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                let backoff = Duration::from_secs(1u64 << (attempt - 2));
                tokio::time::sleep(backoff).await;
            }
            *cost += tier_cost(tier);

            match self.runner.run(subtask, profile, tier, prior).await {
                SpecialistOutcome::Ok(success) => {
                    let verification = SpecialistVerifier::verify(&success, &self.working_dir);
                    if verification.valid {
                        return SpecialistOutcome::Ok(success);
                    }
                    warn!(
                        "subtask {} output failed verification: {}",
                        subtask.id,
                        verification.violations.join("; ")
                    );
                    last = Some(SpecialistOutcome::Failure(SpecialistFailure {
                        kind: FailureKind::VerificationFailed,
                        message: verification.violations.join("; "),
                        suggested_retry: true,
                        partial: Some(success.output),
                    }));
                }
                SpecialistOutcome::Failure(failure) => {
                    let retry = failure.suggested_retry;
                    last = Some(SpecialistOutcome::Failure(failure));
                    if !retry {
                        break;
                    }
                }
            }
        }
        last.expect("at least one attempt ran")
    }

    /// One large-tier check: has the goal been solved already, or should
    /// the remaining plan be cancelled? Acts only on positive decisions
    /// with enough confidence.
    async fn progress_decision(
        &self,
        goal: &str,
        outputs: &[(String, String)],
        remaining: usize,
    ) -> Option<Decision> {
        let handle = self.llm.handle(Tier::Large).ok()?;
        let rollup: String = outputs
            .iter()
            .map(|(id, output)| format!("[{}] {}", id, output))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            r#"Task: {}

Completed subtask outputs:
{}

{} subtask(s) remain. Reply ONLY with JSON, either
{{"is_solved": true|false, "confidence": 0.0, "reason": "..."}} or
{{"should_cancel": true|false, "confidence": 0.0, "reason": "..."}}"#,
            goal, rollup, remaining
        );

        let completion = handle
            .complete(
                &prompt,
                CompletionOptions {
                    generation: GenerationOptions::precise(),
                    system_prompt: None,
                },
            )
            .await
            .ok()?;
        let parsed: Value = serde_json::from_str(completion.content.trim()).ok()?;
        let confidence = parsed.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0);
        if confidence < self.config.decision_confidence {
            return None;
        }
        let reason = parsed
            .get("reason")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        if parsed.get("is_solved").and_then(|v| v.as_bool()) == Some(true) {
            return Some(Decision::Solved(reason));
        }
        if parsed.get("should_cancel").and_then(|v| v.as_bool()) == Some(true) {
            return Some(Decision::Cancel(reason));
        }
        None
    }

    /// Large-tier synthesis over the subtask roll-up, with a concatenation
    /// fallback when synthesis fails but at least one specialist succeeded.
    async fn synthesize(
        &self,
        goal: &str,
        outputs: &[(String, String)],
        stop_reason: Option<&str>,
    ) -> (String, bool) {
        if outputs.is_empty() {
            return (
                format!(
                    "No subtask produced output{}",
                    stop_reason
                        .map(|r| format!(" ({})", r))
                        .unwrap_or_default()
                ),
                false,
            );
        }

        let rollup: String = outputs
            .iter()
            .map(|(id, output)| format!("### {}\n{}", id, output))
            .collect::<Vec<_>>()
            .join("\n\n");
        let prompt = format!(
            "Task: {}\n\nSubtask results:\n{}\n\nProduce the final answer for the task.",
            goal, rollup
        );

        let synthesized = match self.llm.handle(Tier::Large) {
            Ok(handle) => {
                handle
                    .complete(
                        &prompt,
                        CompletionOptions {
                            generation: GenerationOptions::balanced(),
                            system_prompt: None,
                        },
                    )
                    .await
            }
            Err(e) => Err(e),
        };

        match synthesized {
            Ok(completion) if !completion.content.trim().is_empty() => {
                (completion.content, true)
            }
            Ok(_) | Err(_) => {
                warn!("synthesis failed, falling back to partial results");
                (format!("Partial Results\n\n{}", rollup), true)
            }
        }
    }

    /// Best-effort end-of-session cleanup; never fails the orchestrator.
    fn cleanup(&mut self) {
        let session_id = self.session.session_id.clone();
        self.findings.prune_session(&session_id);
        self.session.clear();
        let tmp = self.working_dir.join(".kb/tmp").join(&session_id);
        if tmp.is_dir() {
            if let Err(e) = std::fs::remove_dir_all(&tmp) {
                warn!("session temp cleanup failed (ignored): {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::types::ReasonCode;

    #[test]
    fn findings_parse_from_json_answers() {
        let answer = serde_json::json!({
            "summary": "audit finished",
            "findings": [{
                "id": "finding-1",
                "severity": "high",
                "category": "bug",
                "title": "overflow in parser",
                "description": "long inputs overflow",
                "actionable": true
            }]
        })
        .to_string();
        let findings = parse_findings(&answer);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::High);
        assert!(findings[0].triggers_adaptation());

        assert!(parse_findings("plain text answer").is_empty());
        assert!(parse_findings("{\"no_findings\": true}").is_empty());
    }

    #[test]
    fn failure_mapping_preserves_partials() {
        let result = TaskResult {
            success: false,
            answer: "partial notes".into(),
            iterations_used: 4,
            tokens_used: 900,
            reason_code: ReasonCode::LlmError,
            summary: "reason=llm_error".into(),
        };
        let failure = task_failure(result);
        assert_eq!(failure.kind, FailureKind::LlmError);
        assert!(failure.suggested_retry);
        assert_eq!(failure.partial.as_deref(), Some("partial notes"));
    }

    #[test]
    fn cost_table_orders_tiers() {
        assert!(tier_cost(Tier::Small) < tier_cost(Tier::Medium));
        assert!(tier_cost(Tier::Medium) < tier_cost(Tier::Large));
    }
}
