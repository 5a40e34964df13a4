//! Plan, subtask, outcome, and finding types for the orchestrator

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::Tier;

/// Rough effort estimate for a subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    Medium,
    High,
}

/// One unit of delegated work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique within the plan (`subtask-N` from the planner; adaptation may
    /// inject other ids such as `fix-1`)
    pub id: String,
    pub description: String,
    pub specialist_id: String,
    /// Ids of earlier subtasks this one depends on
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// 1..=10; failures at or above the abort threshold stop the plan
    pub priority: u8,
    pub estimated_complexity: Complexity,
    /// What the planner expects this subtask to produce
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_outcome: Option<String>,
}

/// An ordered plan over subtasks. Dependencies form a DAG; forward
/// references are forbidden.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub subtasks: Vec<Subtask>,
}

impl ExecutionPlan {
    /// Validate the plan: nonempty, unique ids, dependencies referring only
    /// to earlier subtasks, priorities in range, recognized specialists.
    pub fn validate<'a, I>(&self, known_specialists: I) -> Result<()>
    where
        I: IntoIterator<Item = &'a str>,
    {
        if self.subtasks.is_empty() {
            return Err(Error::PlanFailed("plan has no subtasks".into()));
        }
        let known: std::collections::HashSet<&str> = known_specialists.into_iter().collect();
        let mut seen: std::collections::HashSet<&str> = std::collections::HashSet::new();

        for subtask in &self.subtasks {
            if subtask.id.is_empty() || subtask.description.trim().is_empty() {
                return Err(Error::PlanFailed(format!(
                    "subtask {:?} has an empty id or description",
                    subtask.id
                )));
            }
            if !seen.insert(subtask.id.as_str()) {
                return Err(Error::PlanFailed(format!(
                    "duplicate subtask id: {}",
                    subtask.id
                )));
            }
            if !(1..=10).contains(&subtask.priority) {
                return Err(Error::PlanFailed(format!(
                    "subtask {} priority {} outside 1..=10",
                    subtask.id, subtask.priority
                )));
            }
            if !known.contains(subtask.specialist_id.as_str()) {
                return Err(Error::PlanFailed(format!(
                    "subtask {} names unknown specialist {}",
                    subtask.id, subtask.specialist_id
                )));
            }
            for dep in &subtask.dependencies {
                // `seen` holds this subtask and everything earlier, so a
                // dependency outside it is a forward or dangling reference.
                if dep == &subtask.id || !seen.contains(dep.as_str()) {
                    return Err(Error::PlanFailed(format!(
                        "subtask {} depends on {} which is not an earlier subtask",
                        subtask.id, dep
                    )));
                }
            }
        }
        Ok(())
    }
}

/// A configured specialist identity.
#[derive(Debug, Clone)]
pub struct SpecialistProfile {
    pub id: String,
    /// Identity block prepended to the specialist's system prompt
    pub identity_prompt: String,
    pub tier: Tier,
    /// Tiers tried in order; defaults to just the profile's own tier
    pub escalation_ladder: Vec<Tier>,
    /// Tool names the specialist may use; None = everything
    pub allowed_tools: Option<Vec<String>>,
}

impl SpecialistProfile {
    pub fn new(id: impl Into<String>, identity_prompt: impl Into<String>, tier: Tier) -> Self {
        SpecialistProfile {
            id: id.into(),
            identity_prompt: identity_prompt.into(),
            tier,
            escalation_ladder: vec![tier],
            allowed_tools: None,
        }
    }

    pub fn with_ladder(mut self, ladder: Vec<Tier>) -> Self {
        self.escalation_ladder = ladder;
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = Some(tools);
        self
    }

    /// The ladder, never empty.
    pub fn ladder(&self) -> Vec<Tier> {
        if self.escalation_ladder.is_empty() {
            vec![self.tier]
        } else {
            self.escalation_ladder.clone()
        }
    }
}

/// Why a specialist failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    ToolError,
    LlmError,
    VerificationFailed,
    MaxIterations,
}

/// Successful specialist output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistSuccess {
    pub output: String,
    pub tokens_used: u64,
    /// Task id whose trace backs this output, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_ref: Option<String>,
    #[serde(default)]
    pub findings: Vec<Finding>,
}

/// Failed specialist outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialistFailure {
    pub kind: FailureKind,
    pub message: String,
    pub suggested_retry: bool,
    /// Partial output worth preserving
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<String>,
}

/// Tagged outcome of one specialist execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SpecialistOutcome {
    Ok(SpecialistSuccess),
    Failure(SpecialistFailure),
}

impl SpecialistOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, SpecialistOutcome::Ok(_))
    }
}

/// Severity of a finding, ordered `Info < Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

/// A follow-up a finding suggests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestedAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_specialist_id: Option<String>,
}

/// A structured observation a specialist emits; may trigger plan
/// adaptation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    pub severity: Severity,
    pub category: String,
    pub title: String,
    pub description: String,
    pub actionable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggested_action: Option<SuggestedAction>,
}

impl Finding {
    pub fn new(
        severity: Severity,
        category: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Finding {
            id: format!("finding-{}", Uuid::new_v4().simple()),
            severity,
            category: category.into(),
            title: title.into(),
            description: description.into(),
            actionable: false,
            suggested_action: None,
        }
    }

    pub fn actionable(mut self, action: SuggestedAction) -> Self {
        self.actionable = true;
        self.suggested_action = Some(action);
        self
    }

    /// Whether this finding should trigger the adaptation path.
    pub fn triggers_adaptation(&self) -> bool {
        self.actionable || self.severity >= Severity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subtask(id: &str, deps: &[&str]) -> Subtask {
        Subtask {
            id: id.into(),
            description: format!("do {}", id),
            specialist_id: "researcher".into(),
            dependencies: deps.iter().map(|s| s.to_string()).collect(),
            priority: 5,
            estimated_complexity: Complexity::Low,
            expected_outcome: None,
        }
    }

    #[test]
    fn validates_forward_references() {
        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", &["subtask-2"]), subtask("subtask-2", &[])],
        };
        assert!(plan.validate(["researcher"]).is_err());

        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", &[]), subtask("subtask-2", &["subtask-1"])],
        };
        assert!(plan.validate(["researcher"]).is_ok());
    }

    #[test]
    fn rejects_self_dependency_and_duplicates() {
        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", &["subtask-1"])],
        };
        assert!(plan.validate(["researcher"]).is_err());

        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", &[]), subtask("subtask-1", &[])],
        };
        assert!(plan.validate(["researcher"]).is_err());
    }

    #[test]
    fn rejects_unknown_specialists_and_bad_priorities() {
        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", &[])],
        };
        assert!(plan.validate(["someone-else"]).is_err());

        let mut bad = subtask("subtask-1", &[]);
        bad.priority = 11;
        let plan = ExecutionPlan {
            subtasks: vec![bad],
        };
        assert!(plan.validate(["researcher"]).is_err());
    }

    #[test]
    fn severity_ordering_supports_thresholds() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        let high = Finding::new(Severity::High, "bug", "t", "d");
        assert!(high.triggers_adaptation());
        let low = Finding::new(Severity::Low, "style", "t", "d");
        assert!(!low.triggers_adaptation());
    }
}
