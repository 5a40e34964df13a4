//! Rubric-based verification
//!
//! Two deterministic verifiers, no LLM calls: a plan-quality score used by
//! the planner (with its single-retry rule) and a three-level check of
//! specialist output (schema conformance, trace alignment, file-path
//! validity).

use std::path::Path;

use crate::orchestrator::types::{ExecutionPlan, SpecialistSuccess, Subtask};
use crate::trace::{TraceEvent, TraceReader};

/// Rubric weights.
const WEIGHT_COVERAGE: f64 = 0.40;
const WEIGHT_PRECISION: f64 = 0.35;
const WEIGHT_FILES: f64 = 0.25;

/// Verbs marking a subtask as a change step.
const CHANGE_VERBS: &[&str] = &[
    "write", "edit", "fix", "update", "create", "add", "remove", "refactor", "delete", "rename",
];

/// Placeholder fragments that make a plan unusable.
const PLACEHOLDERS: &[&str] = &["<todo>", "<tbd>", "tbd", "placeholder", "fill in"];

/// Outcome of the plan-quality rubric.
#[derive(Debug, Clone)]
pub struct PlanQuality {
    /// Weighted score in [0, 1]; forced to 0 by severe issues.
    pub score: f64,
    pub severe_issues: Vec<String>,
    /// Whether the planner may redraft once.
    pub retry_allowed: bool,
}

impl PlanQuality {
    pub fn is_acceptable(&self) -> bool {
        self.severe_issues.is_empty()
    }
}

/// Score a plan draft against the goal.
///
/// Coverage weighs goal keywords reached by subtask descriptions, precision
/// weighs concrete subtasks, files weighs plausible path references. Severe
/// issues (no subtasks, placeholder text, missing action or expected
/// outcome) force the score to 0. One redraft is allowed iff severe issues
/// are present and the draft is not mostly usable (at least 4 steps, at
/// least 2 change steps, raw score at least 0.45).
pub fn assess_plan(plan: &ExecutionPlan, goal: &str) -> PlanQuality {
    let mut severe = Vec::new();

    if plan.subtasks.is_empty() {
        severe.push("plan has no subtasks".to_string());
    }
    for subtask in &plan.subtasks {
        let description = subtask.description.to_lowercase();
        if PLACEHOLDERS.iter().any(|p| description.contains(p)) {
            severe.push(format!("subtask {} contains placeholder text", subtask.id));
        }
        if subtask.description.trim().is_empty() {
            severe.push(format!("subtask {} has no action", subtask.id));
        }
        match &subtask.expected_outcome {
            Some(outcome) if !outcome.trim().is_empty() => {}
            _ => severe.push(format!("subtask {} has no expected outcome", subtask.id)),
        }
    }

    let raw_score = WEIGHT_COVERAGE * coverage_score(plan, goal)
        + WEIGHT_PRECISION * precision_score(plan)
        + WEIGHT_FILES * files_score(plan);

    let change_steps = plan.subtasks.iter().filter(|s| is_change_step(s)).count();
    let mostly_usable =
        plan.subtasks.len() >= 4 && change_steps >= 2 && raw_score >= 0.45;

    let has_severe = !severe.is_empty();
    PlanQuality {
        score: if has_severe { 0.0 } else { raw_score },
        retry_allowed: has_severe && !mostly_usable,
        severe_issues: severe,
    }
}

fn coverage_score(plan: &ExecutionPlan, goal: &str) -> f64 {
    let keywords: Vec<String> = goal
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 3)
        .map(String::from)
        .collect();
    if keywords.is_empty() {
        return 1.0;
    }
    let descriptions: String = plan
        .subtasks
        .iter()
        .map(|s| s.description.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let covered = keywords
        .iter()
        .filter(|k| descriptions.contains(k.as_str()))
        .count();
    covered as f64 / keywords.len() as f64
}

fn precision_score(plan: &ExecutionPlan) -> f64 {
    if plan.subtasks.is_empty() {
        return 0.0;
    }
    let precise = plan
        .subtasks
        .iter()
        .filter(|s| s.description.trim().len() >= 12 && s.expected_outcome.is_some())
        .count();
    precise as f64 / plan.subtasks.len() as f64
}

fn files_score(plan: &ExecutionPlan) -> f64 {
    let tokens: Vec<&str> = plan
        .subtasks
        .iter()
        .flat_map(|s| s.description.split_whitespace())
        .filter(|t| looks_like_path(t))
        .collect();
    if tokens.is_empty() {
        // No file references: neutral rather than penalizing.
        return 1.0;
    }
    let plausible = tokens
        .iter()
        .filter(|t| !t.contains('<') && !t.contains('>'))
        .count();
    plausible as f64 / tokens.len() as f64
}

fn is_change_step(subtask: &Subtask) -> bool {
    let first_word = subtask
        .description
        .trim()
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_lowercase();
    CHANGE_VERBS.contains(&first_word.as_str())
}

fn looks_like_path(token: &str) -> bool {
    let trimmed = token.trim_matches(|c: char| ",.;:()[]\"'`".contains(c));
    trimmed.starts_with("./")
        || (trimmed.contains('/')
            && trimmed
                .rsplit('/')
                .next()
                .map(|leaf| leaf.contains('.'))
                .unwrap_or(false))
}

/// Outcome of specialist-output verification.
#[derive(Debug, Clone)]
pub struct Verification {
    pub valid: bool,
    pub violations: Vec<String>,
}

/// Three-level specialist output check.
pub struct SpecialistVerifier;

impl SpecialistVerifier {
    /// Verify a success against its declared shape, its recorded trace,
    /// and the filesystem.
    pub fn verify(output: &SpecialistSuccess, working_dir: &Path) -> Verification {
        let mut violations = Vec::new();

        // Level 1: schema conformance of the declared output.
        let trimmed = output.output.trim();
        if trimmed.is_empty() {
            violations.push("output is empty".to_string());
        } else if (trimmed.starts_with('{') || trimmed.starts_with('['))
            && serde_json::from_str::<serde_json::Value>(trimmed).is_err()
        {
            violations.push("output declares JSON but does not parse".to_string());
        }

        // Level 2: alignment with the recorded tool trace.
        if let Some(trace_ref) = &output.trace_ref {
            match TraceReader::new(working_dir).read(trace_ref) {
                Ok(log) => {
                    let observations: Vec<String> = log
                        .records
                        .iter()
                        .filter_map(|r| match &r.event {
                            TraceEvent::ToolExecution {
                                success: true,
                                tool,
                                output_snippet,
                                ..
                            } => Some(format!("{} {}", tool, output_snippet).to_lowercase()),
                            _ => None,
                        })
                        .collect();
                    for finding in &output.findings {
                        if !backed_by_observation(&finding.title, &observations) {
                            violations.push(format!(
                                "finding '{}' is not backed by any recorded tool result",
                                finding.title
                            ));
                        }
                    }
                }
                Err(e) => violations.push(format!("trace {} unreadable: {}", trace_ref, e)),
            }
        }

        // Level 3: deterministic file-path validity.
        for token in output.output.split_whitespace().filter(|t| looks_like_path(t)) {
            let cleaned = token.trim_matches(|c: char| ",.;:()[]\"'`".contains(c));
            let relative = cleaned.trim_start_matches("./");
            if relative.contains("..") {
                violations.push(format!("path escapes working dir: {}", cleaned));
                continue;
            }
            if !working_dir.join(relative).exists() {
                violations.push(format!("referenced file does not exist: {}", cleaned));
            }
        }

        Verification {
            valid: violations.is_empty(),
            violations,
        }
    }
}

/// A finding is backed when a significant word of its title appears in a
/// recorded successful tool observation.
fn backed_by_observation(title: &str, observations: &[String]) -> bool {
    let words: Vec<String> = title
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 4)
        .map(String::from)
        .collect();
    if words.is_empty() {
        return true;
    }
    observations
        .iter()
        .any(|obs| words.iter().any(|w| obs.contains(w.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::types::{Complexity, Finding, Severity};
    use crate::trace::{TraceEvent, TraceWriter};

    fn subtask(id: &str, description: &str, outcome: Option<&str>) -> Subtask {
        Subtask {
            id: id.into(),
            description: description.into(),
            specialist_id: "researcher".into(),
            dependencies: vec![],
            priority: 5,
            estimated_complexity: Complexity::Medium,
            expected_outcome: outcome.map(String::from),
        }
    }

    #[test]
    fn severe_issues_zero_the_score() {
        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", "investigate <TODO>", Some("done"))],
        };
        let quality = assess_plan(&plan, "investigate the parser");
        assert_eq!(quality.score, 0.0);
        assert!(!quality.is_acceptable());
        assert!(quality.retry_allowed);
    }

    #[test]
    fn missing_expected_outcome_is_severe() {
        let plan = ExecutionPlan {
            subtasks: vec![subtask("subtask-1", "read the parser module", None)],
        };
        let quality = assess_plan(&plan, "understand the parser");
        assert!(!quality.is_acceptable());
    }

    #[test]
    fn clean_plans_score_high() {
        let plan = ExecutionPlan {
            subtasks: vec![
                subtask(
                    "subtask-1",
                    "read the parser module to understand tokenization",
                    Some("notes on the tokenizer"),
                ),
                subtask(
                    "subtask-2",
                    "fix the parser error handling",
                    Some("patch applied"),
                ),
            ],
        };
        let quality = assess_plan(&plan, "fix the parser error handling");
        assert!(quality.is_acceptable());
        assert!(quality.score > 0.7, "score was {}", quality.score);
        assert!(!quality.retry_allowed);
    }

    #[test]
    fn change_steps_are_detected() {
        assert!(is_change_step(&subtask("s", "fix the bug in a.rs", None)));
        assert!(!is_change_step(&subtask("s", "investigate the bug", None)));
    }

    #[test]
    fn empty_output_fails_level_one() {
        let dir = tempfile::tempdir().unwrap();
        let success = SpecialistSuccess {
            output: "   ".into(),
            tokens_used: 0,
            trace_ref: None,
            findings: vec![],
        };
        let verification = SpecialistVerifier::verify(&success, dir.path());
        assert!(!verification.valid);
    }

    #[test]
    fn json_output_must_parse() {
        let dir = tempfile::tempdir().unwrap();
        let success = SpecialistSuccess {
            output: "{not json".into(),
            tokens_used: 0,
            trace_ref: None,
            findings: vec![],
        };
        assert!(!SpecialistVerifier::verify(&success, dir.path()).valid);

        let success = SpecialistSuccess {
            output: r#"{"answer": 1}"#.into(),
            tokens_used: 0,
            trace_ref: None,
            findings: vec![],
        };
        assert!(SpecialistVerifier::verify(&success, dir.path()).valid);
    }

    #[test]
    fn findings_must_be_backed_by_trace() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TraceWriter::create(dir.path(), "spec-1").unwrap();
        writer
            .record(
                1,
                TraceEvent::ToolExecution {
                    tool: "fs:search".into(),
                    success: true,
                    duration_ms: 1,
                    output_chars: 20,
                    output_snippet: "overflow in buffer handling".into(),
                    cached: false,
                    error_code: None,
                },
            )
            .unwrap();
        writer.close().unwrap();

        let backed = SpecialistSuccess {
            output: "found it".into(),
            tokens_used: 10,
            trace_ref: Some("spec-1".into()),
            findings: vec![Finding::new(
                Severity::High,
                "bug",
                "buffer overflow risk",
                "d",
            )],
        };
        assert!(SpecialistVerifier::verify(&backed, dir.path()).valid);

        let unbacked = SpecialistSuccess {
            output: "found it".into(),
            tokens_used: 10,
            trace_ref: Some("spec-1".into()),
            findings: vec![Finding::new(
                Severity::High,
                "bug",
                "credential leakage detected",
                "d",
            )],
        };
        let verification = SpecialistVerifier::verify(&unbacked, dir.path());
        assert!(!verification.valid);
        assert!(verification.violations[0].contains("credential leakage"));
    }

    #[test]
    fn referenced_paths_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("real.txt"), "x").unwrap();

        let good = SpecialistSuccess {
            output: "see ./real.txt for details".into(),
            tokens_used: 0,
            trace_ref: None,
            findings: vec![],
        };
        assert!(SpecialistVerifier::verify(&good, dir.path()).valid);

        let bad = SpecialistSuccess {
            output: "see ./missing/file.txt for details".into(),
            tokens_used: 0,
            trace_ref: None,
            findings: vec![],
        };
        assert!(!SpecialistVerifier::verify(&bad, dir.path()).valid);
    }
}
