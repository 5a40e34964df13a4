//! Heuristic fact extraction from successful tool results
//!
//! Runs after every successful tool call; one compact fact per tool family.
//! LLM-based extraction (the summarizer) complements this on an interval.

use serde_json::Value;

use crate::tools::{ToolCall, ToolResult};

use super::factsheet::{Fact, FactCategory};

/// Confidence assigned to direct tool observations.
const OBSERVATION_CONFIDENCE: f64 = 0.9;

/// Derive a fact from one successful tool call, if the family is known.
pub fn extract_fact(call: &ToolCall, result: &ToolResult, iteration: u32) -> Option<Fact> {
    if !result.success {
        return None;
    }

    let (category, text) = match call.name.as_str() {
        "fs:read" => {
            let path = str_arg(&call.input, "path")?;
            let first_line = result.output.lines().next().unwrap_or("").trim();
            (
                FactCategory::FileContent,
                format!(
                    "Read {} ({} chars), starts: {}",
                    path,
                    result.output.chars().count(),
                    snippet(first_line, 120)
                ),
            )
        }
        "fs:search" | "grep_search" => {
            let pattern = str_arg(&call.input, "pattern")
                .or_else(|| str_arg(&call.input, "query"))?;
            let matches = result
                .metadata
                .as_ref()
                .and_then(|m| m.get("matches"))
                .and_then(|v| v.as_u64());
            let text = match matches {
                Some(n) => format!("Search '{}' matched {} line(s)", pattern, n),
                None => format!(
                    "Search '{}' returned: {}",
                    pattern,
                    snippet(&result.output, 120)
                ),
            };
            (FactCategory::Finding, text)
        }
        "fs:glob" | "glob_search" | "fs:list" => {
            let entries = result.output.lines().count();
            (
                FactCategory::Environment,
                format!("Listing via {} found {} entrie(s)", call.name, entries),
            )
        }
        "code:find-definition" | "code:find-usages" | "code:outline" | "find_definition" => {
            (
                FactCategory::Architecture,
                format!("{} observed: {}", call.name, snippet(&result.output, 160)),
            )
        }
        "shell:exec" | "shell_exec" => {
            let command = str_arg(&call.input, "command").unwrap_or("(unknown)");
            let exit = result
                .metadata
                .as_ref()
                .and_then(|m| m.get("exit_code"))
                .and_then(|v| v.as_i64())
                .unwrap_or(0);
            (
                FactCategory::ToolResult,
                format!("Command `{}` exited with code {}", snippet(command, 80), exit),
            )
        }
        _ => return None,
    };

    Some(Fact::new(
        category,
        text,
        OBSERVATION_CONFIDENCE,
        call.name.clone(),
        iteration,
    ))
}

fn str_arg<'a>(input: &'a Value, key: &str) -> Option<&'a str> {
    input.get(key).and_then(|v| v.as_str())
}

fn snippet(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if trimmed.chars().count() <= max {
        trimmed.to_string()
    } else {
        let cut: String = trimmed.chars().take(max).collect();
        format!("{}…", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_produces_file_content_fact() {
        let call = ToolCall::new("c1", "fs:read", json!({"path": "README.md"}));
        let result = ToolResult::success("c1", "# Title\nbody");
        let fact = extract_fact(&call, &result, 2).unwrap();
        assert_eq!(fact.category, FactCategory::FileContent);
        assert!(fact.text.contains("README.md"));
        assert!(fact.text.contains("# Title"));
        assert_eq!(fact.iteration, 2);
        assert_eq!(fact.source, "fs:read");
    }

    #[test]
    fn search_uses_match_metadata() {
        let call = ToolCall::new("c1", "fs:search", json!({"pattern": "needle"}));
        let result = ToolResult::success("c1", "a.txt:1: needle")
            .with_metadata(json!({"matches": 1}));
        let fact = extract_fact(&call, &result, 1).unwrap();
        assert_eq!(fact.category, FactCategory::Finding);
        assert!(fact.text.contains("matched 1"));
    }

    #[test]
    fn failures_and_unknown_tools_are_skipped() {
        let failed = ToolResult::failure(
            "c1",
            crate::tools::ToolErrorDetail::new("io_error", "nope", false),
        );
        let call = ToolCall::new("c1", "fs:read", json!({"path": "x"}));
        assert!(extract_fact(&call, &failed, 1).is_none());

        let other = ToolCall::new("c2", "custom:thing", json!({}));
        let ok = ToolResult::success("c2", "out");
        assert!(extract_fact(&other, &ok, 1).is_none());
    }
}
