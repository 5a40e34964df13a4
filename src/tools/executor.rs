//! Tool execution façade
//!
//! Everything that belongs to the boundary rather than to individual tools:
//! input normalization against the declared JSON Schema, allow/deny
//! permission enforcement, bounded retries for retryable failures, duration
//! capture, output truncation, and dedup-cache writeback.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::context::ContextFilter;

use super::registry::ToolRegistry;
use super::traits::{ToolCall, ToolErrorDetail, ToolResult};

/// Maximum retries for a retryable tool failure. The failure observed on
/// the attempt after the last retry is returned as-is.
pub const MAX_TOOL_RETRIES: u32 = 2;

/// Effective allow/deny list for a task.
#[derive(Debug, Clone, Default)]
pub struct ToolPermissions {
    /// When set, only these names are permitted.
    pub allow: Option<HashSet<String>>,
    /// Always rejected, even when allowed above.
    pub deny: HashSet<String>,
}

impl ToolPermissions {
    /// Permit everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    /// Permit only the given names.
    pub fn allow_only<I: IntoIterator<Item = String>>(names: I) -> Self {
        ToolPermissions {
            allow: Some(names.into_iter().collect()),
            deny: HashSet::new(),
        }
    }

    /// Add a denied name.
    pub fn deny(mut self, name: impl Into<String>) -> Self {
        self.deny.insert(name.into());
        self
    }

    pub fn permits(&self, name: &str) -> bool {
        if self.deny.contains(name) {
            return false;
        }
        match &self.allow {
            Some(allowed) => allowed.contains(name),
            None => true,
        }
    }
}

/// The `execute(name, input) → ToolResult` boundary in front of the registry.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    permissions: ToolPermissions,
    context: Arc<ContextFilter>,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        permissions: ToolPermissions,
        context: Arc<ContextFilter>,
    ) -> Self {
        ToolExecutor {
            registry,
            permissions,
            context,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn permissions(&self) -> &ToolPermissions {
        &self.permissions
    }

    /// Execute one tool call. Never raises: every failure is captured in the
    /// returned `ToolResult` so the LLM can observe it.
    pub async fn execute(&self, call: &ToolCall, iteration: u32) -> ToolResult {
        if !self.permissions.permits(&call.name) {
            return ToolResult::failure(
                &call.id,
                ToolErrorDetail::new(
                    "permission_denied",
                    format!("tool '{}' is not permitted for this task", call.name),
                    false,
                ),
            );
        }

        let tool = match self.registry.get(&call.name) {
            Some(tool) => tool,
            None => {
                return ToolResult::failure(
                    &call.id,
                    ToolErrorDetail::new(
                        "invalid_input",
                        format!("unknown tool: {}", call.name),
                        false,
                    ),
                );
            }
        };

        // Dedup cache: identical calls within the TTL return the prior
        // output annotated with the observing iteration.
        if let Some(hit) = self.context.cache().lookup(&call.name, &call.input).await {
            debug!(
                "Tool {} cache hit (first observed at iteration {})",
                call.name, hit.iteration
            );
            return ToolResult::success(
                &call.id,
                format!(
                    "{}\n[previously observed at iteration {}]",
                    hit.output, hit.iteration
                ),
            )
            .with_metadata(serde_json::json!({ "cached": true, "first_iteration": hit.iteration }));
        }

        let input = match normalize_input(&tool.parameters_schema(), call.input.clone()) {
            Ok(input) => input,
            Err(detail) => return ToolResult::failure(&call.id, detail),
        };

        let start = Instant::now();
        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            match tool.execute(input.clone()).await {
                Ok(output) => break Ok(output),
                Err(detail) => {
                    if detail.retryable && tool.retryable() && attempt <= MAX_TOOL_RETRIES {
                        warn!(
                            "Tool {} failed (attempt {}), retrying: {}",
                            call.name, attempt, detail.message
                        );
                        continue;
                    }
                    break Err(detail);
                }
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(output) => {
                let truncated = self.context.truncate(&output.content);
                self.context
                    .cache()
                    .insert(&call.name, &call.input, truncated.clone(), iteration)
                    .await;
                let mut result =
                    ToolResult::success(&call.id, truncated).with_duration(duration_ms);
                if let Some(metadata) = output.metadata {
                    result = result.with_metadata(metadata);
                }
                result
            }
            Err(detail) => {
                warn!("Tool {} failed: {}", call.name, detail.message);
                ToolResult::failure(&call.id, detail).with_duration(duration_ms)
            }
        }
    }
}

/// Normalize an input value against a tool's JSON Schema: coerce
/// string→number where the schema says number, fill declared defaults,
/// check required keys, and reject unknown keys unless the schema is open.
pub fn normalize_input(
    schema: &Value,
    input: Value,
) -> std::result::Result<Value, ToolErrorDetail> {
    let mut object = match input {
        Value::Object(map) => map,
        Value::Null => serde_json::Map::new(),
        other => {
            return Err(ToolErrorDetail::invalid_input(format!(
                "tool input must be an object, got {}",
                type_name(&other)
            )))
        }
    };

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let open = schema
        .get("additionalProperties")
        .map(|v| v != &Value::Bool(false))
        .unwrap_or(true);

    if let Some(properties) = properties {
        if !open {
            if let Some(unknown) = object.keys().find(|k| !properties.contains_key(*k)) {
                return Err(ToolErrorDetail::invalid_input(format!(
                    "unknown parameter: {}",
                    unknown
                )));
            }
        }

        for (name, prop) in properties {
            match object.get(name) {
                Some(value) => {
                    if let Some(coerced) = coerce(prop, value) {
                        object.insert(name.clone(), coerced);
                    }
                }
                None => {
                    if let Some(default) = prop.get("default") {
                        object.insert(name.clone(), default.clone());
                    }
                }
            }
        }
    }

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for key in required.iter().filter_map(|k| k.as_str()) {
            if !object.contains_key(key) {
                return Err(ToolErrorDetail::invalid_input(format!(
                    "missing required parameter: {}",
                    key
                )));
            }
        }
    }

    Ok(Value::Object(object))
}

/// String→number coercion where the declared type asks for it.
fn coerce(prop: &Value, value: &Value) -> Option<Value> {
    let declared = prop.get("type").and_then(|t| t.as_str())?;
    let text = value.as_str()?;
    match declared {
        "integer" => text.trim().parse::<i64>().ok().map(Value::from),
        "number" => text.trim().parse::<f64>().ok().map(Value::from),
        _ => None,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
