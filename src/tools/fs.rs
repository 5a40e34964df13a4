//! Built-in filesystem tools
//!
//! All paths resolve against the task working directory; absolute paths and
//! `..` traversal are rejected before any I/O happens.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use super::traits::{Tool, ToolErrorDetail, ToolOutput};

/// Resolve `path` inside `root`, rejecting absolute paths and traversal.
pub fn resolve_within(root: &Path, path: &str) -> Result<PathBuf, ToolErrorDetail> {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        return Err(ToolErrorDetail::invalid_input(format!(
            "absolute paths are not allowed: {}",
            path
        )));
    }
    for component in candidate.components() {
        if matches!(component, Component::ParentDir) {
            return Err(ToolErrorDetail::invalid_input(format!(
                "path traversal is not allowed: {}",
                path
            )));
        }
    }
    Ok(root.join(candidate))
}

fn schema_of<T: JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| serde_json::json!({}))
}

// ---------------------------------------------------------------------------
// fs:read
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ReadArgs {
    /// Path to the file, relative to the working directory
    path: String,
    /// Optional cap on returned characters
    #[serde(default)]
    max_chars: Option<usize>,
}

/// Built-in tool: read a file.
pub struct FsRead {
    root: PathBuf,
}

impl FsRead {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsRead { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsRead {
    fn name(&self) -> &str {
        "fs:read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file relative to the working directory"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ReadArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: ReadArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        let full = resolve_within(&self.root, &args.path)?;

        let content = tokio::fs::read_to_string(&full)
            .await
            .map_err(|e| ToolErrorDetail::io(format!("failed to read {}: {}", args.path, e)))?;
        let total_chars = content.chars().count();

        let shown = match args.max_chars {
            Some(limit) if total_chars > limit => content.chars().take(limit).collect(),
            _ => content,
        };
        Ok(ToolOutput::with_metadata(
            shown,
            serde_json::json!({ "path": args.path, "chars": total_chars }),
        ))
    }
}

// ---------------------------------------------------------------------------
// fs:write
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WriteArgs {
    /// Path to the file, relative to the working directory
    path: String,
    /// Content to write
    content: String,
}

/// Built-in tool: write a file (creating parent directories).
pub struct FsWrite {
    root: PathBuf,
}

impl FsWrite {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsWrite { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsWrite {
    fn name(&self) -> &str {
        "fs:write"
    }

    fn description(&self) -> &str {
        "Write content to a file relative to the working directory, creating parents as needed"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<WriteArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: WriteArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        let full = resolve_within(&self.root, &args.path)?;

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolErrorDetail::io(e.to_string()))?;
        }
        tokio::fs::write(&full, args.content.as_bytes())
            .await
            .map_err(|e| ToolErrorDetail::io(format!("failed to write {}: {}", args.path, e)))?;

        Ok(ToolOutput::with_metadata(
            format!("Wrote {} bytes to {}", args.content.len(), args.path),
            serde_json::json!({ "path": args.path, "bytes": args.content.len() }),
        ))
    }
}

// ---------------------------------------------------------------------------
// fs:list
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ListArgs {
    /// Directory to list, relative to the working directory (default: ".")
    #[serde(default)]
    path: Option<String>,
}

/// Built-in tool: list a directory.
pub struct FsList {
    root: PathBuf,
}

impl FsList {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsList { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsList {
    fn name(&self) -> &str {
        "fs:list"
    }

    fn description(&self) -> &str {
        "List entries of a directory relative to the working directory"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ListArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: ListArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        let rel = args.path.as_deref().unwrap_or(".");
        let full = resolve_within(&self.root, rel)?;

        let mut reader = tokio::fs::read_dir(&full)
            .await
            .map_err(|e| ToolErrorDetail::io(format!("failed to list {}: {}", rel, e)))?;
        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|e| ToolErrorDetail::io(e.to_string()))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            entries.push(if is_dir { format!("{}/", name) } else { name });
        }
        entries.sort_unstable();

        Ok(ToolOutput::with_metadata(
            entries.join("\n"),
            serde_json::json!({ "path": rel, "count": entries.len() }),
        ))
    }
}

// ---------------------------------------------------------------------------
// fs:exists
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ExistsArgs {
    /// Path to probe, relative to the working directory
    path: String,
}

/// Built-in tool: check whether a path exists.
pub struct FsExists {
    root: PathBuf,
}

impl FsExists {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsExists { root: root.into() }
    }
}

#[async_trait]
impl Tool for FsExists {
    fn name(&self) -> &str {
        "fs:exists"
    }

    fn description(&self) -> &str {
        "Check whether a path exists relative to the working directory"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<ExistsArgs>()
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: ExistsArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        let full = resolve_within(&self.root, &args.path)?;
        let exists = tokio::fs::try_exists(&full).await.unwrap_or(false);
        Ok(ToolOutput::text(if exists { "true" } else { "false" }))
    }
}

// ---------------------------------------------------------------------------
// fs:search
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct SearchArgs {
    /// Substring to search for
    pattern: String,
    /// File or directory to search (default: working directory)
    #[serde(default)]
    path: Option<String>,
    /// Maximum number of matching lines returned
    #[serde(default = "default_max_results")]
    max_results: usize,
}

fn default_max_results() -> usize {
    50
}

/// Built-in tool: substring search over files. Marked expensive so it is
/// pruned from the offered tool set when budget runs low.
pub struct FsSearch {
    root: PathBuf,
}

impl FsSearch {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsSearch { root: root.into() }
    }

    fn search_file(path: &Path, rel: &str, pattern: &str, hits: &mut Vec<String>, cap: usize) {
        let Ok(content) = std::fs::read_to_string(path) else {
            return;
        };
        for (idx, line) in content.lines().enumerate() {
            if hits.len() >= cap {
                return;
            }
            if line.contains(pattern) {
                hits.push(format!("{}:{}: {}", rel, idx + 1, line.trim_end()));
            }
        }
    }

    fn walk(dir: &Path, rel: &str, pattern: &str, hits: &mut Vec<String>, cap: usize, depth: u32) {
        if depth > 32 || hits.len() >= cap {
            return;
        }
        let Ok(reader) = std::fs::read_dir(dir) else {
            return;
        };
        let mut entries: Vec<_> = reader.flatten().collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            let child_rel = if rel.is_empty() {
                name.clone()
            } else {
                format!("{}/{}", rel, name)
            };
            let path = entry.path();
            if path.is_dir() {
                Self::walk(&path, &child_rel, pattern, hits, cap, depth + 1);
            } else {
                Self::search_file(&path, &child_rel, pattern, hits, cap);
            }
        }
    }
}

#[async_trait]
impl Tool for FsSearch {
    fn name(&self) -> &str {
        "fs:search"
    }

    fn description(&self) -> &str {
        "Search files for a substring; returns matching lines as path:line: text"
    }

    fn parameters_schema(&self) -> Value {
        schema_of::<SearchArgs>()
    }

    fn expensive(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: SearchArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        if args.pattern.is_empty() {
            return Err(ToolErrorDetail::invalid_input("pattern must not be empty"));
        }
        let rel = args.path.as_deref().unwrap_or("");
        let full = if rel.is_empty() {
            self.root.clone()
        } else {
            resolve_within(&self.root, rel)?
        };

        // Search runs on the blocking pool; directory trees can be large.
        let pattern = args.pattern.clone();
        let cap = args.max_results;
        let rel_owned = rel.to_string();
        let hits = tokio::task::spawn_blocking(move || {
            let mut hits = Vec::new();
            if full.is_dir() {
                FsSearch::walk(&full, &rel_owned, &pattern, &mut hits, cap, 0);
            } else {
                FsSearch::search_file(&full, &rel_owned, &pattern, &mut hits, cap);
            }
            hits
        })
        .await
        .map_err(|e| ToolErrorDetail::io(e.to_string()))?;

        let count = hits.len();
        let body = if hits.is_empty() {
            format!("no matches for '{}'", args.pattern)
        } else {
            hits.join("\n")
        };
        Ok(ToolOutput::with_metadata(
            body,
            serde_json::json!({ "pattern": args.pattern, "matches": count }),
        ))
    }
}
