//! Built-in shell execution tool

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use tokio::process::Command;

use super::traits::{Tool, ToolErrorDetail, ToolOutput};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct ExecArgs {
    /// Shell command line to run
    command: String,
    /// Timeout in seconds (default 60)
    #[serde(default = "default_timeout_secs")]
    timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    60
}

/// Built-in tool: run a shell command in the working directory.
///
/// Captures stdout, stderr, and the exit code. Sandboxing is out of scope;
/// callers gate this tool through the permission list.
pub struct ShellExec {
    working_dir: PathBuf,
    max_timeout: Duration,
}

impl ShellExec {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        ShellExec {
            working_dir: working_dir.into(),
            max_timeout: Duration::from_secs(300),
        }
    }

    pub fn with_max_timeout(mut self, max_timeout: Duration) -> Self {
        self.max_timeout = max_timeout;
        self
    }
}

#[async_trait]
impl Tool for ShellExec {
    fn name(&self) -> &str {
        "shell:exec"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the working directory. Returns stdout, stderr, and exit code."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(ExecArgs)).unwrap_or_else(|_| serde_json::json!({}))
    }

    async fn execute(&self, args: Value) -> Result<ToolOutput, ToolErrorDetail> {
        let args: ExecArgs = serde_json::from_value(args)
            .map_err(|e| ToolErrorDetail::invalid_input(e.to_string()))?;
        if args.command.trim().is_empty() {
            return Err(ToolErrorDetail::invalid_input("command must not be empty"));
        }
        if args.timeout_secs == 0 {
            return Err(ToolErrorDetail::invalid_input(
                "timeout_secs must be at least 1",
            ));
        }

        let timeout = Duration::from_secs(args.timeout_secs).min(self.max_timeout);
        let child = Command::new("sh")
            .arg("-c")
            .arg(&args.command)
            .current_dir(&self.working_dir)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolErrorDetail::io(format!("failed to spawn shell: {}", e)))
            }
            Err(_) => {
                return Err(ToolErrorDetail::new(
                    "timeout",
                    format!("command timed out after {}s", timeout.as_secs()),
                    false,
                ))
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let code = output.status.code().unwrap_or(-1);

        let mut rendered = String::new();
        if !stdout.is_empty() {
            rendered.push_str(stdout.trim_end());
        }
        if !stderr.is_empty() {
            if !rendered.is_empty() {
                rendered.push('\n');
            }
            rendered.push_str("stderr: ");
            rendered.push_str(stderr.trim_end());
        }
        if rendered.is_empty() {
            rendered.push_str("(no output)");
        }
        rendered.push_str(&format!("\nexit code: {}", code));

        Ok(ToolOutput::with_metadata(
            rendered,
            serde_json::json!({ "exit_code": code }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellExec::new(dir.path());
        let out = tool.execute(json!({"command": "echo hello"})).await.unwrap();
        assert!(out.content.contains("hello"));
        assert!(out.content.contains("exit code: 0"));
        assert_eq!(out.metadata.unwrap()["exit_code"], 0);
    }

    #[tokio::test]
    async fn nonzero_exit_is_still_an_observation() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellExec::new(dir.path());
        let out = tool.execute(json!({"command": "exit 3"})).await.unwrap();
        assert!(out.content.contains("exit code: 3"));
    }

    #[tokio::test]
    async fn zero_timeout_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellExec::new(dir.path());
        let err = tool
            .execute(json!({"command": "echo hi", "timeout_secs": 0}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "invalid_input");
    }

    #[tokio::test]
    async fn times_out_long_commands() {
        let dir = tempfile::tempdir().unwrap();
        let tool = ShellExec::new(dir.path()).with_max_timeout(Duration::from_millis(100));
        let err = tool
            .execute(json!({"command": "sleep 5", "timeout_secs": 1}))
            .await
            .unwrap_err();
        assert_eq!(err.code, "timeout");
    }
}
