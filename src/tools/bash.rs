//! Shell command execution tool.
//!
//! Commands run through `sh -c` in the working directory with a bounded
//! timeout.  The hard-block check ([`sanitize_command`]) runs here, at the
//! handler level, AFTER all approval checks — the only way around it is the
//! explicit bypass flag set when a user approves a hard-blocked command.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use tokio::process::Command;

use crate::safety::hard_block::sanitize_command;

use super::context::InvocationContext;
use super::traits::{ResultMap, Tool, shell_error_result};

const MAX_OUTPUT: usize = 100_000;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const MAX_TIMEOUT_SECS: u64 = 600;

pub struct BashTool;

fn cap_output(mut text: String) -> String {
    if text.chars().count() > MAX_OUTPUT {
        text = text.chars().take(MAX_OUTPUT).collect::<String>() + "\n... (truncated)";
    }
    text
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command and return stdout, stderr, and exit code. \
         Commands run in the working directory. Default timeout is 120 seconds."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default 120, max 600)",
                    "default": 120
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, ctx: &InvocationContext) -> ResultMap {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return shell_error_result("Missing required argument 'command'");
        };

        if command.contains('\0') {
            return shell_error_result("Command contains null bytes");
        }
        if !ctx.bypass_hard_block
            && let Err(blocked) = sanitize_command(command)
        {
            return shell_error_result(blocked);
        }

        let timeout_secs = args
            .get("timeout")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
            .clamp(1, MAX_TIMEOUT_SECS);

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child is killed when the timeout drops the future.
            .kill_on_drop(true);
        if !ctx.working_dir.as_os_str().is_empty() {
            cmd.current_dir(&ctx.working_dir);
        }

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => return shell_error_result(e.to_string()),
        };

        let output = match tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            child.wait_with_output(),
        )
        .await
        {
            Err(_) => {
                return shell_error_result(format!("Command timed out after {timeout_secs}s"));
            }
            Ok(Err(e)) => return shell_error_result(e.to_string()),
            Ok(Ok(output)) => output,
        };

        let stdout = cap_output(String::from_utf8_lossy(&output.stdout).into_owned());
        let stderr = cap_output(String::from_utf8_lossy(&output.stderr).into_owned());

        let mut result = Map::new();
        result.insert("stdout".to_owned(), json!(stdout));
        result.insert("stderr".to_owned(), json!(stderr));
        result.insert("exit_code".to_owned(), json!(output.status.code().unwrap_or(0)));
        result
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ctx(dir: &TempDir) -> InvocationContext {
        InvocationContext::new(dir.path().to_path_buf())
    }

    #[tokio::test]
    async fn echo_returns_stdout_and_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(json!({"command": "echo hello"}), &ctx(&dir))
            .await;
        assert_eq!(result["stdout"].as_str().unwrap().trim(), "hello");
        assert_eq!(result["exit_code"], 0);
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(json!({"command": "exit 3"}), &ctx(&dir))
            .await;
        assert_eq!(result["exit_code"], 3);
    }

    #[tokio::test]
    async fn stderr_is_captured() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(json!({"command": "echo oops 1>&2"}), &ctx(&dir))
            .await;
        assert!(result["stderr"].as_str().unwrap().contains("oops"));
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let result = BashTool.execute(json!({"command": "ls"}), &ctx(&dir)).await;
        assert!(result["stdout"].as_str().unwrap().contains("marker.txt"));
    }

    #[tokio::test]
    async fn hard_blocked_command_refused_without_bypass() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(json!({"command": "rm -rf /"}), &ctx(&dir))
            .await;
        let error = result["error"].as_str().unwrap();
        assert!(error.contains("Blocked: recursive forced deletion"));
        assert_eq!(result["exit_code"], -1);
    }

    #[tokio::test]
    async fn bypass_flag_skips_hard_block() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx(&dir);
        ctx.bypass_hard_block = true;
        // Harmless command that still matches the rm -rf pattern shape.
        let target = dir.path().join("scratch");
        std::fs::create_dir(&target).unwrap();
        let result = BashTool
            .execute(
                json!({"command": format!("rm -rf {}", target.display())}),
                &ctx,
            )
            .await;
        assert!(!result.contains_key("error"), "bypass should execute: {result:?}");
        assert_eq!(result["exit_code"], 0);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn null_byte_rejected_even_with_bypass() {
        let dir = TempDir::new().unwrap();
        let mut ctx = ctx(&dir);
        ctx.bypass_hard_block = true;
        let result = BashTool
            .execute(json!({"command": "echo \u{0}hi"}), &ctx)
            .await;
        assert!(result["error"].as_str().unwrap().contains("null bytes"));
    }

    #[tokio::test]
    async fn timeout_kills_the_command() {
        let dir = TempDir::new().unwrap();
        let result = BashTool
            .execute(json!({"command": "sleep 5", "timeout": 1}), &ctx(&dir))
            .await;
        assert!(result["error"].as_str().unwrap().contains("timed out after 1s"));
        assert_eq!(result["exit_code"], -1);
    }

    #[tokio::test]
    async fn missing_command_errors() {
        let dir = TempDir::new().unwrap();
        let result = BashTool.execute(json!({}), &ctx(&dir)).await;
        assert!(result.contains_key("error"));
    }
}
