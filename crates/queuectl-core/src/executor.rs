//! The pluggable strategy that actually runs a job's command.
//!
//! `Executor` is a narrow seam: the engine only needs `(success, error)`
//! back, bounded by a timeout it enforces itself.
//! [`ShellExecutor`] is the default, subprocess-backed implementation;
//! anything else -- an in-process callable registry, a container runner, the
//! `ScriptedExecutor` test double in `queuectl-testing` -- satisfies the same
//! trait.

use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// The outcome of a single command execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub success: bool,
    /// Empty on success. One of: `"Exit code N: <stderr>"`, `"Command
    /// timeout after Ns"`, `"Command not found"`, or an unclassified
    /// message.
    pub error: String,
}

impl ExecutionOutcome {
    pub fn ok() -> Self {
        ExecutionOutcome {
            success: true,
            error: String::new(),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ExecutionOutcome {
            success: false,
            error: error.into(),
        }
    }
}

#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, command: &str, timeout: Duration) -> ExecutionOutcome;
}

/// Runs a job's command through the host shell, capturing stdout/stderr and
/// forcibly killing the child if it outlives `timeout`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        ShellExecutor
    }

    #[cfg(unix)]
    fn shell_command(command: &str) -> Command {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(command);
        cmd
    }

    #[cfg(not(unix))]
    fn shell_command(command: &str) -> Command {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    async fn execute(&self, command: &str, duration: Duration) -> ExecutionOutcome {
        let mut cmd = Self::shell_command(command);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        // Dropping the still-running child (which is what happens when
        // `timeout` below gives up on it) must kill it, not orphan it.
        cmd.kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return ExecutionOutcome::failed("Command not found");
            }
            Err(err) => return ExecutionOutcome::failed(err.to_string()),
        };

        match timeout(duration, child.wait_with_output()).await {
            Ok(Ok(output)) => {
                if output.status.success() {
                    ExecutionOutcome::ok()
                } else {
                    let code = output.status.code().unwrap_or(-1);
                    let stderr = String::from_utf8_lossy(&output.stderr);
                    let stderr = stderr.trim();
                    ExecutionOutcome::failed(format!("Exit code {code}: {stderr}"))
                }
            }
            Ok(Err(err)) => ExecutionOutcome::failed(err.to_string()),
            Err(_elapsed) => {
                ExecutionOutcome::failed(format!("Command timeout after {}s", duration.as_secs()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn successful_command_reports_no_error() {
        let executor = ShellExecutor::new();
        let outcome = executor.execute("true", Duration::from_secs(5)).await;
        assert!(outcome.success);
        assert!(outcome.error.is_empty());
    }

    #[tokio::test]
    async fn nonzero_exit_is_reported_with_stderr() {
        let executor = ShellExecutor::new();
        let outcome = executor
            .execute("echo boom 1>&2; exit 7", Duration::from_secs(5))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.starts_with("Exit code 7"));
        assert!(outcome.error.contains("boom"));
    }

    #[tokio::test]
    async fn timeout_is_reported_and_child_is_killed() {
        let executor = ShellExecutor::new();
        let start = std::time::Instant::now();
        let outcome = executor
            .execute("sleep 30", Duration::from_millis(200))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.contains("timeout"));
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
