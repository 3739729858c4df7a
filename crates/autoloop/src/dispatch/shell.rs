//! Shell command execution

use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, instrument, warn};

use super::{ActionContext, ActionHandler, ErrorKind, ExecutionResult, TIMEOUT_SENTINEL};
use crate::directive::DirectiveKind;

/// How a bounded child process ended
#[derive(Debug)]
pub(super) enum ProcessOutcome {
    Completed(Output),
    SpawnFailed(std::io::Error),
    TimedOut,
}

/// Run `cmd` to completion or until `limit` elapses; the child is killed on timeout
pub(super) async fn run_bounded(mut cmd: Command, limit: Duration) -> ProcessOutcome {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    match timeout(limit, cmd.output()).await {
        Ok(Ok(output)) => ProcessOutcome::Completed(output),
        Ok(Err(e)) => ProcessOutcome::SpawnFailed(e),
        Err(_) => ProcessOutcome::TimedOut,
    }
}

/// stdout followed by stderr, separated when both are present
pub(super) fn combine_output(output: &Output) -> String {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    let mut combined = String::new();

    if !stdout.is_empty() {
        combined.push_str(&stdout);
    }

    if !stderr.is_empty() {
        if !combined.is_empty() {
            combined.push_str("\n--- stderr ---\n");
        }
        combined.push_str(&stderr);
    }

    combined
}

/// Runs `$exec` arguments through the system shell
pub struct ShellHandler;

#[async_trait]
impl ActionHandler for ShellHandler {
    fn kind(&self) -> DirectiveKind {
        DirectiveKind::ShellExec
    }

    fn description(&self) -> &str {
        "Run a command through the system shell and capture stdout and stderr"
    }

    #[instrument(skip(self, ctx), fields(timeout_secs = ctx.command_timeout.as_secs()))]
    async fn execute(&self, argument: &str, ctx: &ActionContext) -> ExecutionResult {
        if argument.is_empty() {
            return ExecutionResult::failure(ErrorKind::ProcessFailure, "Empty command: nothing to run");
        }

        let (shell, shell_arg) = if cfg!(target_os = "windows") {
            ("cmd", "/C")
        } else {
            ("sh", "-c")
        };

        let mut cmd = Command::new(shell);
        cmd.arg(shell_arg).arg(argument).current_dir(&ctx.working_dir);

        match run_bounded(cmd, ctx.command_timeout).await {
            ProcessOutcome::Completed(output) => {
                let combined = combine_output(&output);

                if output.status.success() {
                    debug!(bytes = combined.len(), "Command succeeded");
                    ExecutionResult::success(combined)
                } else {
                    let exit_code = output
                        .status
                        .code()
                        .map(|c| c.to_string())
                        .unwrap_or_else(|| "unknown".to_string());
                    debug!(exit_code = %exit_code, "Command failed");

                    let combined = if combined.is_empty() {
                        format!("Command exited with code {}", exit_code)
                    } else {
                        combined
                    };
                    ExecutionResult::failure(ErrorKind::ProcessFailure, combined)
                }
            }
            ProcessOutcome::SpawnFailed(e) => {
                warn!(error = %e, "Failed to spawn shell");
                ExecutionResult::failure(
                    ErrorKind::ProcessFailure,
                    format!("Failed to execute command: {}", e),
                )
            }
            ProcessOutcome::TimedOut => {
                warn!("Command timed out");
                ExecutionResult::failure(ErrorKind::Timeout, TIMEOUT_SENTINEL)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_shell_echo() {
        let ctx = ActionContext::default();
        let result = ShellHandler.execute("echo 'hello world'", &ctx).await;
        assert!(result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::None);
        assert!(result.output.contains("hello world"));
    }

    #[tokio::test]
    async fn test_shell_runs_in_working_dir() {
        let temp_dir = TempDir::new().unwrap();
        let ctx = ActionContext {
            working_dir: temp_dir.path().to_path_buf(),
            ..Default::default()
        };

        let result = ShellHandler.execute("pwd", &ctx).await;
        assert!(result.succeeded);
        let expected = temp_dir.path().canonicalize().unwrap();
        assert!(
            result.output.contains(expected.to_str().unwrap())
                || result.output.contains(temp_dir.path().to_str().unwrap())
        );
    }

    #[tokio::test]
    async fn test_shell_failure_keeps_output() {
        let ctx = ActionContext::default();
        let result = ShellHandler.execute("echo partial; echo oops >&2; exit 3", &ctx).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::ProcessFailure);
        assert!(result.output.contains("partial"));
        assert!(result.output.contains("--- stderr ---"));
        assert!(result.output.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_silent_failure_reports_exit_code() {
        let ctx = ActionContext::default();
        let result = ShellHandler.execute("exit 1", &ctx).await;
        assert!(!result.succeeded);
        assert!(result.output.contains("code 1"));
    }

    #[tokio::test]
    async fn test_shell_empty_command() {
        let ctx = ActionContext::default();
        let result = ShellHandler.execute("", &ctx).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::ProcessFailure);
    }

    #[tokio::test]
    async fn test_shell_timeout_is_bounded() {
        let ctx = ActionContext::default().with_command_timeout(Duration::from_secs(1));

        let started = Instant::now();
        let result = ShellHandler.execute("sleep 10", &ctx).await;
        let elapsed = started.elapsed();

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::Timeout);
        assert_eq!(result.output, TIMEOUT_SENTINEL);
        assert!(elapsed < Duration::from_secs(4), "took {:?}", elapsed);
    }
}
