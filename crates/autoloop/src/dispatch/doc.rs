//! Manual-page lookup

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use super::shell::{combine_output, run_bounded, ProcessOutcome};
use super::{ActionContext, ActionHandler, ErrorKind, ExecutionResult, TIMEOUT_SENTINEL};
use crate::directive::DirectiveKind;

/// Runs the manual-page viewer for `$browse_docs` topics
pub struct DocLookupHandler {
    viewer: String,
}

impl DocLookupHandler {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
        }
    }
}

impl Default for DocLookupHandler {
    fn default() -> Self {
        Self::new("man")
    }
}

/// Remove backspace overstrike sequences (`X\bX` bold, `_\bX` underline)
fn strip_overstrike(text: &str) -> String {
    let mut out: Vec<char> = Vec::with_capacity(text.len());
    for c in text.chars() {
        if c == '\u{8}' {
            out.pop();
        } else {
            out.push(c);
        }
    }
    out.into_iter().collect()
}

#[async_trait]
impl ActionHandler for DocLookupHandler {
    fn kind(&self) -> DirectiveKind {
        DirectiveKind::DocLookup
    }

    fn description(&self) -> &str {
        "Read the manual page for a topic"
    }

    #[instrument(skip(self, ctx), fields(viewer = %self.viewer))]
    async fn execute(&self, argument: &str, ctx: &ActionContext) -> ExecutionResult {
        let words: Vec<&str> = argument.split_whitespace().collect();
        if words.is_empty() {
            return ExecutionResult::failure(ErrorKind::LookupFailure, "No manual topic given");
        }

        let mut cmd = Command::new(&self.viewer);
        cmd.args(&words)
            .current_dir(&ctx.working_dir)
            .env("MANPAGER", "cat")
            .env("PAGER", "cat")
            .env("MANWIDTH", "100");

        match run_bounded(cmd, ctx.command_timeout).await {
            ProcessOutcome::Completed(output) => {
                let text = strip_overstrike(&combine_output(&output));

                if !output.status.success() {
                    debug!(status = %output.status, "Viewer reported failure");
                    let text = if text.trim().is_empty() {
                        format!("No manual entry for {}", argument)
                    } else {
                        text
                    };
                    return ExecutionResult::failure(ErrorKind::LookupFailure, text);
                }

                if text.trim().is_empty() {
                    return ExecutionResult::failure(
                        ErrorKind::LookupFailure,
                        format!("Empty manual page for {}", argument),
                    );
                }

                ExecutionResult::success(text)
            }
            ProcessOutcome::SpawnFailed(e) => {
                warn!(error = %e, "Failed to start manual viewer");
                ExecutionResult::failure(
                    ErrorKind::LookupFailure,
                    format!("Failed to run {}: {}", self.viewer, e),
                )
            }
            ProcessOutcome::TimedOut => ExecutionResult::failure(ErrorKind::Timeout, TIMEOUT_SENTINEL),
        }
    }
}
