//! Action dispatch: route a directive to its handler and capture the outcome as data
//!
//! Nothing in here returns `Err` to the loop. Every failure, including a
//! panicking handler, becomes an [`ExecutionResult`].

mod doc;
mod http;
mod registry;
mod shell;

pub use doc::DocLookupHandler;
pub use http::HttpFetchHandler;
pub use registry::ActionRegistry;
pub use shell::ShellHandler;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::directive::{Directive, DirectiveKind};
use crate::prompt::InstructionBlock;

/// Output recorded when the model reply carried no directive
pub const NO_DIRECTIVE_SENTINEL: &str = "[No directive found]";

/// Output recorded when a command hit its timeout
pub const TIMEOUT_SENTINEL: &str = "[Command Timeout]";

/// Failure classification for an [`ExecutionResult`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    None,
    ProcessFailure,
    Timeout,
    NetworkFailure,
    LookupFailure,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::None => write!(f, "None"),
            ErrorKind::ProcessFailure => write!(f, "ProcessFailure"),
            ErrorKind::Timeout => write!(f, "Timeout"),
            ErrorKind::NetworkFailure => write!(f, "NetworkFailure"),
            ErrorKind::LookupFailure => write!(f, "LookupFailure"),
        }
    }
}

/// Outcome of dispatching one directive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub succeeded: bool,
    pub output: String,
    pub error_kind: ErrorKind,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            succeeded: true,
            output: output.into(),
            error_kind: ErrorKind::None,
        }
    }

    pub fn failure(error_kind: ErrorKind, output: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            output: output.into(),
            error_kind,
        }
    }

    pub fn no_directive() -> Self {
        Self::failure(ErrorKind::None, NO_DIRECTIVE_SENTINEL)
    }

    /// `ok` or `failed (<kind>)`
    pub fn status_label(&self) -> String {
        if self.succeeded {
            "ok".to_string()
        } else {
            format!("failed ({})", self.error_kind)
        }
    }
}

/// Limits and environment shared by all handlers
#[derive(Debug, Clone)]
pub struct ActionContext {
    /// Working directory for spawned processes
    pub working_dir: PathBuf,
    /// Bound on shell commands and manual-page lookups
    pub command_timeout: Duration,
    /// Bound on HTTP fetches
    pub http_timeout: Duration,
    /// Cap on retained output, in characters
    pub max_output_chars: usize,
}

impl Default for ActionContext {
    fn default() -> Self {
        Self {
            working_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            command_timeout: Duration::from_secs(60),
            http_timeout: Duration::from_secs(10),
            max_output_chars: 2000,
        }
    }
}

impl ActionContext {
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    pub fn with_max_output_chars(mut self, max: usize) -> Self {
        self.max_output_chars = max;
        self
    }
}

/// A side-effecting action the model can request
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Directive kind this handler serves
    fn kind(&self) -> DirectiveKind;

    fn description(&self) -> &str;

    /// Run the action. Must report every failure through the result.
    async fn execute(&self, argument: &str, ctx: &ActionContext) -> ExecutionResult;
}

/// Cap `output` at `max_chars` characters, cutting on a char boundary
pub fn truncate_output(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        Some((cut, _)) => format!(
            "{}\n[output truncated at {} characters]",
            &output[..cut],
            max_chars
        ),
        None => output.to_string(),
    }
}

/// Error kind used when a kind has no registered handler
fn missing_handler_error(kind: DirectiveKind) -> ErrorKind {
    match kind {
        DirectiveKind::DocLookup => ErrorKind::LookupFailure,
        DirectiveKind::HttpFetch => ErrorKind::NetworkFailure,
        _ => ErrorKind::ProcessFailure,
    }
}

/// Routes directives to handlers
pub struct Dispatcher {
    registry: ActionRegistry,
    ctx: ActionContext,
}

impl Dispatcher {
    pub fn new(registry: ActionRegistry, ctx: ActionContext) -> Self {
        Self { registry, ctx }
    }

    /// Dispatcher with the shell, manual-page and HTTP handlers registered
    pub fn with_default_handlers(ctx: ActionContext, doc_viewer: impl Into<String>) -> Self {
        Self::new(create_default_registry(doc_viewer), ctx)
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Execute one directive. `SelfUpgrade` amends `instructions` in place.
    #[instrument(skip(self, directive, instructions), fields(kind = %directive.kind))]
    pub async fn dispatch(
        &self,
        directive: &Directive,
        instructions: &mut InstructionBlock,
    ) -> ExecutionResult {
        let result = match directive.kind {
            DirectiveKind::None => ExecutionResult::no_directive(),
            DirectiveKind::SelfUpgrade => self_upgrade(&directive.argument, instructions),
            kind => self.run_handler(kind, &directive.argument).await,
        };

        let result = ExecutionResult {
            output: truncate_output(&result.output, self.ctx.max_output_chars),
            ..result
        };

        if result.succeeded {
            info!(output_chars = result.output.chars().count(), "Directive succeeded");
        } else if directive.is_none() {
            debug!("No directive to dispatch");
        } else {
            warn!(error_kind = %result.error_kind, "Directive failed");
        }

        result
    }

    async fn run_handler(&self, kind: DirectiveKind, argument: &str) -> ExecutionResult {
        let Some(handler) = self.registry.get(kind) else {
            warn!(kind = %kind, "No handler registered");
            return ExecutionResult::failure(
                missing_handler_error(kind),
                format!("No handler registered for {}", kind),
            );
        };

        // Run on its own task so a panicking handler cannot take the loop down
        let argument = argument.to_string();
        let ctx = self.ctx.clone();
        let task = tokio::spawn(async move { handler.execute(&argument, &ctx).await });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Handler task failed");
                ExecutionResult::failure(
                    missing_handler_error(kind),
                    format!("Handler crashed: {}", e),
                )
            }
        }
    }
}

fn self_upgrade(argument: &str, instructions: &mut InstructionBlock) -> ExecutionResult {
    if argument.is_empty() {
        return ExecutionResult::failure(ErrorKind::None, "Upgrade ignored: no instruction text given");
    }

    instructions.amend(argument);
    info!(amendments = instructions.amendments(), "Instruction block upgraded");
    ExecutionResult::success(format!("Instructions updated: {}", argument))
}

/// Create a registry with all default handlers
pub fn create_default_registry(doc_viewer: impl Into<String>) -> ActionRegistry {
    let mut registry = ActionRegistry::new();

    registry.register(ShellHandler);
    registry.register(DocLookupHandler::new(doc_viewer));
    registry.register(HttpFetchHandler::new());

    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    struct PanickingHandler;

    #[async_trait]
    impl ActionHandler for PanickingHandler {
        fn kind(&self) -> DirectiveKind {
            DirectiveKind::ShellExec
        }

        fn description(&self) -> &str {
            "always panics"
        }

        async fn execute(&self, _argument: &str, _ctx: &ActionContext) -> ExecutionResult {
            panic!("handler blew up");
        }
    }

    fn instructions() -> InstructionBlock {
        InstructionBlock::new("Base instructions.")
    }

    #[test]
    fn test_truncate_output() {
        assert_eq!(truncate_output("short", 10), "short");
        assert_eq!(truncate_output("exactly10!", 10), "exactly10!");

        let long = "x".repeat(2500);
        let cut = truncate_output(&long, 2000);
        assert!(cut.starts_with(&"x".repeat(2000)));
        assert!(!cut.starts_with(&"x".repeat(2001)));
        assert!(cut.ends_with("[output truncated at 2000 characters]"));
    }

    #[test]
    fn test_truncate_output_respects_char_boundaries() {
        let text = "é".repeat(5);
        let cut = truncate_output(&text, 3);
        assert!(cut.starts_with("ééé\n"));
    }

    #[tokio::test]
    async fn test_none_directive_returns_sentinel() {
        let dispatcher = Dispatcher::new(ActionRegistry::new(), ActionContext::default());
        let mut block = instructions();

        let result = dispatcher.dispatch(&Directive::none(), &mut block).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::None);
        assert_eq!(result.output, NO_DIRECTIVE_SENTINEL);
    }

    #[tokio::test]
    async fn test_self_upgrade_amends_instructions() {
        let dispatcher = Dispatcher::new(ActionRegistry::new(), ActionContext::default());
        let mut block = instructions();

        let directive = Directive::new(DirectiveKind::SelfUpgrade, "Always explain first.");
        let result = dispatcher.dispatch(&directive, &mut block).await;
        assert!(result.succeeded);
        assert!(block.text().ends_with("Always explain first."));
        assert_eq!(block.amendments(), 1);

        let empty = Directive::new(DirectiveKind::SelfUpgrade, "");
        let result = dispatcher.dispatch(&empty, &mut block).await;
        assert!(!result.succeeded);
        assert_eq!(block.amendments(), 1);
    }

    #[tokio::test]
    async fn test_missing_handler_is_data() {
        let dispatcher = Dispatcher::new(ActionRegistry::new(), ActionContext::default());
        let mut block = instructions();

        let directive = Directive::new(DirectiveKind::HttpFetch, "http://example.com");
        let result = dispatcher.dispatch(&directive, &mut block).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::NetworkFailure);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut registry = ActionRegistry::new();
        registry.register(PanickingHandler);
        let dispatcher = Dispatcher::new(registry, ActionContext::default());
        let mut block = instructions();

        let directive = Directive::new(DirectiveKind::ShellExec, "anything");
        let result = dispatcher.dispatch(&directive, &mut block).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::ProcessFailure);
        assert!(result.output.contains("Handler crashed"));
    }

    #[tokio::test]
    async fn test_output_is_capped() {
        let ctx = ActionContext::default().with_max_output_chars(10);
        let dispatcher = Dispatcher::with_default_handlers(ctx, "man");
        let mut block = instructions();

        let directive = Directive::new(DirectiveKind::ShellExec, "printf 'abcdefghijklmnopqrstuvwxyz'");
        let result = dispatcher.dispatch(&directive, &mut block).await;
        assert!(result.succeeded);
        assert!(result.output.starts_with("abcdefghij\n"));
        assert!(result.output.contains("truncated"));
    }

    #[test]
    fn test_status_label() {
        assert_eq!(ExecutionResult::success("x").status_label(), "ok");
        assert_eq!(
            ExecutionResult::failure(ErrorKind::Timeout, TIMEOUT_SENTINEL).status_label(),
            "failed (Timeout)"
        );
    }
}
