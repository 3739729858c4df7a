//! Control loop implementation

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use llm_core::Generator;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::directive;
use crate::dispatch::Dispatcher;
use crate::memory::{MemoryEntry, MemoryLog, MemoryStore};
use crate::prompt::PromptComposer;

use super::state::{CycleReport, LoopConfig, LoopState};

// ANSI colors
const GREEN: &str = "\x1b[92m";
const YELLOW: &str = "\x1b[93m";
const CYAN: &str = "\x1b[96m";
const DIM: &str = "\x1b[2m";
const RESET: &str = "\x1b[0m";

/// Compose, generate, parse, dispatch, record, persist, sleep, repeat
pub struct AgentLoop {
    generator: Box<dyn Generator>,
    dispatcher: Dispatcher,
    store: MemoryStore,
    composer: PromptComposer,
    config: LoopConfig,
}

impl AgentLoop {
    pub fn new(
        generator: Box<dyn Generator>,
        dispatcher: Dispatcher,
        store: MemoryStore,
        composer: PromptComposer,
        config: LoopConfig,
    ) -> Self {
        Self {
            generator,
            dispatcher,
            store,
            composer,
            config,
        }
    }

    /// Run cycles until `shutdown` turns true or `max_cycles` is reached.
    ///
    /// The shutdown flag is only honoured between cycles; an action that has
    /// started always runs to completion or its own timeout.
    #[instrument(skip_all, fields(model = %self.generator.name()))]
    pub async fn run(&self, state: &mut LoopState, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        info!(
            memory_bytes = state.memory.len(),
            first_cycle = state.cycle + 1,
            max_cycles = ?self.config.max_cycles,
            "Starting control loop"
        );
        if state.memory.is_empty() {
            info!("Memory is empty, starting from scratch");
        }

        loop {
            if *shutdown.borrow() {
                info!(cycles = state.cycles_run, "Shutdown requested, not starting another cycle");
                break;
            }

            if self.cycle_budget_spent(state) {
                break;
            }

            let report = self.run_cycle(state).await?;
            self.echo_report(&report);

            if self.cycle_budget_spent(state) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        // Sender gone: nobody can interrupt us any more, keep pacing
                        tokio::time::sleep(self.config.delay).await;
                    }
                }
            }
        }

        info!(cycles = state.cycles_run, last_cycle = state.cycle, "Control loop stopped");
        Ok(())
    }

    fn cycle_budget_spent(&self, state: &LoopState) -> bool {
        match self.config.max_cycles {
            Some(max) if state.cycles_run >= max => {
                info!(max_cycles = max, "Reached cycle limit");
                true
            }
            _ => false,
        }
    }

    /// One full cycle. Errors are infrastructure failures only.
    #[instrument(skip_all, fields(cycle = state.cycle + 1))]
    pub async fn run_cycle(&self, state: &mut LoopState) -> Result<CycleReport> {
        let cycle = state.cycle + 1;

        let prompt = self.composer.compose(&state.instructions, state.memory.as_str());
        debug!(prompt_chars = prompt.len(), "Composed prompt");

        if self.config.verbose {
            println!("{}[Cycle {}]{}", DIM, cycle, RESET);
            println!("{}AI says:{}", CYAN, RESET);
        }

        let model_output = self.generate(&prompt).await?;

        let directive = directive::parse(&model_output);
        info!(kind = %directive.kind, argument = %directive.argument, "Parsed directive");

        let result = self.dispatcher.dispatch(&directive, &mut state.instructions).await;
        info!(
            succeeded = result.succeeded,
            error_kind = %result.error_kind,
            output_chars = result.output.chars().count(),
            "Dispatched directive"
        );

        let entry = MemoryEntry::new(
            cycle,
            &model_output,
            &directive,
            &result,
            self.config.max_output_chars,
        );
        state.memory.append(&entry);
        self.persist(&state.memory).await?;

        state.cycle = cycle;
        state.cycles_run += 1;

        Ok(CycleReport {
            cycle,
            model_output,
            directive,
            result,
        })
    }

    /// Console transcript for a finished cycle
    fn echo_report(&self, report: &CycleReport) {
        debug!(cycle = report.cycle, "Cycle recorded");
        if !self.config.verbose {
            return;
        }

        if self.config.echo_model_output {
            println!("{}", report.model_output);
        }

        if report.directive.is_none() {
            println!("{}[*] No directive found, waiting...{}", DIM, RESET);
            return;
        }

        println!("{}[*] {}{}", YELLOW, report.directive.summary(), RESET);
        let color = if report.result.succeeded { GREEN } else { YELLOW };
        println!("{}[{}]{}", color, report.result.status_label(), RESET);
        if !report.result.output.is_empty() {
            println!("{}", report.result.output.trim_end());
        }
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        with_retry(
            "model generation",
            self.config.model_attempts,
            self.config.model_retry_delay,
            || self.generator.generate(prompt),
        )
        .await
        .with_context(|| format!("Could not obtain output from model {}", self.generator.name()))
    }

    async fn persist(&self, memory: &MemoryLog) -> Result<()> {
        with_retry(
            "memory save",
            self.config.save_attempts,
            self.config.save_retry_delay,
            || async { self.store.save(memory.as_str()) },
        )
        .await
        .with_context(|| format!("Could not persist memory to {}", self.store.path().display()))
    }
}

/// Call `op` up to `attempts` times, sleeping `delay` between failures
async fn with_retry<T, F, Fut>(what: &str, attempts: u32, delay: Duration, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts => {
                warn!(what, attempt, attempts, error = %e, "Attempt failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                warn!(what, attempts, error = %e, "Giving up");
                return Err(e);
            }
        }
    }
}
