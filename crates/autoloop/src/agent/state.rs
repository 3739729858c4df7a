//! Loop configuration and the state threaded through each cycle

use std::time::Duration;

use crate::directive::Directive;
use crate::dispatch::ExecutionResult;
use crate::memory::MemoryLog;
use crate::prompt::InstructionBlock;

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause between cycles
    pub delay: Duration,
    /// Stop after this many cycles (runs forever when `None`)
    pub max_cycles: Option<u64>,
    /// Attempts at obtaining model output before giving up
    pub model_attempts: u32,
    pub model_retry_delay: Duration,
    /// Attempts at persisting memory before giving up
    pub save_attempts: u32,
    pub save_retry_delay: Duration,
    /// Cap applied to model output when it is written to memory
    pub max_output_chars: usize,
    /// Echo each cycle to the terminal
    pub verbose: bool,
    /// Print the model reply; off when the generator already streamed it
    pub echo_model_output: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(3),
            max_cycles: None,
            model_attempts: 3,
            model_retry_delay: Duration::from_secs(2),
            save_attempts: 3,
            save_retry_delay: Duration::from_millis(500),
            max_output_chars: 2000,
            verbose: true,
            echo_model_output: true,
        }
    }
}

impl LoopConfig {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_max_cycles(mut self, max: Option<u64>) -> Self {
        self.max_cycles = max;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// No delays anywhere; for scripted runs
    pub fn without_delays(mut self) -> Self {
        self.delay = Duration::ZERO;
        self.model_retry_delay = Duration::ZERO;
        self.save_retry_delay = Duration::ZERO;
        self
    }
}

/// Everything the loop mutates, owned by the caller
#[derive(Debug, Clone)]
pub struct LoopState {
    pub instructions: InstructionBlock,
    pub memory: MemoryLog,
    /// Number of the last completed cycle, continuing across runs
    pub cycle: u64,
    /// Cycles completed by this process
    pub cycles_run: u64,
}

impl LoopState {
    pub fn new(instructions: InstructionBlock, memory: MemoryLog) -> Self {
        let cycle = memory.last_cycle();
        Self {
            instructions,
            memory,
            cycle,
            cycles_run: 0,
        }
    }
}

/// What happened in one cycle
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub cycle: u64,
    pub model_output: String,
    pub directive: Directive,
    pub result: ExecutionResult,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_config_builder() {
        let config = LoopConfig::default()
            .with_delay(Duration::from_secs(5))
            .with_max_cycles(Some(4))
            .with_verbose(false);

        assert_eq!(config.delay, Duration::from_secs(5));
        assert_eq!(config.max_cycles, Some(4));
        assert!(!config.verbose);

        let config = config.without_delays();
        assert_eq!(config.delay, Duration::ZERO);
        assert_eq!(config.save_retry_delay, Duration::ZERO);
    }

    #[test]
    fn test_state_ignores_headings_replayed_in_output() {
        use crate::directive::{Directive, DirectiveKind};
        use crate::memory::MemoryEntry;

        let mut memory = MemoryLog::default();
        memory.append(&MemoryEntry::new(
            1,
            "$exec cat memory.txt",
            &Directive::new(DirectiveKind::ShellExec, "cat memory.txt"),
            &ExecutionResult::success("### Cycle 1 @ x\nOutput:\n\n### Cycle 2 @ y\nOutput:\n"),
            2000,
        ));

        let state = LoopState::new(InstructionBlock::new("i"), memory);
        assert_eq!(state.cycle, 1);
    }

    #[test]
    fn test_state_continues_cycle_numbering() {
        let memory = MemoryLog::from_text("### Cycle 1 @ x\nOutput:\n\n### Cycle 2 @ y\nOutput:\n");
        let state = LoopState::new(InstructionBlock::new("i"), memory);
        assert_eq!(state.cycle, 2);
        assert_eq!(state.cycles_run, 0);
    }
}
