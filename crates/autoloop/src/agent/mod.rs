//! Control loop for autonomous directive execution
//!
//! Implements a compose-generate-dispatch-record loop over a persistent memory log.

mod agent_loop;
mod state;

pub use agent_loop::AgentLoop;
pub use state::{LoopConfig, LoopState};
