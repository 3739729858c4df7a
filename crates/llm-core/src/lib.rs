//! llm-core: Model collaborator for the autoloop control loop
//!
//! Provides:
//! - Model configuration (`[model]` section of autoloop.toml)
//! - Ollama API client (with streaming support)
//! - llama.cpp CLI runner
//! - The `Generator` trait the loop calls for every prompt

pub mod config;
pub mod generator;
pub mod llama_cpp;
pub mod ollama;

pub use config::{Backend, ModelConfig, SamplingOptions};
pub use generator::{from_config, Generator};
pub use llama_cpp::LlamaCppGenerator;
pub use ollama::{GenerateChunk, GenerateStream, Model, OllamaClient, OllamaGenerator, OllamaStatus};
