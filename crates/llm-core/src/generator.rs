//! The text-to-text seam between the control loop and a model backend

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::{Backend, ModelConfig};
use crate::llama_cpp::LlamaCppGenerator;
use crate::ollama::{OllamaClient, OllamaGenerator};

/// A synchronous-from-the-caller's-view text generator.
///
/// Implementations own their sampling parameters; the caller only supplies the
/// fully composed prompt and receives the generated text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Human-readable identity (backend and model)
    fn name(&self) -> &str;

    /// Produce one completion for `prompt`
    async fn generate(&self, prompt: &str) -> Result<String>;
}

/// Build the generator selected by `config.backend`.
///
/// `echo` streams tokens to stdout as they arrive (Ollama streaming only).
pub fn from_config(config: &ModelConfig, echo: bool) -> Result<Box<dyn Generator>> {
    match config.backend {
        Backend::Ollama => {
            let client = OllamaClient::new(
                config.ollama_url(),
                Duration::from_secs(config.request_timeout_secs),
            )?;
            Ok(Box::new(OllamaGenerator::new(
                client,
                config.name.clone(),
                config.sampling.clone(),
                config.stream,
                echo,
            )))
        }
        Backend::LlamaCpp => {
            let model_path = config
                .model_path
                .clone()
                .context("model_path (or --model-path / MODEL_PATH) is required for llama.cpp")?;
            Ok(Box::new(LlamaCppGenerator::new(
                config.llama_bin.clone(),
                model_path,
                config.sampling.clone(),
                config.threads,
                config.gpu_layers,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llama_cpp_requires_model_path() {
        let config = ModelConfig {
            backend: Backend::LlamaCpp,
            ..Default::default()
        };
        let err = from_config(&config, false).err().unwrap();
        assert!(err.to_string().contains("model_path"));
    }

    #[test]
    fn test_ollama_generator_named_after_model() {
        let config = ModelConfig {
            name: "tinyllama:chat".to_string(),
            ..Default::default()
        };
        let generator = from_config(&config, false).unwrap();
        assert_eq!(generator.name(), "tinyllama:chat");
    }
}
