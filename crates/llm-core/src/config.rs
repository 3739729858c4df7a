//! Model backend configuration (the `[model]` section of autoloop.toml)

use serde::Deserialize;
use std::fmt;
use std::path::PathBuf;

/// Which runtime produces completions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Ollama HTTP API
    #[default]
    Ollama,
    /// llama.cpp `llama-cli` binary, one process per completion
    LlamaCpp,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Ollama => write!(f, "ollama"),
            Backend::LlamaCpp => write!(f, "llama-cpp"),
        }
    }
}

/// Sampling parameters passed to the model on every call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplingOptions {
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Nucleus-sampling threshold
    #[serde(default = "default_top_p")]
    pub top_p: f32,

    /// Maximum number of tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Context window size
    #[serde(default = "default_ctx_size")]
    pub ctx_size: u32,

    /// Generation stops at the first of these sequences
    #[serde(default = "default_stop")]
    pub stop: Vec<String>,
}

/// Model collaborator configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub backend: Backend,

    /// Model name as known to Ollama
    #[serde(default = "default_model_name")]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Stream tokens from Ollama instead of waiting for the full response
    #[serde(default = "default_true")]
    pub stream: bool,

    /// Upper bound on a single generation request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// GGUF file for the llama.cpp backend
    #[serde(default)]
    pub model_path: Option<PathBuf>,

    #[serde(default = "default_llama_bin")]
    pub llama_bin: String,

    #[serde(default)]
    pub threads: Option<u32>,

    #[serde(default)]
    pub gpu_layers: Option<u32>,

    #[serde(default)]
    pub sampling: SamplingOptions,
}

fn default_temperature() -> f32 {
    0.2
}

fn default_top_p() -> f32 {
    0.95
}

fn default_max_tokens() -> u32 {
    512
}

fn default_ctx_size() -> u32 {
    2048
}

fn default_stop() -> Vec<String> {
    vec!["<|user|>".to_string(), "<|assistant|>".to_string()]
}

fn default_model_name() -> String {
    "tinyllama".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> u64 {
    300
}

fn default_llama_bin() -> String {
    "llama-cli".to_string()
}

impl Default for SamplingOptions {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            top_p: default_top_p(),
            max_tokens: default_max_tokens(),
            ctx_size: default_ctx_size(),
            stop: default_stop(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            name: default_model_name(),
            host: default_host(),
            port: default_port(),
            stream: true,
            request_timeout_secs: default_request_timeout(),
            model_path: None,
            llama_bin: default_llama_bin(),
            threads: None,
            gpu_layers: None,
            sampling: SamplingOptions::default(),
        }
    }
}

impl ModelConfig {
    /// Get Ollama base URL
    pub fn ollama_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Short label for logs: backend plus model identity
    pub fn describe(&self) -> String {
        match self.backend {
            Backend::Ollama => format!("ollama/{}", self.name),
            Backend::LlamaCpp => format!(
                "llama-cpp/{}",
                self.model_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "<no model_path>".to_string())
            ),
        }
    }
}
