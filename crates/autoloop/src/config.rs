//! Configuration for autoloop
//!
//! Configuration file: `autoloop.toml` in the current directory or a parent,
//! falling back to ~/.config/autoloop/config.toml (or platform equivalent).

use anyhow::{Context, Result};
use llm_core::ModelConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::agent::LoopConfig;
use crate::dispatch::ActionContext;
use crate::prompt::{PromptComposer, PromptTemplate};

const CONFIG_FILE_NAME: &str = "autoloop.toml";

/// Full settings file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    /// Model collaborator
    #[serde(default)]
    pub model: ModelConfig,

    /// Control loop
    #[serde(default, rename = "loop")]
    pub agent: LoopSettings,
}

/// `[loop]` section
#[derive(Debug, Clone, Deserialize)]
pub struct LoopSettings {
    /// Memory log file
    #[serde(default = "default_memory_path")]
    pub memory_path: PathBuf,

    /// Operator base prompt appended to the built-in instructions
    #[serde(default)]
    pub prompt_file: Option<PathBuf>,

    /// Seconds to sleep between cycles
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Cap on any output kept in memory, in characters
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,

    #[serde(default)]
    pub template: PromptTemplate,

    /// Line between the instructions and the memory log
    #[serde(default = "default_separator")]
    pub separator: String,

    /// Manual-page viewer for `$browse_docs`
    #[serde(default = "default_doc_viewer")]
    pub doc_viewer: String,

    #[serde(default = "default_attempts")]
    pub model_attempts: u32,

    #[serde(default = "default_model_retry_ms")]
    pub model_retry_delay_ms: u64,

    #[serde(default = "default_attempts")]
    pub save_attempts: u32,

    #[serde(default = "default_save_retry_ms")]
    pub save_retry_delay_ms: u64,
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("memory.txt")
}

fn default_delay_secs() -> u64 {
    3
}

fn default_command_timeout() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    10
}

fn default_max_output_chars() -> usize {
    2000
}

fn default_separator() -> String {
    "### Memory".to_string()
}

fn default_doc_viewer() -> String {
    "man".to_string()
}

fn default_attempts() -> u32 {
    3
}

fn default_model_retry_ms() -> u64 {
    2000
}

fn default_save_retry_ms() -> u64 {
    500
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            memory_path: default_memory_path(),
            prompt_file: None,
            delay_secs: default_delay_secs(),
            command_timeout_secs: default_command_timeout(),
            http_timeout_secs: default_http_timeout(),
            max_output_chars: default_max_output_chars(),
            template: PromptTemplate::default(),
            separator: default_separator(),
            doc_viewer: default_doc_viewer(),
            model_attempts: default_attempts(),
            model_retry_delay_ms: default_model_retry_ms(),
            save_attempts: default_attempts(),
            save_retry_delay_ms: default_save_retry_ms(),
        }
    }
}

impl LoopSettings {
    pub fn action_context(&self, working_dir: PathBuf) -> ActionContext {
        ActionContext {
            working_dir,
            ..Default::default()
        }
        .with_command_timeout(Duration::from_secs(self.command_timeout_secs))
        .with_http_timeout(Duration::from_secs(self.http_timeout_secs))
        .with_max_output_chars(self.max_output_chars)
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            delay: Duration::from_secs(self.delay_secs),
            max_cycles: None,
            model_attempts: self.model_attempts,
            model_retry_delay: Duration::from_millis(self.model_retry_delay_ms),
            save_attempts: self.save_attempts,
            save_retry_delay: Duration::from_millis(self.save_retry_delay_ms),
            max_output_chars: self.max_output_chars,
            verbose: true,
            echo_model_output: true,
        }
    }

    pub fn composer(&self) -> PromptComposer {
        PromptComposer::new(self.template, self.separator.clone())
    }
}

impl Settings {
    /// Load from an explicit path, or search the default locations.
    ///
    /// Returns the settings and the file they came from (`None` for defaults).
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>)> {
        if let Some(path) = explicit {
            return Ok((Self::load_from(path)?, Some(path.to_path_buf())));
        }

        if let Some(path) = Self::find_config_path() {
            return Ok((Self::load_from(&path)?, Some(path)));
        }

        if let Ok(path) = Self::user_config_path() {
            if path.exists() {
                return Ok((Self::load_from(&path)?, Some(path)));
            }
        }

        Ok((Self::default(), None))
    }

    /// Load configuration from a specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read {}", path.as_ref().display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.as_ref().display()))
    }

    /// Find autoloop.toml by searching current directory and parents
    pub fn find_config_path() -> Option<PathBuf> {
        let mut current = std::env::current_dir().ok()?;

        for _ in 0..10 {
            let candidate = current.join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Some(candidate);
            }
            if !current.pop() {
                break;
            }
        }

        None
    }

    /// Per-user configuration file path
    pub fn user_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;

        Ok(config_dir.join("autoloop").join("config.toml"))
    }

    /// Write a commented default autoloop.toml into `dir`
    pub fn create_default(dir: &Path) -> Result<PathBuf> {
        let path = dir.join(CONFIG_FILE_NAME);

        if path.exists() {
            anyhow::bail!("Config file already exists: {}", path.display());
        }

        let default_config = r####"# autoloop configuration

[model]
# "ollama" or "llama-cpp"
backend = "ollama"
name = "tinyllama"
host = "127.0.0.1"
port = 11434
stream = true
request_timeout_secs = 300

# llama.cpp backend only
# model_path = "/path/to/tinyllama-1.1b-chat.Q4_K_M.gguf"
# llama_bin = "llama-cli"
# threads = 8
# gpu_layers = 99

[model.sampling]
temperature = 0.2
top_p = 0.95
max_tokens = 512
ctx_size = 2048
stop = ["<|user|>", "<|assistant|>"]

[loop]
memory_path = "memory.txt"
# prompt_file = "prompt.txt"
delay_secs = 3
command_timeout_secs = 60
http_timeout_secs = 10
max_output_chars = 2000
# "chat" (role tags) or "plain"
template = "chat"
separator = "### Memory"
doc_viewer = "man"
model_attempts = 3
model_retry_delay_ms = 2000
save_attempts = 3
save_retry_delay_ms = 500
"####;

        fs::write(&path, default_config)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_core::Backend;
    use tempfile::TempDir;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.agent.memory_path, PathBuf::from("memory.txt"));
        assert_eq!(settings.agent.command_timeout_secs, 60);
        assert_eq!(settings.agent.max_output_chars, 2000);
        assert_eq!(settings.model.backend, Backend::Ollama);
    }

    #[test]
    fn test_parse_settings() {
        let toml = r#"
[model]
backend = "llama-cpp"
model_path = "/models/tiny.gguf"

[loop]
memory_path = "/var/lib/autoloop/memory.txt"
delay_secs = 5
template = "plain"
"#;

        let settings: Settings = toml::from_str(toml).unwrap();
        assert_eq!(settings.model.backend, Backend::LlamaCpp);
        assert_eq!(settings.agent.delay_secs, 5);
        assert_eq!(settings.agent.template, PromptTemplate::Plain);
        assert_eq!(settings.agent.http_timeout_secs, 10);

        let config = settings.agent.loop_config();
        assert_eq!(config.delay, Duration::from_secs(5));

        let ctx = settings.agent.action_context(PathBuf::from("/tmp"));
        assert_eq!(ctx.command_timeout, Duration::from_secs(60));
        assert_eq!(ctx.max_output_chars, 2000);
    }

    #[test]
    fn test_created_default_parses() {
        let dir = TempDir::new().unwrap();
        let path = Settings::create_default(dir.path()).unwrap();

        let settings = Settings::load_from(&path).unwrap();
        assert_eq!(settings.model.name, "tinyllama");
        assert_eq!(settings.model.sampling.top_p, 0.95);
        assert_eq!(settings.agent.separator, "### Memory");

        assert!(Settings::create_default(dir.path()).is_err());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "[loop]\ndelay_secs = 1\n").unwrap();

        let (settings, source) = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.agent.delay_secs, 1);
        assert_eq!(source, Some(path));
    }
}
