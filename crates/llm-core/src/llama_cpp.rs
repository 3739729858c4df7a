//! llama.cpp runner: one `llama-cli` process per completion

use std::path::PathBuf;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::SamplingOptions;
use crate::generator::Generator;

/// [`Generator`] that shells out to llama.cpp
pub struct LlamaCppGenerator {
    bin: String,
    model_path: PathBuf,
    sampling: SamplingOptions,
    threads: Option<u32>,
    gpu_layers: Option<u32>,
    label: String,
}

impl LlamaCppGenerator {
    pub fn new(
        bin: String,
        model_path: PathBuf,
        sampling: SamplingOptions,
        threads: Option<u32>,
        gpu_layers: Option<u32>,
    ) -> Self {
        let label = model_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| model_path.display().to_string());

        Self {
            bin,
            model_path,
            sampling,
            threads,
            gpu_layers,
            label,
        }
    }

    /// Command-line arguments for one completion
    fn build_args(&self, prompt: &str) -> Vec<String> {
        let mut args = vec![
            "-m".to_string(),
            self.model_path.display().to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "-n".to_string(),
            self.sampling.max_tokens.to_string(),
            "-c".to_string(),
            self.sampling.ctx_size.to_string(),
            "--temp".to_string(),
            self.sampling.temperature.to_string(),
            "--top-p".to_string(),
            self.sampling.top_p.to_string(),
            "--no-display-prompt".to_string(),
        ];

        let threads = self
            .threads
            .unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get() as u32).unwrap_or(4));
        args.push("-t".to_string());
        args.push(threads.to_string());

        if let Some(layers) = self.gpu_layers {
            args.push("--n-gpu-layers".to_string());
            args.push(layers.to_string());
        }

        for stop in &self.sampling.stop {
            args.push("-r".to_string());
            args.push(stop.clone());
        }

        args
    }
}

/// Cut generated text at the earliest stop sequence
fn cut_at_stop<'a>(text: &'a str, stops: &[String]) -> &'a str {
    let end = stops
        .iter()
        .filter(|s| !s.is_empty())
        .filter_map(|s| text.find(s.as_str()))
        .min()
        .unwrap_or(text.len());
    &text[..end]
}

#[async_trait]
impl Generator for LlamaCppGenerator {
    fn name(&self) -> &str {
        &self.label
    }

    #[instrument(skip(self, prompt), fields(model = %self.label, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<String> {
        let output = Command::new(&self.bin)
            .args(self.build_args(prompt))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.bin))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "{} exited with {}: {}",
                self.bin,
                output.status,
                stderr.lines().last().unwrap_or("")
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(bytes = stdout.len(), "llama.cpp completion received");

        Ok(cut_at_stop(&stdout, &self.sampling.stop).trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generator(bin: &str) -> LlamaCppGenerator {
        LlamaCppGenerator::new(
            bin.to_string(),
            PathBuf::from("/models/tinyllama.gguf"),
            SamplingOptions::default(),
            Some(2),
            None,
        )
    }

    #[test]
    fn test_build_args() {
        let args = generator("llama-cli").build_args("hello");
        let joined = args.join(" ");
        assert!(joined.contains("-m /models/tinyllama.gguf"));
        assert!(joined.contains("-p hello"));
        assert!(joined.contains("--temp 0.2"));
        assert!(joined.contains("-t 2"));
        assert!(joined.contains("-r <|user|>"));
        assert!(!joined.contains("--n-gpu-layers"));
    }

    #[test]
    fn test_cut_at_stop() {
        let stops = vec!["<|user|>".to_string(), "<|assistant|>".to_string()];
        assert_eq!(cut_at_stop("$exec ls\n<|user|>\nmore", &stops), "$exec ls\n");
        assert_eq!(cut_at_stop("no stop here", &stops), "no stop here");
    }

    #[test]
    fn test_label_is_file_name() {
        assert_eq!(generator("llama-cli").name(), "tinyllama.gguf");
    }

    #[tokio::test]
    async fn test_missing_binary_is_error() {
        let err = generator("definitely-not-a-llama-binary")
            .generate("hi")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("failed to run"));
    }
}
