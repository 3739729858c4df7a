//! Ollama API client

use std::io::{stdout, Write};
use std::pin::Pin;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::config::SamplingOptions;
use crate::generator::Generator;

/// Ollama service status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OllamaStatus {
    /// Service is running and ready
    Running,
    /// Service is not reachable
    Stopped,
}

/// Model information from Ollama API
#[derive(Debug, Clone, Deserialize)]
pub struct Model {
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<Model>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    /// The prompt is already templated by the caller
    raw: bool,
    options: GenerateOptions<'a>,
}

#[derive(Debug, Serialize)]
struct GenerateOptions<'a> {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
    num_ctx: u32,
    stop: &'a [String],
}

impl<'a> From<&'a SamplingOptions> for GenerateOptions<'a> {
    fn from(opts: &'a SamplingOptions) -> Self {
        Self {
            temperature: opts.temperature,
            top_p: opts.top_p,
            num_predict: opts.max_tokens,
            num_ctx: opts.ctx_size,
            stop: &opts.stop,
        }
    }
}

/// One line of a `/api/generate` response
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateChunk {
    #[serde(default)]
    pub response: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
    pub prompt_eval_count: Option<u64>,
    pub eval_count: Option<u64>,
}

/// Stream of generate chunks
pub type GenerateStream = Pin<Box<dyn Stream<Item = Result<GenerateChunk>> + Send>>;

/// Ollama API client
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    client: reqwest::Client,
}

impl OllamaClient {
    /// Create a new client; `timeout` bounds every request including generation
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if Ollama is running
    pub async fn health_check(&self) -> Result<bool> {
        let url = format!("{}/api/tags", self.base_url);

        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
        {
            Ok(resp) => Ok(resp.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Get current status
    pub async fn status(&self) -> OllamaStatus {
        if self.health_check().await.unwrap_or(false) {
            OllamaStatus::Running
        } else {
            OllamaStatus::Stopped
        }
    }

    /// List all available models
    pub async fn list_models(&self) -> Result<Vec<Model>> {
        let url = format!("{}/api/tags", self.base_url);

        let resp: TagsResponse = self
            .client
            .get(&url)
            .send()
            .await
            .context("Failed to connect to Ollama")?
            .json()
            .await
            .context("Failed to parse models response")?;

        Ok(resp.models)
    }

    /// Generate a completion and wait for the whole response
    #[instrument(skip(self, prompt, options), fields(prompt_len = prompt.len()))]
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<String> {
        let url = format!("{}/api/generate", self.base_url);

        let req = GenerateRequest {
            model,
            prompt,
            stream: false,
            raw: true,
            options: options.into(),
        };

        let chunk: GenerateChunk = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to connect to Ollama")?
            .error_for_status()
            .context("Generate request failed")?
            .json()
            .await
            .context("Failed to parse generate response")?;

        if let Some(err) = chunk.error {
            anyhow::bail!("Ollama error: {}", err);
        }

        debug!(eval_count = chunk.eval_count, "Generation complete");
        Ok(chunk.response)
    }

    /// Generate a completion as a stream of newline-delimited JSON chunks
    pub async fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        options: &SamplingOptions,
    ) -> Result<GenerateStream> {
        let url = format!("{}/api/generate", self.base_url);

        let req = GenerateRequest {
            model,
            prompt,
            stream: true,
            raw: true,
            options: options.into(),
        };

        let resp = self
            .client
            .post(&url)
            .json(&req)
            .send()
            .await
            .context("Failed to connect to Ollama")?
            .error_for_status()
            .context("Generate request failed")?;

        let mut bytes = Box::pin(resp.bytes_stream());

        let stream = async_stream::stream! {
            let mut buf: Vec<u8> = Vec::new();

            while let Some(chunk) = bytes.next().await {
                let chunk: Bytes = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(anyhow::Error::new(e).context("Failed to read generate stream"));
                        return;
                    }
                };
                buf.extend_from_slice(&chunk);

                while let Some(pos) = buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buf.drain(..=pos).collect();
                    match parse_chunk_line(&line) {
                        Ok(Some(parsed)) => yield Ok(parsed),
                        Ok(None) => {}
                        Err(e) => {
                            yield Err(e);
                            return;
                        }
                    }
                }
            }

            // Trailing line without a newline
            match parse_chunk_line(&buf) {
                Ok(Some(parsed)) => yield Ok(parsed),
                Ok(None) => {}
                Err(e) => yield Err(e),
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Parse one NDJSON line; blank lines yield `None`, error payloads fail
fn parse_chunk_line(line: &[u8]) -> Result<Option<GenerateChunk>> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let chunk: GenerateChunk =
        serde_json::from_str(text).context("Failed to parse generate chunk")?;

    if let Some(ref err) = chunk.error {
        anyhow::bail!("Ollama error: {}", err);
    }

    Ok(Some(chunk))
}

/// [`Generator`] backed by an Ollama server
pub struct OllamaGenerator {
    client: OllamaClient,
    model: String,
    sampling: SamplingOptions,
    stream: bool,
    echo: bool,
}

impl OllamaGenerator {
    pub fn new(
        client: OllamaClient,
        model: String,
        sampling: SamplingOptions,
        stream: bool,
        echo: bool,
    ) -> Self {
        Self {
            client,
            model,
            sampling,
            stream,
            echo,
        }
    }
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        if !self.stream {
            let text = self.client.generate(&self.model, prompt, &self.sampling).await?;
            return Ok(text.trim().to_string());
        }

        let mut stream = self
            .client
            .generate_stream(&self.model, prompt, &self.sampling)
            .await?;

        let mut text = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            if self.echo && !chunk.response.is_empty() {
                print!("{}", chunk.response);
                stdout().flush()?;
            }
            text.push_str(&chunk.response);

            if chunk.done {
                debug!(
                    prompt_tokens = chunk.prompt_eval_count,
                    completion_tokens = chunk.eval_count,
                    "Generation complete"
                );
                break;
            }
        }

        if self.echo && !text.is_empty() {
            println!();
        }

        Ok(text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the base URL
    async fn serve_once(content_type: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 8192];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                content_type,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}", addr)
    }

    #[test]
    fn test_parse_chunk_line() {
        let chunk = parse_chunk_line(br#"{"response":"Hel","done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.response, "Hel");
        assert!(!chunk.done);

        assert!(parse_chunk_line(b"  \n").unwrap().is_none());
    }

    #[test]
    fn test_parse_chunk_line_error_payload() {
        let err = parse_chunk_line(br#"{"error":"model 'x' not found"}"#).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_generate_options_from_sampling() {
        let sampling = SamplingOptions::default();
        let opts = GenerateOptions::from(&sampling);
        let json = serde_json::to_value(&opts).unwrap();
        assert_eq!(json["num_predict"], 512);
        assert_eq!(json["stop"][0], "<|user|>");
    }

    #[tokio::test]
    async fn test_streaming_generator_accumulates_chunks() {
        let body = [
            r#"{"response":"$exec ","done":false}"#,
            r#"{"response":"echo hi","done":false}"#,
            r#"{"response":"","done":true,"eval_count":4}"#,
        ]
        .join("\n");
        let url = serve_once("application/x-ndjson", body).await;

        let client = OllamaClient::new(url, Duration::from_secs(5)).unwrap();
        let generator = OllamaGenerator::new(
            client,
            "tinyllama".to_string(),
            SamplingOptions::default(),
            true,
            false,
        );

        let text = generator.generate("<|system|>\nhi\n<|assistant|>\n").await.unwrap();
        assert_eq!(text, "$exec echo hi");
    }

    #[tokio::test]
    async fn test_non_streaming_generate() {
        let url = serve_once(
            "application/json",
            r#"{"response":"  I will check the weather \n","done":true}"#.to_string(),
        )
        .await;

        let client = OllamaClient::new(url, Duration::from_secs(5)).unwrap();
        let generator = OllamaGenerator::new(
            client,
            "tinyllama".to_string(),
            SamplingOptions::default(),
            false,
            false,
        );

        let text = generator.generate("prompt").await.unwrap();
        assert_eq!(text, "I will check the weather");
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        // Port 9 (discard) is closed on test machines
        let client = OllamaClient::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        assert!(!client.health_check().await.unwrap());
        assert_eq!(client.status().await, OllamaStatus::Stopped);
    }
}
