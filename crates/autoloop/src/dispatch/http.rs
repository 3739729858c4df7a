//! HTTP fetch

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use super::{ActionContext, ActionHandler, ErrorKind, ExecutionResult};
use crate::directive::DirectiveKind;

/// Performs unauthenticated GET requests for `$exec_internet`
pub struct HttpFetchHandler {
    client: reqwest::Client,
}

impl HttpFetchHandler {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("autoloop/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self { client }
    }
}

impl Default for HttpFetchHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ActionHandler for HttpFetchHandler {
    fn kind(&self) -> DirectiveKind {
        DirectiveKind::HttpFetch
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP(S) and return the start of the body"
    }

    #[instrument(skip(self, ctx), fields(timeout_secs = ctx.http_timeout.as_secs()))]
    async fn execute(&self, argument: &str, ctx: &ActionContext) -> ExecutionResult {
        if argument.is_empty() {
            return ExecutionResult::failure(ErrorKind::NetworkFailure, "No URL given");
        }

        let parsed = match url::Url::parse(argument) {
            Ok(u) => u,
            Err(e) => {
                return ExecutionResult::failure(ErrorKind::NetworkFailure, format!("Invalid URL: {}", e));
            }
        };

        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return ExecutionResult::failure(
                ErrorKind::NetworkFailure,
                "Only HTTP and HTTPS URLs are supported",
            );
        }

        let mut response = match self
            .client
            .get(parsed)
            .timeout(ctx.http_timeout)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "Failed to fetch URL");
                return ExecutionResult::failure(
                    ErrorKind::NetworkFailure,
                    format!("Failed to fetch URL: {}", e),
                );
            }
        };

        let status = response.status();
        debug!(status = %status, "HTTP response received");
        if !status.is_success() {
            return ExecutionResult::failure(ErrorKind::NetworkFailure, format!("HTTP error: {}", status));
        }

        // Enough bytes for the character cap even if every char is 4 bytes wide
        let byte_limit = ctx.max_output_chars.saturating_mul(4).saturating_add(4);
        let mut body: Vec<u8> = Vec::new();

        loop {
            match response.chunk().await {
                Ok(Some(chunk)) => {
                    body.extend_from_slice(&chunk);
                    if body.len() >= byte_limit {
                        debug!(bytes = body.len(), "Stopped reading body at cap");
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed while reading body");
                    return ExecutionResult::failure(
                        ErrorKind::NetworkFailure,
                        format!("Failed to read response: {}", e),
                    );
                }
            }
        }

        ExecutionResult::success(String::from_utf8_lossy(&body).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response and return the URL to request
    async fn serve_once(status_line: &'static str, body: String) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            let response = format!(
                "{}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = socket.write_all(response.as_bytes()).await;
            socket.shutdown().await.ok();
        });

        format!("http://{}/page", addr)
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let url = serve_once("HTTP/1.1 200 OK", "hello from the server".to_string()).await;
        let result = HttpFetchHandler::new().execute(&url, &ActionContext::default()).await;
        assert!(result.succeeded);
        assert_eq!(result.output, "hello from the server");
    }

    #[tokio::test]
    async fn test_fetch_stops_reading_large_body() {
        let url = serve_once("HTTP/1.1 200 OK", "a".repeat(100_000)).await;
        let ctx = ActionContext::default().with_max_output_chars(100);
        let result = HttpFetchHandler::new().execute(&url, &ctx).await;
        assert!(result.succeeded);
        assert!(result.output.len() < 100_000);
    }

    #[tokio::test]
    async fn test_fetch_http_error_has_no_body() {
        let url = serve_once("HTTP/1.1 404 Not Found", "secret page body".to_string()).await;
        let result = HttpFetchHandler::new().execute(&url, &ActionContext::default()).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::NetworkFailure);
        assert!(result.output.contains("404"));
        assert!(!result.output.contains("secret page body"));
    }

    #[tokio::test]
    async fn test_fetch_connection_dropped_mid_body() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 4096];
            let _ = socket.read(&mut buf).await;
            // Promise more body than is sent, then hang up
            let response = "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 1000\r\n\r\npartial body bytes";
            let _ = socket.write_all(response.as_bytes()).await;
            socket.shutdown().await.ok();
        });

        let url = format!("http://{}/page", addr);
        let result = HttpFetchHandler::new().execute(&url, &ActionContext::default()).await;

        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::NetworkFailure);
        assert!(!result.output.contains("partial body"));
    }

    #[tokio::test]
    async fn test_fetch_unreachable() {
        let ctx = ActionContext::default().with_http_timeout(Duration::from_secs(3));
        let result = HttpFetchHandler::new().execute("http://127.0.0.1:9/", &ctx).await;
        assert!(!result.succeeded);
        assert_eq!(result.error_kind, ErrorKind::NetworkFailure);
        assert!(result.output.starts_with("Failed to fetch URL"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_bad_urls() {
        let handler = HttpFetchHandler::new();
        let ctx = ActionContext::default();

        for arg in ["", "not a url", "file:///etc/passwd", "ftp://example.com/x"] {
            let result = handler.execute(arg, &ctx).await;
            assert!(!result.succeeded, "accepted {:?}", arg);
            assert_eq!(result.error_kind, ErrorKind::NetworkFailure);
        }
    }
}
