//! Model backend access.
//!
//! The pipeline only depends on the [`CompletionClient`] trait; the concrete
//! [`OpenAiCompatibleClient`] talks to a DIAL / OpenAI-compatible
//! chat-completions endpoint. HTTP helpers shared with the downstream agent
//! gateways (error sanitizing, client construction) live here too.

pub mod compatible;
pub mod sse;
pub mod traits;

pub use compatible::{AuthStyle, OpenAiCompatibleClient};
pub use sse::SseDecoder;
pub use traits::{CompletionClient, JsonSchemaFormat, ResponseFormat};

use crate::config::{BackendConfig, HttpConfig};
use std::time::Duration;

const MAX_API_ERROR_CHARS: usize = 200;

fn is_secret_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':')
}

fn token_end(input: &str, from: usize) -> usize {
    let mut end = from;
    for (i, c) in input[from..].char_indices() {
        if is_secret_char(c) {
            end = from + i + c.len_utf8();
        } else {
            break;
        }
    }
    end
}

/// Scrub known secret-like token prefixes from upstream error strings.
///
/// Redacts tokens with prefixes like `sk-`, `dial-`, `ghp_` and `github_pat_`.
pub fn scrub_secret_patterns(input: &str) -> String {
    const PREFIXES: [&str; 5] = ["sk-", "dial-", "ghp_", "gho_", "github_pat_"];

    let mut scrubbed = input.to_string();

    for prefix in PREFIXES {
        let mut search_from = 0;
        loop {
            let Some(rel) = scrubbed[search_from..].find(prefix) else {
                break;
            };

            let start = search_from + rel;
            let content_start = start + prefix.len();
            let end = token_end(&scrubbed, content_start);

            if end == content_start {
                search_from = content_start;
                continue;
            }

            scrubbed.replace_range(start..end, "[REDACTED]");
            search_from = start + "[REDACTED]".len();
        }
    }

    scrubbed
}

/// Sanitize API error text by scrubbing secrets and truncating length.
pub fn sanitize_api_error(input: &str) -> String {
    let scrubbed = scrub_secret_patterns(input);

    if scrubbed.chars().count() <= MAX_API_ERROR_CHARS {
        return scrubbed;
    }

    let mut end = MAX_API_ERROR_CHARS;
    while end > 0 && !scrubbed.is_char_boundary(end) {
        end -= 1;
    }

    format!("{}...", &scrubbed[..end])
}

/// Build a sanitized error from a failed HTTP response.
pub async fn api_error(service: &str, response: reqwest::Response) -> anyhow::Error {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read error body>".to_string());
    let sanitized = sanitize_api_error(&body);
    anyhow::anyhow!("{service} API error ({status}): {sanitized}")
}

/// Shared HTTP client with the configured timeouts. There is no whole-request
/// deadline: agent streams may run for minutes.
pub fn build_http_client(http: &HttpConfig) -> reqwest::Client {
    reqwest::Client::builder()
        .read_timeout(Duration::from_secs(http.read_timeout_secs))
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build HTTP client with timeouts, using defaults: {e}");
            reqwest::Client::new()
        })
}

/// Create the completion client for the configured backend, bound to the
/// caller's credential.
pub fn create_completion_client(
    backend: &BackendConfig,
    api_key: Option<&str>,
    http: reqwest::Client,
) -> OpenAiCompatibleClient {
    let key = api_key.map(str::trim).filter(|key| !key.is_empty());
    OpenAiCompatibleClient::new(
        &backend.endpoint,
        &backend.deployment,
        key,
        AuthStyle::ApiKey,
        http,
    )
    .with_api_version(&backend.api_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_scrubs_sk_prefix() {
        let input = "request failed: sk-1234567890abcdef";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-1234567890abcdef"));
        assert!(out.contains("[REDACTED]"));
    }

    #[test]
    fn sanitize_scrubs_multiple_prefixes() {
        let input = "keys sk-abcdef dial-12345 ghp_67890";
        let out = sanitize_api_error(input);
        assert!(!out.contains("sk-abcdef"));
        assert!(!out.contains("dial-12345"));
        assert!(!out.contains("ghp_67890"));
    }

    #[test]
    fn sanitize_truncates_long_error() {
        let long = "a".repeat(400);
        let result = sanitize_api_error(&long);
        assert!(result.len() <= 203);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_truncates_on_char_boundary() {
        let long = "ї".repeat(300);
        let result = sanitize_api_error(&long);
        assert!(result.ends_with("..."));
    }

    #[test]
    fn sanitize_no_secret_no_change() {
        let input = "simple upstream timeout";
        assert_eq!(sanitize_api_error(input), input);
    }

    #[test]
    fn scrub_github_fine_grained_pat() {
        let input = "failed: github_pat_11AABBC_xyzzy789";
        assert_eq!(scrub_secret_patterns(input), "failed: [REDACTED]");
    }

    #[test]
    fn bare_prefix_is_left_alone() {
        assert_eq!(scrub_secret_patterns("use sk- keys"), "use sk- keys");
    }

    #[test]
    fn completion_client_uses_backend_settings() {
        let backend = BackendConfig {
            endpoint: "http://dial:8080/".into(),
            deployment: "gpt-4o".into(),
            api_version: "2025-01-01-preview".into(),
        };
        let client = create_completion_client(&backend, Some("  key  "), reqwest::Client::new());
        assert_eq!(client.api_key.as_deref(), Some("key"));
        assert_eq!(client.deployment(), "gpt-4o");
        assert!(client
            .chat_completions_url()
            .starts_with("http://dial:8080/openai/deployments/gpt-4o/chat/completions"));
    }

    #[tokio::test]
    async fn steady_stream_outlives_read_timeout() {
        use axum::{body::Body, routing::get, Router};
        use tokio_stream::{wrappers::UnboundedReceiverStream, StreamExt};

        let app = Router::new().route(
            "/stream",
            get(|| async {
                let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<String>();
                tokio::spawn(async move {
                    for i in 0..4 {
                        if tx.send(format!("chunk {i}\n")).is_err() {
                            return;
                        }
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                });
                Body::from_stream(
                    UnboundedReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>),
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = build_http_client(&HttpConfig {
            read_timeout_secs: 1,
            connect_timeout_secs: 1,
        });
        let body = client
            .get(format!("http://{addr}/stream"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body.lines().count(), 4);
    }

    #[test]
    fn blank_credential_is_treated_as_missing() {
        let backend = BackendConfig::default();
        let client = create_completion_client(&backend, Some("   "), reqwest::Client::new());
        assert!(client.api_key.is_none());
    }
}
