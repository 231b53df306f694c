//! OpenAI-compatible chat completions client.
//!
//! Speaks the DIAL flavour of the API: deployments are addressed by path
//! (`/openai/deployments/{deployment}/chat/completions`), the API version is a
//! query parameter, and the credential travels in an `Api-Key` header.
//! Plain OpenAI-style base URLs ending in `/chat/completions` are used as-is.

use crate::agent::Message;
use crate::providers::sse::SseDecoder;
use crate::providers::traits::{CompletionClient, ResponseFormat};
use anyhow::Context;
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// How the backend expects the credential to be sent.
#[derive(Debug, Clone)]
pub enum AuthStyle {
    /// `Api-Key: <key>` (DIAL)
    ApiKey,
    /// `Authorization: Bearer <key>`
    Bearer,
    /// Custom header name
    Custom(String),
}

pub struct OpenAiCompatibleClient {
    pub(crate) base_url: String,
    pub(crate) deployment: String,
    pub(crate) api_version: Option<String>,
    pub(crate) api_key: Option<String>,
    pub(crate) auth_header: AuthStyle,
    extra_headers: Vec<(String, String)>,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        base_url: &str,
        deployment: &str,
        api_key: Option<&str>,
        auth_style: AuthStyle,
        client: Client,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            deployment: deployment.to_string(),
            api_version: None,
            api_key: api_key.map(ToString::to_string),
            auth_header: auth_style,
            extra_headers: Vec::new(),
            client,
        }
    }

    pub fn with_api_version(mut self, api_version: &str) -> Self {
        let trimmed = api_version.trim();
        self.api_version = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    /// Attach a header to every request (e.g. `x-conversation-id`).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.extra_headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Build the full URL for chat completions, detecting if base_url already
    /// includes the path.
    pub(crate) fn chat_completions_url(&self) -> String {
        let has_full_endpoint = reqwest::Url::parse(&self.base_url)
            .map(|url| {
                url.path()
                    .trim_end_matches('/')
                    .ends_with("/chat/completions")
            })
            .unwrap_or_else(|_| self.base_url.ends_with("/chat/completions"));

        let url = if has_full_endpoint {
            self.base_url.clone()
        } else {
            format!(
                "{}/openai/deployments/{}/chat/completions",
                self.base_url, self.deployment
            )
        };

        match &self.api_version {
            Some(version) => format!("{url}?api-version={version}"),
            None => url,
        }
    }

    fn apply_headers(&self, req: reqwest::RequestBuilder) -> anyhow::Result<reqwest::RequestBuilder> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            anyhow::anyhow!(
                "API key not set for deployment '{}'. Pass the caller credential or set DIAL_API_KEY.",
                self.deployment
            )
        })?;

        let mut req = match &self.auth_header {
            AuthStyle::ApiKey => req.header("Api-Key", api_key),
            AuthStyle::Bearer => req.header("Authorization", format!("Bearer {api_key}")),
            AuthStyle::Custom(header) => req.header(header, api_key),
        };
        for (name, value) in &self.extra_headers {
            req = req.header(name, value);
        }
        Ok(req)
    }

    async fn send(&self, request: &ChatRequest<'_>) -> anyhow::Result<reqwest::Response> {
        let url = self.chat_completions_url();
        let response = self
            .apply_headers(self.client.post(&url).json(request))?
            .send()
            .await
            .with_context(|| format!("request to deployment '{}' failed", self.deployment))?;

        if !response.status().is_success() {
            return Err(super::api_error(&self.deployment, response).await);
        }
        Ok(response)
    }

    /// Start a streaming completion and hand back the raw SSE response.
    pub(crate) async fn open_stream(&self, messages: &[Message]) -> anyhow::Result<reqwest::Response> {
        let request = ChatRequest {
            messages,
            response_format: None,
            stream: true,
        };
        self.send(&request).await
    }
}

/// Drive an SSE response to completion, handing every decoded chunk to
/// `on_chunk` in arrival order. Stops at `[DONE]` or end of body.
pub(crate) async fn read_stream_chunks(
    service: &str,
    response: reqwest::Response,
    mut on_chunk: impl FnMut(StreamChatResponse) -> anyhow::Result<()>,
) -> anyhow::Result<()> {
    let mut decoder = SseDecoder::new();
    let mut byte_stream = response.bytes_stream();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = chunk_result.with_context(|| format!("stream from '{service}' interrupted"))?;
        for payload in decoder.push(&bytes) {
            on_chunk(StreamChatResponse::parse(&payload)?)?;
        }
        if decoder.is_done() {
            return Ok(());
        }
    }
    for payload in decoder.finish() {
        on_chunk(StreamChatResponse::parse(&payload)?)?;
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub(crate) messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) response_format: Option<&'a ResponseFormat>,
    pub(crate) stream: bool,
}

#[derive(Debug, Deserialize)]
struct ApiChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

// ══════════════════════════════════════════════════════════
// SSE streaming types for OpenAI-compatible chat completions
// ══════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChatResponse {
    #[serde(default)]
    pub(crate) choices: Vec<StreamChoice>,
    #[serde(default)]
    pub(crate) error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StreamChoice {
    #[serde(default)]
    pub(crate) delta: Option<StreamDelta>,
    #[serde(default)]
    pub(crate) finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct StreamDelta {
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) custom_content: Option<serde_json::Value>,
}

impl StreamChatResponse {
    /// Parse one SSE payload, turning an in-band `{"error": ...}` into an error.
    pub(crate) fn parse(payload: &str) -> anyhow::Result<Self> {
        let chunk: StreamChatResponse = serde_json::from_str(payload).with_context(|| {
            format!(
                "malformed stream chunk: {}",
                super::sanitize_api_error(payload)
            )
        })?;
        if let Some(error) = &chunk.error {
            anyhow::bail!(
                "stream reported an error: {}",
                super::sanitize_api_error(&error.to_string())
            );
        }
        Ok(chunk)
    }

    /// Text deltas carried by this chunk, in choice order.
    pub(crate) fn content_deltas(&self) -> impl Iterator<Item = &str> {
        self.choices
            .iter()
            .filter_map(|choice| choice.delta.as_ref()?.content.as_deref())
            .filter(|content| !content.is_empty())
    }
}

#[async_trait]
impl CompletionClient for OpenAiCompatibleClient {
    async fn chat_with_history(
        &self,
        messages: &[Message],
        response_format: Option<&ResponseFormat>,
    ) -> anyhow::Result<String> {
        let request = ChatRequest {
            messages,
            response_format,
            stream: false,
        };
        let response = self.send(&request).await?;

        let chat_response: ApiChatResponse = response
            .json()
            .await
            .with_context(|| format!("invalid completion body from '{}'", self.deployment))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.unwrap_or_default())
            .ok_or_else(|| anyhow::anyhow!("No choices returned by '{}'", self.deployment))
    }

    async fn stream_chat_with_history(
        &self,
        messages: &[Message],
        tx: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<String> {
        let response = self.open_stream(messages).await?;

        let mut content_buf = String::new();
        read_stream_chunks(&self.deployment, response, |chunk| {
            for content in chunk.content_deltas() {
                content_buf.push_str(content);
                let _ = tx.send(content.to_string());
            }
            Ok(())
        })
        .await?;

        Ok(content_buf)
    }

    fn deployment(&self) -> &str {
        &self.deployment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_client(url: &str, key: Option<&str>) -> OpenAiCompatibleClient {
        OpenAiCompatibleClient::new(url, "gpt-4o", key, AuthStyle::ApiKey, Client::new())
    }

    #[test]
    fn strips_trailing_slash() {
        let c = make_client("http://localhost:8080/", None);
        assert_eq!(c.base_url, "http://localhost:8080");
    }

    #[test]
    fn builds_deployment_url_with_api_version() {
        let c = make_client("http://localhost:8080", Some("k")).with_api_version("2025-01-01-preview");
        assert_eq!(
            c.chat_completions_url(),
            "http://localhost:8080/openai/deployments/gpt-4o/chat/completions?api-version=2025-01-01-preview"
        );
    }

    #[test]
    fn keeps_explicit_chat_completions_url() {
        let c = make_client("https://api.example.com/v1/chat/completions", Some("k"));
        assert_eq!(
            c.chat_completions_url(),
            "https://api.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn blank_api_version_is_ignored() {
        let c = make_client("http://dial", Some("k")).with_api_version("  ");
        assert!(c.api_version.is_none());
    }

    #[tokio::test]
    async fn chat_fails_without_key() {
        let c = make_client("http://127.0.0.1:9", None);
        let err = c
            .chat_with_history(&[Message::user("hello")], None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("API key not set"));
    }

    #[test]
    fn request_serializes_messages_and_schema() {
        let messages = vec![Message::system("route"), Message::user("hello")];
        let format = ResponseFormat::json_schema("response", serde_json::json!({}));
        let req = ChatRequest {
            messages: &messages,
            response_format: Some(&format),
            stream: false,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hello");
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["stream"], false);
        assert!(json["messages"][1].get("custom_content").is_none());
    }

    #[test]
    fn response_deserializes() {
        let json = r#"{"choices":[{"message":{"content":"{\"agent_name\":\"GPA\"}"}}]}"#;
        let resp: ApiChatResponse = serde_json::from_str(json).unwrap();
        assert_eq!(
            resp.choices[0].message.content.as_deref(),
            Some("{\"agent_name\":\"GPA\"}")
        );
    }

    #[test]
    fn stream_chunk_yields_non_empty_deltas() {
        let chunk = StreamChatResponse::parse(
            r#"{"choices":[{"index":0,"delta":{"role":"assistant","content":""}},{"index":1,"delta":{"content":"Hi"}}]}"#,
        )
        .unwrap();
        assert_eq!(chunk.content_deltas().collect::<Vec<_>>(), vec!["Hi"]);
    }

    #[test]
    fn stream_chunk_without_delta_is_accepted() {
        let chunk = StreamChatResponse::parse(r#"{"choices":[{"index":0,"finish_reason":"stop"}]}"#)
            .unwrap();
        assert_eq!(chunk.content_deltas().count(), 0);
        assert_eq!(chunk.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn stream_error_chunk_is_an_error() {
        let err = StreamChatResponse::parse(r#"{"error":{"message":"quota exceeded"}}"#).unwrap_err();
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn malformed_stream_chunk_is_an_error() {
        assert!(StreamChatResponse::parse("not json").is_err());
    }
}
