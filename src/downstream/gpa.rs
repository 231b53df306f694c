//! General purpose agent, reached as a streaming deployment on the model backend.
//!
//! The GPA keeps its own tool-call history in the `state` of its replies. The
//! coordinator stores that under `gpa_messages` in the final answer's state
//! (flagged with `is_gpa`) and hands it back on later turns, so the agent sees
//! only its own previous exchanges.

use super::traits::AgentGateway;
use super::{current_turn, with_instructions};
use crate::agent::{AgentName, Attachment, CustomContent, Message, RequestContext, Role};
use crate::config::BackendConfig;
use crate::providers::compatible::{read_stream_chunks, StreamChatResponse};
use crate::providers::{AuthStyle, OpenAiCompatibleClient};
use crate::stage::Stage;
use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;

/// Marks an assistant turn produced by the GPA.
pub const IS_GPA_STATE_KEY: &str = "is_gpa";
/// Holds the GPA's own state for that turn.
pub const GPA_MESSAGES_STATE_KEY: &str = "gpa_messages";

pub struct GpaGateway {
    client: OpenAiCompatibleClient,
}

impl GpaGateway {
    pub fn new(
        backend: &BackendConfig,
        deployment: &str,
        context: &RequestContext,
        http: reqwest::Client,
    ) -> Self {
        let mut client = OpenAiCompatibleClient::new(
            &backend.endpoint,
            deployment,
            context
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|key| !key.is_empty()),
            AuthStyle::ApiKey,
            http,
        )
        .with_api_version(&backend.api_version);
        if let Some(conversation_id) = &context.conversation_id {
            client = client.with_header("x-conversation-id", conversation_id);
        }
        Self { client }
    }
}

/// `custom_content` fragment of a GPA stream chunk.
#[derive(Debug, Default, Deserialize)]
struct GpaCustomDelta {
    #[serde(default)]
    attachments: Vec<Attachment>,
    #[serde(default)]
    state: Option<serde_json::Value>,
    #[serde(default)]
    stages: Vec<GpaStageDelta>,
}

#[derive(Debug, Deserialize)]
struct GpaStageDelta {
    index: usize,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

/// Accumulates one GPA reply while relaying its progress.
#[derive(Default)]
struct GpaReply {
    content: String,
    attachments: Vec<Attachment>,
    state: Option<serde_json::Value>,
    announced_stages: HashSet<usize>,
}

impl GpaReply {
    fn absorb(&mut self, chunk: StreamChatResponse, stage: &Stage) -> anyhow::Result<()> {
        for choice in chunk.choices {
            let Some(delta) = choice.delta else {
                continue;
            };
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                stage.append_content(&content);
                self.content.push_str(&content);
            }
            if let Some(raw) = delta.custom_content {
                let custom: GpaCustomDelta = serde_json::from_value(raw)
                    .context("malformed custom_content in GPA stream")?;
                self.absorb_custom(custom, stage);
            }
        }
        Ok(())
    }

    fn absorb_custom(&mut self, custom: GpaCustomDelta, stage: &Stage) {
        self.attachments.extend(custom.attachments);
        if custom.state.is_some() {
            self.state = custom.state;
        }
        for nested in custom.stages {
            if let Some(name) = nested.name.as_deref() {
                if self.announced_stages.insert(nested.index) {
                    stage.append_content(&format!("\n#### {name}\n"));
                }
            }
            if let Some(content) = nested.content.as_deref() {
                stage.append_content(content);
            }
        }
    }

    fn into_message(self) -> Message {
        let state = serde_json::json!({
            IS_GPA_STATE_KEY: true,
            GPA_MESSAGES_STATE_KEY: self.state.unwrap_or(serde_json::Value::Null),
        });
        Message::assistant(self.content).with_custom_content(CustomContent {
            attachments: self.attachments,
            state: Some(state),
            ..CustomContent::default()
        })
    }
}

fn is_gpa_turn(message: &Message) -> bool {
    message.role == Role::Assistant
        && message
            .state_field(IS_GPA_STATE_KEY)
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
}

/// Build the GPA-bound history: earlier GPA exchanges (user turn + GPA reply
/// with its own state restored), then the current user turn with the routing
/// instructions appended. User payloads such as uploaded files are kept.
pub fn prepare_gpa_messages(
    conversation: &[Message],
    additional_instructions: &str,
) -> anyhow::Result<Vec<Message>> {
    let last = current_turn(conversation)?;
    let history = &conversation[..conversation.len() - 1];

    let mut messages = Vec::new();
    for (idx, message) in history.iter().enumerate() {
        if !is_gpa_turn(message) {
            continue;
        }
        if let Some(previous) = idx.checked_sub(1).map(|i| &history[i]) {
            if previous.role == Role::User {
                messages.push(previous.clone());
            }
        }
        let mut restored = message.clone();
        if let Some(custom) = restored.custom_content.as_mut() {
            custom.state = custom
                .state
                .as_ref()
                .and_then(|state| state.get(GPA_MESSAGES_STATE_KEY))
                .filter(|inner| !inner.is_null())
                .cloned();
        }
        messages.push(restored);
    }

    let mut current = last.clone();
    current.content = with_instructions(&last.content, additional_instructions);
    messages.push(current);
    Ok(messages)
}

#[async_trait]
impl AgentGateway for GpaGateway {
    fn agent(&self) -> AgentName {
        AgentName::Gpa
    }

    async fn dispatch(
        &self,
        conversation: &[Message],
        stage: &Stage,
        additional_instructions: &str,
    ) -> anyhow::Result<Message> {
        let messages = prepare_gpa_messages(conversation, additional_instructions)?;
        tracing::info!(
            deployment = self.client.deployment.as_str(),
            messages = messages.len(),
            "Dispatching to general purpose agent"
        );

        let response = self
            .client
            .open_stream(&messages)
            .await
            .context("GPA request failed")?;

        let mut reply = GpaReply::default();
        read_stream_chunks(&self.client.deployment, response, |chunk| {
            reply.absorb(chunk, stage)
        })
        .await
        .context("GPA stream failed")?;

        tracing::info!(
            content_len = reply.content.len(),
            attachments = reply.attachments.len(),
            "General purpose agent finished"
        );
        Ok(reply.into_message())
    }
}
