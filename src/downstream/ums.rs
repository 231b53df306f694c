//! User management service.
//!
//! The UMS agent keeps conversations server side. The coordinator only has to
//! remember the conversation id, which it stores in the state of the answer
//! (`ums_conversation_id`, flagged with `is_ums`) and reads back on the next
//! turn.

use super::traits::AgentGateway;
use super::{current_turn, with_instructions};
use crate::agent::{AgentName, CustomContent, Message, Role};
use crate::providers::compatible::read_stream_chunks;
use crate::stage::Stage;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Marks an assistant turn produced by the UMS agent.
pub const IS_UMS_STATE_KEY: &str = "is_ums";
/// Holds the server-side conversation id.
pub const UMS_CONVERSATION_ID_STATE_KEY: &str = "ums_conversation_id";

const SERVICE_NAME: &str = "ums-agent";
const TITLE_MAX_CHARS: usize = 50;

pub struct UmsGateway {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CreateConversationRequest<'a> {
    title: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct ChatTurnRequest<'a> {
    message: ChatTurnMessage<'a>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatTurnMessage<'a> {
    role: Role,
    content: &'a str,
}

impl UmsGateway {
    pub fn new(endpoint: &str, client: reqwest::Client) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// `{endpoint}/{segments...}`, each segment percent-encoded so a value
    /// can never leave its path position.
    fn endpoint_url(&self, segments: &[&str]) -> anyhow::Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.endpoint)
            .with_context(|| format!("invalid UMS endpoint '{}'", self.endpoint))?;
        url.path_segments_mut()
            .map_err(|()| anyhow::anyhow!("UMS endpoint '{}' cannot be a base", self.endpoint))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn conversations_url(&self) -> anyhow::Result<reqwest::Url> {
        self.endpoint_url(&["conversations"])
    }

    fn chat_url(&self, conversation_id: &str) -> anyhow::Result<reqwest::Url> {
        if matches!(conversation_id, "" | "." | "..") {
            anyhow::bail!("invalid UMS conversation id '{conversation_id}'");
        }
        self.endpoint_url(&["conversations", conversation_id, "chat"])
    }

    async fn create_conversation(&self, user_request: &str) -> anyhow::Result<String> {
        let title = conversation_title(user_request);
        let response = self
            .client
            .post(self.conversations_url()?)
            .json(&CreateConversationRequest { title: &title })
            .send()
            .await
            .context("UMS conversation create request failed")?;

        if !response.status().is_success() {
            return Err(crate::providers::api_error(SERVICE_NAME, response).await);
        }

        let created: CreateConversationResponse = response
            .json()
            .await
            .context("invalid UMS conversation create response")?;
        tracing::info!(conversation_id = %created.id, "Created UMS conversation");
        Ok(created.id)
    }
}

/// Id of the UMS conversation this chat is already bound to, if any.
pub fn find_conversation_id(conversation: &[Message]) -> Option<&str> {
    conversation
        .iter()
        .rev()
        .filter(|message| message.role == Role::Assistant)
        .find_map(|message| {
            message
                .state_field(UMS_CONVERSATION_ID_STATE_KEY)
                .and_then(serde_json::Value::as_str)
        })
}

fn conversation_title(user_request: &str) -> String {
    user_request.trim().chars().take(TITLE_MAX_CHARS).collect()
}

fn ums_reply(content: String, conversation_id: &str) -> Message {
    Message::assistant(content).with_custom_content(CustomContent {
        state: Some(serde_json::json!({
            IS_UMS_STATE_KEY: true,
            UMS_CONVERSATION_ID_STATE_KEY: conversation_id,
        })),
        ..CustomContent::default()
    })
}

#[async_trait]
impl AgentGateway for UmsGateway {
    fn agent(&self) -> AgentName {
        AgentName::Ums
    }

    async fn dispatch(
        &self,
        conversation: &[Message],
        stage: &Stage,
        additional_instructions: &str,
    ) -> anyhow::Result<Message> {
        let last = current_turn(conversation)?;
        let conversation_id = match find_conversation_id(conversation) {
            Some(id) => id.to_string(),
            None => self.create_conversation(&last.content).await?,
        };

        let content = with_instructions(&last.content, additional_instructions);
        tracing::info!(
            conversation_id = %conversation_id,
            "Dispatching to user management agent"
        );

        let response = self
            .client
            .post(self.chat_url(&conversation_id)?)
            .json(&ChatTurnRequest {
                message: ChatTurnMessage {
                    role: Role::User,
                    content: &content,
                },
                stream: true,
            })
            .send()
            .await
            .context("UMS chat request failed")?;

        if !response.status().is_success() {
            return Err(crate::providers::api_error(SERVICE_NAME, response).await);
        }

        let mut answer = String::new();
        read_stream_chunks(SERVICE_NAME, response, |chunk| {
            for delta in chunk.content_deltas() {
                stage.append_content(delta);
                answer.push_str(delta);
            }
            Ok(())
        })
        .await
        .context("UMS stream failed")?;

        tracing::info!(content_len = answer.len(), "User management agent finished");
        Ok(ums_reply(answer, &conversation_id))
    }
}
