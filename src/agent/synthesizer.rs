//! Final step: turn the agent's answer into the user-facing reply.

use super::prompts::{augment_user_request, build_messages, FINAL_RESPONSE_SYSTEM_PROMPT};
use super::traits::{Message, Role};
use crate::error::{CoordinatorError, Result};
use crate::providers::CompletionClient;
use crate::stage::StageReporter;
use tokio::sync::mpsc;

pub struct ResponseSynthesizer<'a> {
    client: &'a dyn CompletionClient,
}

impl<'a> ResponseSynthesizer<'a> {
    pub fn new(client: &'a dyn CompletionClient) -> Self {
        Self { client }
    }

    /// Model-bound history: final-answer prompt, the conversation with user
    /// payloads stripped, and the current turn rewritten to carry the agent's
    /// answer as context.
    pub fn build_request(conversation: &[Message], agent_message: &Message) -> Vec<Message> {
        let mut messages = build_messages(FINAL_RESPONSE_SYSTEM_PROMPT, conversation);
        if let Some(last) = messages.last_mut().filter(|m| m.role == Role::User) {
            last.content = augment_user_request(&agent_message.content, &last.content);
        }
        messages
    }

    /// Stream the final answer to `reporter` chunk by chunk and return it.
    ///
    /// The reply's `custom_content` is the agent's payload, untouched. Chunks
    /// already streamed stay with the caller if the backend fails midway.
    pub async fn synthesize(
        &self,
        conversation: &[Message],
        agent_message: Message,
        reporter: &StageReporter,
    ) -> Result<Message> {
        let messages = Self::build_request(conversation, &agent_message);
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let relay = async {
            let mut content = String::new();
            let mut chunks = 0usize;
            while let Some(chunk) = rx.recv().await {
                if chunk.is_empty() {
                    continue;
                }
                reporter.append_content(&chunk);
                content.push_str(&chunk);
                chunks += 1;
            }
            (content, chunks)
        };

        let (streamed, (content, chunks)) =
            tokio::join!(self.client.stream_chat_with_history(&messages, tx), relay);
        streamed.map_err(CoordinatorError::Synthesis)?;

        tracing::debug!(chunks, content_len = content.len(), "Final answer streamed");
        Ok(Message {
            role: Role::Assistant,
            content,
            custom_content: agent_message.custom_content,
        })
    }
}
