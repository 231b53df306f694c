//! The three-phase pipeline: classify, dispatch, synthesize.

use super::classifier::RequestClassifier;
use super::synthesizer::ResponseSynthesizer;
use super::traits::{Message, RequestContext, Role};
use crate::config::Config;
use crate::downstream::{create_gateways, AgentGateways};
use crate::error::{CoordinatorError, Result};
use crate::providers::{create_completion_client, CompletionClient};
use crate::stage::StageReporter;

pub const COORDINATION_STAGE: &str = "Coordination Request";
pub const HANDLING_STAGE: &str = "Handling Request";

/// Routes one conversation to a downstream agent and streams the final answer.
///
/// Phases run strictly in sequence and none is retried. Stage output emitted
/// before a failure stays with the caller.
pub struct Coordinator {
    client: Box<dyn CompletionClient>,
    gateways: AgentGateways,
}

impl Coordinator {
    pub fn new(client: Box<dyn CompletionClient>, gateways: AgentGateways) -> Self {
        Self { client, gateways }
    }

    /// Production wiring for one request: the caller's credential goes to the
    /// backend client and the GPA.
    pub fn from_config(config: &Config, context: &RequestContext, http: reqwest::Client) -> Self {
        let client =
            create_completion_client(&config.backend, context.api_key.as_deref(), http.clone());
        let gateways = create_gateways(config, context, http);
        Self::new(Box::new(client), gateways)
    }

    pub async fn handle(&self, conversation: &[Message], reporter: &StageReporter) -> Result<Message> {
        validate_conversation(conversation)?;

        let stage = reporter.open_stage(COORDINATION_STAGE);
        let request = RequestClassifier::new(self.client.as_ref())
            .classify(conversation)
            .await?;
        stage.append_content(&request.to_stage_content());
        stage.close();

        tracing::info!(
            agent = %request.agent_name,
            instructions = %request.additional_instructions,
            "Routing request"
        );

        let stage = reporter.open_stage(HANDLING_STAGE);
        let gateway = self.gateways.resolve(request.agent_name);
        let agent_message = gateway
            .dispatch(conversation, &stage, &request.additional_instructions)
            .await
            .map_err(|e| {
                tracing::warn!(agent = %request.agent_name, "Agent dispatch failed: {e:#}");
                CoordinatorError::agent_dispatch(request.agent_name.as_str(), e)
            })?;
        stage.close();

        let response = ResponseSynthesizer::new(self.client.as_ref())
            .synthesize(conversation, agent_message, reporter)
            .await?;

        tracing::info!(
            agent = %request.agent_name,
            content_len = response.content.len(),
            attachments = response
                .custom_content
                .as_ref()
                .map_or(0, |custom| custom.attachments.len()),
            "Request handled"
        );
        Ok(response)
    }
}

fn validate_conversation(conversation: &[Message]) -> Result<()> {
    let last = conversation
        .last()
        .ok_or_else(|| CoordinatorError::InvalidRequest("conversation is empty".into()))?;
    if last.role != Role::User {
        return Err(CoordinatorError::InvalidRequest(format!(
            "last message must be from the user, got '{}'",
            last.role.as_str()
        )));
    }
    Ok(())
}
