use crate::agent::{AgentName, Message};
use crate::stage::Stage;
use async_trait::async_trait;

/// Uniform interface to a downstream specialized agent.
///
/// Implementations forward the conversation plus routing instructions to
/// their service, append the service's progress to `stage` as it arrives,
/// and return the final answer. Failures are returned as-is; the caller
/// decides how to surface them. Nothing is retried here.
#[async_trait]
pub trait AgentGateway: Send + Sync {
    /// Agent this gateway reaches.
    fn agent(&self) -> AgentName;

    async fn dispatch(
        &self,
        conversation: &[Message],
        stage: &Stage,
        additional_instructions: &str,
    ) -> anyhow::Result<Message>;
}
