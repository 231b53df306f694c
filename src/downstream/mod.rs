//! Gateways to the downstream agents.
//!
//! Each [`AgentName`] maps to exactly one [`AgentGateway`] implementation.
//! [`AgentGateways::resolve`] is an exhaustive `match`, so adding an agent
//! variant does not compile until its gateway is wired in here.

pub mod gpa;
pub mod traits;
pub mod ums;

pub use gpa::GpaGateway;
pub use traits::AgentGateway;
pub use ums::UmsGateway;

use crate::agent::{AgentName, Message, RequestContext};
use crate::config::Config;

/// The gateway set available to one coordinator.
pub struct AgentGateways {
    gpa: Box<dyn AgentGateway>,
    ums: Box<dyn AgentGateway>,
}

impl AgentGateways {
    pub fn new(gpa: Box<dyn AgentGateway>, ums: Box<dyn AgentGateway>) -> Self {
        debug_assert_eq!(gpa.agent(), AgentName::Gpa);
        debug_assert_eq!(ums.agent(), AgentName::Ums);
        Self { gpa, ums }
    }

    pub fn resolve(&self, agent: AgentName) -> &dyn AgentGateway {
        match agent {
            AgentName::Gpa => self.gpa.as_ref(),
            AgentName::Ums => self.ums.as_ref(),
        }
    }
}

/// Build the production gateways for one request.
pub fn create_gateways(
    config: &Config,
    context: &RequestContext,
    http: reqwest::Client,
) -> AgentGateways {
    let gpa = GpaGateway::new(
        &config.backend,
        &config.agents.gpa_deployment,
        context,
        http.clone(),
    );
    let ums = UmsGateway::new(&config.agents.ums_endpoint, http);
    AgentGateways::new(Box::new(gpa), Box::new(ums))
}

/// Append routing instructions to the user's text, separated by a blank line.
pub(crate) fn with_instructions(content: &str, additional_instructions: &str) -> String {
    let instructions = additional_instructions.trim();
    if instructions.is_empty() {
        content.to_string()
    } else {
        format!("{content}\n\n{instructions}")
    }
}

/// The current user turn, i.e. the last message of the conversation.
pub(crate) fn current_turn(conversation: &[Message]) -> anyhow::Result<&Message> {
    conversation
        .last()
        .ok_or_else(|| anyhow::anyhow!("conversation is empty"))
}
