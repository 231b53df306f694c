//! Error kinds surfaced by the coordination pipeline.
//!
//! Lower layers (HTTP clients, SSE decoding) work with `anyhow::Error`; each
//! pipeline component wraps failures into one of these variants at its
//! boundary. None of them is retried.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoordinatorError {
    /// The inbound conversation cannot be coordinated (empty, or the last turn
    /// is not from the user).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The classifier reply was unparsable or did not match the schema.
    #[error("Classification error: {0}")]
    Classification(String),

    /// The classifier named an agent outside the known set.
    #[error("Routing error: {0}")]
    Routing(String),

    /// The downstream agent call failed or returned a malformed reply.
    #[error("Agent dispatch error ({agent}): {source:#}")]
    AgentDispatch {
        agent: String,
        #[source]
        source: anyhow::Error,
    },

    /// The model backend failed while streaming the final answer.
    #[error("Synthesis error: {0:#}")]
    Synthesis(#[source] anyhow::Error),
}

impl CoordinatorError {
    /// Short machine-readable kind, used in logs and transport error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidRequest(_) => "invalid_request",
            CoordinatorError::Classification(_) => "classification_error",
            CoordinatorError::Routing(_) => "routing_error",
            CoordinatorError::AgentDispatch { .. } => "agent_dispatch_error",
            CoordinatorError::Synthesis(_) => "synthesis_error",
        }
    }

    pub fn agent_dispatch(agent: impl Into<String>, source: anyhow::Error) -> Self {
        CoordinatorError::AgentDispatch {
            agent: agent.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, CoordinatorError>;
