pub mod classifier;
pub mod coordinator;
pub mod prompts;
pub mod synthesizer;
pub mod traits;

pub use classifier::{parse_coordination_request, RequestClassifier};
pub use coordinator::{Coordinator, COORDINATION_STAGE, HANDLING_STAGE};
pub use synthesizer::ResponseSynthesizer;
pub use traits::{
    AgentName, Attachment, Conversation, CoordinationRequest, CustomContent, Message,
    RequestContext, Role,
};
