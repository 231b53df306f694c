//! Conversation and routing types shared by every pipeline phase.

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Author of a chat message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A generated artifact attached to a message (image, chart, file reference).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Attachment {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_type: Option<String>,
}

/// Non-text payload carried next to a message's text.
///
/// The coordinator never interprets the payload of the final answer; it is
/// copied from the agent's reply as-is. Fields this crate does not know about
/// are kept in `extra` so a round trip through the coordinator is lossless.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CustomContent {
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub attachments: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl CustomContent {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty() && self.state.is_none() && self.extra.is_empty()
    }

    /// Look up a key of the `state` object.
    pub fn state_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.state.as_ref().and_then(|state| state.get(key))
    }
}

/// Explicit `null` reads like an absent field. OpenAI-style clients send
/// `"content": null` on assistant turns.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// A single turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_content: Option<CustomContent>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            custom_content: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn with_custom_content(mut self, custom_content: CustomContent) -> Self {
        self.custom_content = Some(custom_content);
        self
    }

    /// Copy of this message with its payload removed. Used before handing a
    /// user turn to the model, which must only ever see text.
    pub fn text_only(&self) -> Self {
        Self {
            role: self.role,
            content: self.content.clone(),
            custom_content: None,
        }
    }

    pub fn state_field(&self, key: &str) -> Option<&serde_json::Value> {
        self.custom_content
            .as_ref()
            .and_then(|custom| custom.state_field(key))
    }
}

/// Ordered dialogue for one turn; the last message is the current user turn.
pub type Conversation = [Message];

/// Per-request values forwarded to the backend and the agents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Caller credential for the model backend.
    pub api_key: Option<String>,
    pub conversation_id: Option<String>,
}

/// Downstream agents the coordinator can route to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum AgentName {
    /// General purpose agent: web search, RAG, code interpreter, image generation.
    #[serde(rename = "GPA")]
    Gpa,
    /// User management service agent.
    #[serde(rename = "UMS")]
    Ums,
}

impl AgentName {
    pub const ALL: [AgentName; 2] = [AgentName::Gpa, AgentName::Ums];

    pub fn as_str(self) -> &'static str {
        match self {
            AgentName::Gpa => "GPA",
            AgentName::Ums => "UMS",
        }
    }
}

impl fmt::Display for AgentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentName::ALL
            .into_iter()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown agent '{s}'"))
    }
}

/// Routing decision produced by the classifier.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct CoordinationRequest {
    /// Agent that should handle the conversation.
    pub agent_name: AgentName,
    /// Extra guidance forwarded to the selected agent.
    pub additional_instructions: String,
}

impl CoordinationRequest {
    /// Render for the "Coordination Request" stage.
    pub fn to_stage_content(&self) -> String {
        let json = serde_json::to_string_pretty(self).unwrap_or_else(|_| {
            format!(
                "{{\"agent_name\": \"{}\", \"additional_instructions\": {:?}}}",
                self.agent_name, self.additional_instructions
            )
        });
        format!("```json\n{json}\n```\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_unknown_payload_fields() {
        let raw = r#"{
            "role": "assistant",
            "content": "done",
            "custom_content": {
                "attachments": [{"type": "image/png", "title": "chart", "url": "files/chart.png"}],
                "state": {"is_gpa": true},
                "form_value": {"answer": 42}
            }
        }"#;
        let message: Message = serde_json::from_str(raw).unwrap();
        let custom = message.custom_content.as_ref().unwrap();
        assert_eq!(custom.attachments[0].kind.as_deref(), Some("image/png"));
        assert_eq!(custom.extra["form_value"]["answer"], 42);

        let back = serde_json::to_value(&message).unwrap();
        assert_eq!(back["custom_content"]["form_value"]["answer"], 42);
        assert_eq!(back["custom_content"]["state"]["is_gpa"], true);
    }

    #[test]
    fn null_content_and_attachments_read_as_empty() {
        let raw = r#"[
            {"role": "user", "content": "Add Bob"},
            {"role": "assistant", "content": null, "custom_content": {"attachments": null, "state": {"is_ums": true}}}
        ]"#;
        let messages: Vec<Message> = serde_json::from_str(raw).unwrap();
        assert_eq!(messages[1].content, "");
        let custom = messages[1].custom_content.as_ref().unwrap();
        assert!(custom.attachments.is_empty());
        assert_eq!(custom.state_field("is_ums"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn text_only_drops_payload() {
        let message = Message::user("look at this").with_custom_content(CustomContent {
            attachments: vec![Attachment {
                url: Some("files/a.csv".into()),
                ..Attachment::default()
            }],
            ..CustomContent::default()
        });
        let stripped = message.text_only();
        assert_eq!(stripped.content, "look at this");
        assert!(stripped.custom_content.is_none());
        assert!(message.custom_content.is_some());
    }

    #[test]
    fn agent_name_parses_exact_names_only() {
        assert_eq!("GPA".parse::<AgentName>().unwrap(), AgentName::Gpa);
        assert_eq!("UMS".parse::<AgentName>().unwrap(), AgentName::Ums);
        assert!("gpa".parse::<AgentName>().is_err());
        assert!("WEB".parse::<AgentName>().is_err());
    }

    #[test]
    fn coordination_request_stage_content_is_deterministic() {
        let request = CoordinationRequest {
            agent_name: AgentName::Ums,
            additional_instructions: "Create user Bob".into(),
        };
        let rendered = request.to_stage_content();
        assert_eq!(rendered, request.to_stage_content());
        assert!(rendered.starts_with("```json\n{\n  \"agent_name\": \"UMS\""));
        assert!(rendered.ends_with("}\n```\n"));
    }

    #[test]
    fn coordination_request_schema_lists_both_agents() {
        let schema = serde_json::to_string(&schemars::schema_for!(CoordinationRequest)).unwrap();
        assert!(schema.contains("\"GPA\""));
        assert!(schema.contains("\"UMS\""));
        assert!(schema.contains("additional_instructions"));
    }
}
