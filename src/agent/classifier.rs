//! Routing step: ask the model which agent should handle the conversation.

use super::prompts::{build_messages, COORDINATION_REQUEST_SYSTEM_PROMPT};
use super::traits::{AgentName, CoordinationRequest, Message};
use crate::error::{CoordinatorError, Result};
use crate::providers::{CompletionClient, ResponseFormat};
use serde::Deserialize;

/// Name of the structured-output schema sent to the backend.
const RESPONSE_SCHEMA_NAME: &str = "response";

/// Wire shape of the classifier reply, before the agent name is checked
/// against the known set.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawCoordinationRequest {
    agent_name: String,
    additional_instructions: String,
}

pub struct RequestClassifier<'a> {
    client: &'a dyn CompletionClient,
}

impl<'a> RequestClassifier<'a> {
    pub fn new(client: &'a dyn CompletionClient) -> Self {
        Self { client }
    }

    /// JSON-schema constraint for the classifier reply.
    pub fn response_format() -> ResponseFormat {
        let schema = serde_json::to_value(schemars::schema_for!(CoordinationRequest))
            .unwrap_or_else(|_| serde_json::json!({"type": "object"}));
        ResponseFormat::json_schema(RESPONSE_SCHEMA_NAME, schema)
    }

    pub async fn classify(&self, conversation: &[Message]) -> Result<CoordinationRequest> {
        let messages = build_messages(COORDINATION_REQUEST_SYSTEM_PROMPT, conversation);
        let format = Self::response_format();

        let reply = self
            .client
            .chat_with_history(&messages, Some(&format))
            .await
            .map_err(|e| {
                CoordinatorError::Classification(format!("classifier call failed: {e:#}"))
            })?;

        let request = parse_coordination_request(&reply)?;
        tracing::debug!(
            agent = %request.agent_name,
            instructions_len = request.additional_instructions.len(),
            "Classified request"
        );
        Ok(request)
    }
}

/// Strictly parse a classifier reply.
///
/// A single Markdown code fence around the JSON is tolerated; anything else
/// that is not exactly the schema is a classification error. A well-formed
/// reply naming an unknown agent is a routing error.
pub fn parse_coordination_request(reply: &str) -> Result<CoordinationRequest> {
    let body = strip_code_fence(reply);
    let raw: RawCoordinationRequest = serde_json::from_str(body).map_err(|e| {
        CoordinatorError::Classification(format!(
            "classifier reply does not match the schema ({e}): {}",
            crate::providers::sanitize_api_error(reply)
        ))
    })?;

    let agent_name = raw
        .agent_name
        .parse::<AgentName>()
        .map_err(CoordinatorError::Routing)?;

    Ok(CoordinationRequest {
        agent_name,
        additional_instructions: raw.additional_instructions,
    })
}

fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return trimmed;
    };
    // Drop an optional language tag on the opening fence line.
    match inner.split_once('\n') {
        Some((tag, rest)) if !tag.trim_start().starts_with('{') => rest.trim(),
        _ => inner.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedClient;

    #[test]
    fn parses_plain_json() {
        let request =
            parse_coordination_request(r#"{"agent_name":"UMS","additional_instructions":"Add Bob"}"#)
                .unwrap();
        assert_eq!(request.agent_name, AgentName::Ums);
        assert_eq!(request.additional_instructions, "Add Bob");
    }

    #[test]
    fn parses_fenced_json() {
        let reply = "```json\n{\"agent_name\": \"GPA\", \"additional_instructions\": \"\"}\n```";
        let request = parse_coordination_request(reply).unwrap();
        assert_eq!(request.agent_name, AgentName::Gpa);
        assert!(request.additional_instructions.is_empty());
    }

    #[test]
    fn parses_bare_fence_without_language_tag() {
        let reply = "```\n{\"agent_name\": \"GPA\", \"additional_instructions\": \"x\"}\n```";
        assert_eq!(parse_coordination_request(reply).unwrap().agent_name, AgentName::Gpa);
    }

    #[test]
    fn unknown_agent_is_a_routing_error() {
        let err = parse_coordination_request(
            r#"{"agent_name":"WEATHER","additional_instructions":""}"#,
        )
        .unwrap_err();
        assert!(matches!(err, CoordinatorError::Routing(_)), "got {err:?}");
    }

    #[test]
    fn malformed_replies_are_classification_errors() {
        for reply in [
            "GPA",
            "",
            r#"{"agent_name":"GPA"}"#,
            r#"{"agent_name":"GPA","additional_instructions":null}"#,
            r#"{"agent_name":"GPA","additional_instructions":"","confidence":0.9}"#,
            r#"[{"agent_name":"GPA","additional_instructions":""}]"#,
        ] {
            let err = parse_coordination_request(reply).unwrap_err();
            assert!(
                matches!(err, CoordinatorError::Classification(_)),
                "{reply:?} should be a classification error, got {err:?}"
            );
        }
    }

    #[tokio::test]
    async fn classify_sends_prompt_history_and_schema() {
        let client = ScriptedClient::new()
            .with_completion(r#"{"agent_name":"UMS","additional_instructions":"Create user Bob"}"#);
        let conversation = vec![Message::user("Add user Bob")];

        let request = RequestClassifier::new(&client)
            .classify(&conversation)
            .await
            .unwrap();
        assert_eq!(request.agent_name, AgentName::Ums);

        let calls = client.completion_calls();
        assert_eq!(calls.len(), 1);
        let (messages, format) = &calls[0];
        assert_eq!(messages[0].content, COORDINATION_REQUEST_SYSTEM_PROMPT);
        assert_eq!(messages[1], Message::user("Add user Bob"));
        let format = serde_json::to_value(format.as_ref().unwrap()).unwrap();
        assert_eq!(format["json_schema"]["name"], "response");
        assert!(format["json_schema"]["schema"].to_string().contains("agent_name"));
    }

    #[tokio::test]
    async fn backend_failure_is_a_classification_error() {
        let client = ScriptedClient::new().with_completion_error("backend unavailable");
        let err = RequestClassifier::new(&client)
            .classify(&[Message::user("hi")])
            .await
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Classification(ref m) if m.contains("backend unavailable")));
    }
}
