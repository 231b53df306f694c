use crate::agent::Message;
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

/// Structured-output constraint attached to a completion request.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFormat {
    JsonSchema { json_schema: JsonSchemaFormat },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub schema: serde_json::Value,
}

impl ResponseFormat {
    pub fn json_schema(name: &str, schema: serde_json::Value) -> Self {
        ResponseFormat::JsonSchema {
            json_schema: JsonSchemaFormat {
                name: name.to_string(),
                schema,
            },
        }
    }
}

/// Chat-completion capability used by the classifier and the synthesizer.
///
/// Implementations are bound to one backend deployment and one caller
/// credential; the model is a black box with this input/output contract.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send the full history and wait for the complete reply text.
    async fn chat_with_history(
        &self,
        messages: &[Message],
        response_format: Option<&ResponseFormat>,
    ) -> anyhow::Result<String>;

    /// Stream the reply: every non-empty text delta is sent on `tx` in arrival
    /// order. Returns the concatenated text once the stream ends.
    async fn stream_chat_with_history(
        &self,
        messages: &[Message],
        tx: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<String>;

    /// Backend deployment this client talks to.
    fn deployment(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_format_serializes_openai_shape() {
        let format = ResponseFormat::json_schema("response", serde_json::json!({"type": "object"}));
        let json = serde_json::to_value(&format).unwrap();
        assert_eq!(json["type"], "json_schema");
        assert_eq!(json["json_schema"]["name"], "response");
        assert_eq!(json["json_schema"]["schema"]["type"], "object");
    }
}
