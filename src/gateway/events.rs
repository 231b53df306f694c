//! Chat-completions wire encoding of pipeline output.
//!
//! Stage events travel as `delta.custom_content.stages` entries, answer text
//! as `delta.content`, and the answer payload rides on the last chunk.

use crate::agent::CustomContent;
use crate::error::CoordinatorError;
use crate::stage::{ResponseEvent, ResponseSink, StageStatus};
use serde::Serialize;
use tokio::sync::mpsc;

/// Stage as seen by the caller, either a streamed delta or fully collected.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct WireStage {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<StageStatus>,
}

impl WireStage {
    fn from_event(event: &ResponseEvent) -> Option<Self> {
        match event {
            ResponseEvent::StageOpened { index, name } => Some(Self {
                index: *index,
                name: Some(name.clone()),
                ..Self::default()
            }),
            ResponseEvent::StageContent { index, content } => Some(Self {
                index: *index,
                content: Some(content.clone()),
                ..Self::default()
            }),
            ResponseEvent::StageClosed { index, status } => Some(Self {
                index: *index,
                status: Some(*status),
                ..Self::default()
            }),
            ResponseEvent::Content(_) => None,
        }
    }
}

/// Fold recorded events into one entry per stage, in opening order.
pub fn collect_stages(events: &[ResponseEvent]) -> Vec<WireStage> {
    let mut stages: Vec<WireStage> = Vec::new();
    for event in events {
        let Some(delta) = WireStage::from_event(event) else {
            continue;
        };
        let Some(stage) = stages.iter_mut().find(|s| s.index == delta.index) else {
            stages.push(delta);
            continue;
        };
        if let Some(content) = delta.content {
            stage.content.get_or_insert_with(String::new).push_str(&content);
        }
        if delta.status.is_some() {
            stage.status = delta.status;
        }
    }
    stages
}

/// Fields shared by every chunk of one completion.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl Envelope {
    pub fn new(model: &str) -> Self {
        Self {
            id: format!("chatcmpl-{}", uuid::Uuid::new_v4()),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
        }
    }

    pub fn chunk(&self, delta: serde_json::Value, finish_reason: Option<&str>) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }

    pub fn completion(&self, message: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "object": "chat.completion",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "message": message,
                "finish_reason": "stop",
            }],
        })
    }
}

/// Error body shared by JSON and SSE replies.
pub fn error_body(err: &CoordinatorError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "message": crate::providers::sanitize_api_error(&err.to_string()),
            "type": err.kind(),
        }
    })
}

/// Sink that encodes events into SSE `data:` payloads as they happen.
pub struct ChunkSink {
    envelope: Envelope,
    tx: mpsc::UnboundedSender<String>,
}

impl ChunkSink {
    pub fn new(envelope: Envelope, tx: mpsc::UnboundedSender<String>) -> Self {
        Self { envelope, tx }
    }

    fn send(&self, payload: &serde_json::Value) {
        if self.tx.send(payload.to_string()).is_err() {
            tracing::trace!("SSE client went away; chunk discarded");
        }
    }

    /// Last chunk of a successful answer, carrying its payload.
    pub fn finish(&self, custom_content: Option<&CustomContent>) {
        let delta = match custom_content.filter(|custom| !custom.is_empty()) {
            Some(custom) => serde_json::json!({ "custom_content": custom }),
            None => serde_json::json!({}),
        };
        self.send(&self.envelope.chunk(delta, Some("stop")));
    }

    pub fn fail(&self, err: &CoordinatorError) {
        self.send(&error_body(err));
    }

    pub fn done(&self) {
        let _ = self.tx.send(crate::providers::sse::DONE_MARKER.to_string());
    }
}

impl ResponseSink for ChunkSink {
    fn emit(&self, event: ResponseEvent) {
        let delta = match &event {
            ResponseEvent::Content(text) => serde_json::json!({ "content": text }),
            other => match WireStage::from_event(other) {
                Some(stage) => serde_json::json!({ "custom_content": { "stages": [stage] } }),
                None => return,
            },
        };
        self.send(&self.envelope.chunk(delta, None));
    }
}
