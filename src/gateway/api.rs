//! HTTP handlers for the chat-completions surface.
//!
//! The coordinator is exposed as a single deployment. The caller's credential
//! is required and forwarded to the model backend and the GPA.

use super::events::{collect_stages, error_body, ChunkSink, Envelope};
use super::AppState;
use crate::agent::{Coordinator, Message, RequestContext};
use crate::error::CoordinatorError;
use crate::stage::{RecordingSink, StageReporter};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
};
use serde::Deserialize;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

const API_KEY_HEADER: &str = "api-key";
const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    pub messages: Vec<Message>,
    #[serde(default)]
    pub stream: bool,
}

/// `Api-Key: <key>`, or `Authorization: Bearer <key>`.
fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    let api_key = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok());
    let bearer = || {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|auth| auth.strip_prefix("Bearer "))
    };
    api_key
        .or_else(bearer)
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

fn request_context(headers: &HeaderMap) -> Option<RequestContext> {
    let api_key = extract_api_key(headers)?;
    let conversation_id = headers
        .get(CONVERSATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(ToString::to_string);
    Some(RequestContext {
        api_key: Some(api_key.to_string()),
        conversation_id,
    })
}

fn error_status(err: &CoordinatorError) -> StatusCode {
    match err {
        CoordinatorError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        CoordinatorError::Classification(_)
        | CoordinatorError::Routing(_)
        | CoordinatorError::AgentDispatch { .. }
        | CoordinatorError::Synthesis(_) => StatusCode::BAD_GATEWAY,
    }
}

fn plain_error(status: StatusCode, kind: &str, message: &str) -> Response {
    (
        status,
        Json(serde_json::json!({"error": {"message": message, "type": kind}})),
    )
        .into_response()
}

/// GET /health
pub async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "deployment": state.config.gateway.deployment_name,
    }))
}

/// POST /openai/deployments/{deployment}/chat/completions
pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Path(deployment): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Response {
    if deployment != state.config.gateway.deployment_name {
        return plain_error(
            StatusCode::NOT_FOUND,
            "not_found",
            &format!("Unknown deployment '{deployment}'"),
        );
    }

    let Some(context) = request_context(&headers) else {
        return plain_error(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing credential: send Api-Key or Authorization: Bearer <key>",
        );
    };

    tracing::info!(
        messages = body.messages.len(),
        stream = body.stream,
        conversation_id = context.conversation_id.as_deref().unwrap_or("-"),
        "Chat completion request"
    );

    if body.stream {
        stream_completion(state, context, body.messages)
    } else {
        complete(state, context, body.messages).await
    }
}

/// SSE body of a streaming request. It owns the pipeline task: dropping the
/// body (the client went away) aborts the task and its in-flight calls.
struct PipelineEvents {
    events: UnboundedReceiverStream<String>,
    task: AbortHandle,
}

impl Stream for PipelineEvents {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events)
            .poll_next(cx)
            .map(|data| data.map(|data| Ok(Event::default().data(data))))
    }
}

impl Drop for PipelineEvents {
    fn drop(&mut self) {
        if !self.task.is_finished() {
            tracing::info!("Client disconnected, cancelling request");
            self.task.abort();
        }
    }
}

fn stream_completion(state: AppState, context: RequestContext, messages: Vec<Message>) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let sink = Arc::new(ChunkSink::new(
        Envelope::new(&state.config.gateway.deployment_name),
        tx,
    ));

    let task = tokio::spawn(async move {
        let reporter = StageReporter::new(sink.clone());
        let coordinator = Coordinator::from_config(&state.config, &context, state.http.clone());
        match coordinator.handle(&messages, &reporter).await {
            Ok(response) => sink.finish(response.custom_content.as_ref()),
            Err(e) => {
                tracing::error!(kind = e.kind(), "Request failed: {e}");
                sink.fail(&e);
            }
        }
        sink.done();
    });

    let events = PipelineEvents {
        events: UnboundedReceiverStream::new(rx),
        task: task.abort_handle(),
    };
    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn complete(state: AppState, context: RequestContext, messages: Vec<Message>) -> Response {
    let envelope = Envelope::new(&state.config.gateway.deployment_name);
    let sink = Arc::new(RecordingSink::new());
    let reporter = StageReporter::new(sink.clone());
    let coordinator = Coordinator::from_config(&state.config, &context, state.http.clone());

    match coordinator.handle(&messages, &reporter).await {
        Ok(response) => {
            let mut custom_content =
                serde_json::to_value(response.custom_content.unwrap_or_default())
                    .unwrap_or_else(|_| serde_json::json!({}));
            if let Some(object) = custom_content.as_object_mut() {
                object.insert(
                    "stages".into(),
                    serde_json::json!(collect_stages(&sink.events())),
                );
            }
            let message = serde_json::json!({
                "role": "assistant",
                "content": response.content,
                "custom_content": custom_content,
            });
            Json(envelope.completion(message)).into_response()
        }
        Err(e) => {
            tracing::error!(kind = e.kind(), "Request failed: {e}");
            (error_status(&e), Json(error_body(&e))).into_response()
        }
    }
}
