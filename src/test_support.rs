//! In-process doubles for the model backend and the downstream agents.

use crate::agent::{AgentName, Message};
use crate::downstream::AgentGateway;
use crate::providers::{CompletionClient, ResponseFormat};
use crate::stage::Stage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;

type CompletionCall = (Vec<Message>, Option<ResponseFormat>);

struct ScriptedStream {
    chunks: Vec<String>,
    error: Option<String>,
}

/// Completion client replaying queued replies in order.
#[derive(Default)]
pub struct ScriptedClient {
    completions: Mutex<VecDeque<Result<String, String>>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    completion_calls: Mutex<Vec<CompletionCall>>,
    stream_calls: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(self, reply: &str) -> Self {
        self.completions.lock().push_back(Ok(reply.to_string()));
        self
    }

    pub fn with_completion_error(self, message: &str) -> Self {
        self.completions.lock().push_back(Err(message.to_string()));
        self
    }

    pub fn with_stream(self, chunks: &[&str]) -> Self {
        self.streams.lock().push_back(ScriptedStream {
            chunks: chunks.iter().map(ToString::to_string).collect(),
            error: None,
        });
        self
    }

    /// A stream that yields `chunks` and then fails.
    pub fn with_stream_error(self, chunks: &[&str], message: &str) -> Self {
        self.streams.lock().push_back(ScriptedStream {
            chunks: chunks.iter().map(ToString::to_string).collect(),
            error: Some(message.to_string()),
        });
        self
    }

    pub fn completion_calls(&self) -> Vec<CompletionCall> {
        self.completion_calls.lock().clone()
    }

    pub fn stream_calls(&self) -> Vec<Vec<Message>> {
        self.stream_calls.lock().clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn chat_with_history(
        &self,
        messages: &[Message],
        response_format: Option<&ResponseFormat>,
    ) -> anyhow::Result<String> {
        self.completion_calls
            .lock()
            .push((messages.to_vec(), response_format.cloned()));
        match self.completions.lock().pop_front() {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => anyhow::bail!("no scripted completion left"),
        }
    }

    async fn stream_chat_with_history(
        &self,
        messages: &[Message],
        tx: mpsc::UnboundedSender<String>,
    ) -> anyhow::Result<String> {
        self.stream_calls.lock().push(messages.to_vec());
        let Some(stream) = self.streams.lock().pop_front() else {
            anyhow::bail!("no scripted stream left");
        };
        let mut content = String::new();
        for chunk in stream.chunks {
            content.push_str(&chunk);
            let _ = tx.send(chunk);
            tokio::task::yield_now().await;
        }
        match stream.error {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(content),
        }
    }

    fn deployment(&self) -> &str {
        "scripted"
    }
}

/// One recorded `dispatch` call.
#[derive(Debug, Clone)]
pub struct DispatchCall {
    pub conversation: Vec<Message>,
    pub additional_instructions: String,
}

pub type DispatchLog = Arc<Mutex<Vec<DispatchCall>>>;

/// Agent gateway with a fixed reply and optional progress chunks.
pub struct ScriptedGateway {
    agent: AgentName,
    reply: Result<Message, String>,
    progress: Vec<String>,
    log: DispatchLog,
}

impl ScriptedGateway {
    pub fn answering(agent: AgentName, text: &str) -> Self {
        Self::replying(agent, Message::assistant(text))
    }

    pub fn replying(agent: AgentName, message: Message) -> Self {
        Self {
            agent,
            reply: Ok(message),
            progress: Vec::new(),
            log: DispatchLog::default(),
        }
    }

    pub fn failing(agent: AgentName, message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            ..Self::answering(agent, "")
        }
    }

    pub fn with_progress(mut self, chunks: &[&str]) -> Self {
        self.progress = chunks.iter().map(ToString::to_string).collect();
        self
    }

    /// Shared handle to the calls this gateway receives.
    pub fn log(&self) -> DispatchLog {
        Arc::clone(&self.log)
    }
}

#[async_trait]
impl AgentGateway for ScriptedGateway {
    fn agent(&self) -> AgentName {
        self.agent
    }

    async fn dispatch(
        &self,
        conversation: &[Message],
        stage: &Stage,
        additional_instructions: &str,
    ) -> anyhow::Result<Message> {
        self.log.lock().push(DispatchCall {
            conversation: conversation.to_vec(),
            additional_instructions: additional_instructions.to_string(),
        });
        for chunk in &self.progress {
            stage.append_content(chunk);
        }
        self.reply.clone().map_err(|message| anyhow::anyhow!(message))
    }
}
