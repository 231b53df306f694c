//! Caller-visible progress reporting.
//!
//! A [`StageReporter`] turns pipeline progress into [`ResponseEvent`]s pushed
//! to a [`ResponseSink`]. Stages are opened, appended to, and closed through a
//! [`Stage`] handle; closing consumes the handle, so nothing can be appended
//! to a closed stage. A handle dropped while still open (the pipeline bailed
//! out with `?`) closes its stage as failed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Terminal status of a stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Completed,
    Failed,
}

/// One observable step of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseEvent {
    StageOpened { index: usize, name: String },
    StageContent { index: usize, content: String },
    StageClosed { index: usize, status: StageStatus },
    /// A chunk of the final answer.
    Content(String),
}

/// Push-only destination for response events.
///
/// Emission never blocks and never fails from the pipeline's point of view:
/// a caller that went away simply stops observing.
pub trait ResponseSink: Send + Sync {
    fn emit(&self, event: ResponseEvent);
}

impl ResponseSink for mpsc::UnboundedSender<ResponseEvent> {
    fn emit(&self, event: ResponseEvent) {
        if self.send(event).is_err() {
            tracing::trace!("Response receiver dropped; event discarded");
        }
    }
}

/// Opens stages and streams answer text for a single request.
pub struct StageReporter {
    sink: Arc<dyn ResponseSink>,
    next_index: AtomicUsize,
}

impl StageReporter {
    pub fn new(sink: Arc<dyn ResponseSink>) -> Self {
        Self {
            sink,
            next_index: AtomicUsize::new(0),
        }
    }

    /// Open a new named stage. Indices increase monotonically per reporter.
    pub fn open_stage(&self, name: &str) -> Stage {
        let index = self.next_index.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(index, stage = name, "Stage opened");
        self.sink.emit(ResponseEvent::StageOpened {
            index,
            name: name.to_string(),
        });
        Stage {
            index,
            name: name.to_string(),
            sink: Arc::clone(&self.sink),
            closed: false,
        }
    }

    /// Stream a chunk of the final answer.
    pub fn append_content(&self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.sink.emit(ResponseEvent::Content(chunk.to_string()));
    }
}

/// Handle to an open stage.
pub struct Stage {
    index: usize,
    name: String,
    sink: Arc<dyn ResponseSink>,
    closed: bool,
}

impl Stage {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn append_content(&self, content: &str) {
        debug_assert!(!self.closed, "append to closed stage '{}'", self.name);
        if content.is_empty() {
            return;
        }
        self.sink.emit(ResponseEvent::StageContent {
            index: self.index,
            content: content.to_string(),
        });
    }

    pub fn close(mut self) {
        self.finish(StageStatus::Completed);
    }

    fn finish(&mut self, status: StageStatus) {
        if self.closed {
            return;
        }
        self.closed = true;
        tracing::debug!(index = self.index, stage = %self.name, ?status, "Stage closed");
        self.sink.emit(ResponseEvent::StageClosed {
            index: self.index,
            status,
        });
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.finish(StageStatus::Failed);
    }
}

/// Sink that keeps every event in memory, in emission order.
#[derive(Default)]
pub struct RecordingSink {
    events: parking_lot::Mutex<Vec<ResponseEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ResponseEvent> {
        self.events.lock().clone()
    }

    /// Concatenation of all streamed answer chunks.
    pub fn content(&self) -> String {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                ResponseEvent::Content(chunk) => Some(chunk.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Accumulated text of the stage with the given name, if it was opened.
    pub fn stage_content(&self, name: &str) -> Option<String> {
        let events = self.events.lock();
        let index = events.iter().find_map(|event| match event {
            ResponseEvent::StageOpened { index, name: n } if n == name => Some(*index),
            _ => None,
        })?;
        Some(
            events
                .iter()
                .filter_map(|event| match event {
                    ResponseEvent::StageContent { index: i, content } if *i == index => {
                        Some(content.as_str())
                    }
                    _ => None,
                })
                .collect(),
        )
    }
}

impl ResponseSink for RecordingSink {
    fn emit(&self, event: ResponseEvent) {
        self.events.lock().push(event);
    }
}
