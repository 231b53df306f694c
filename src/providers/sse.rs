//! Incremental decoder for `text/event-stream` bodies.
//!
//! Chunk boundaries from the network do not line up with lines or even with
//! UTF-8 characters, so raw bytes are buffered until a full line is available.

/// Terminal marker used by OpenAI-compatible streams.
pub const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the `[DONE]` marker has been seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Feed raw bytes; returns the `data:` payloads of every completed line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(payload) = self.parse_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        let line = std::mem::take(&mut self.buffer);
        self.parse_line(&line).into_iter().collect()
    }

    fn parse_line(&mut self, line: &[u8]) -> Option<String> {
        if self.done {
            return None;
        }
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches(['\n', '\r']);
        // Comments (": keep-alive"), event names, ids and blank separators carry no data.
        let data = line.strip_prefix("data:")?.trim();
        if data.is_empty() {
            return None;
        }
        if data == DONE_MARKER {
            self.done = true;
            return None;
        }
        Some(data.to_string())
    }
}
