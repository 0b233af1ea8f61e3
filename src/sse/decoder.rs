//! Incremental Server-Sent Events decoder.
//!
//! Handles:
//! - line buffering across arbitrary chunk boundaries
//! - `event:`, `data:` (multi-line), `id:` fields and `:` comments
//! - `\n` and `\r\n` line endings
//! - lines longer than the limit are dropped along with their frame

use bytes::BytesMut;

/// Event name used when a frame carries no `event:` field
pub const DEFAULT_EVENT: &str = "message";

/// One dispatched SSE event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: String,
    pub data: String,
    pub id: Option<String>,
}

/// Longest accepted line, in bytes
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

#[derive(Debug)]
pub struct SseDecoder {
    buffer: BytesMut,
    max_line_length: usize,
    /// Skipping the rest of an overlong line
    discarding: bool,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_line_length(MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192.min(max_line_length + 2)),
            max_line_length,
            discarding: false,
            event: None,
            data: Vec::new(),
            id: None,
        }
    }

    /// Feed a chunk and collect every frame it completes
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line_bytes = self.buffer.split_to(newline_pos + 1);
            if self.discarding {
                self.discarding = false;
                continue;
            }
            line_bytes.truncate(line_bytes.len() - 1);
            if line_bytes.last() == Some(&b'\r') {
                line_bytes.truncate(line_bytes.len() - 1);
            }
            if line_bytes.len() > self.max_line_length {
                self.drop_overlong(line_bytes.len());
                continue;
            }

            let line = match std::str::from_utf8(&line_bytes) {
                Ok(s) => s,
                Err(_) => {
                    tracing::warn!(len = line_bytes.len(), "Skipping non UTF-8 SSE line");
                    continue;
                }
            };

            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
        }

        // Unterminated line past the limit: drop what we have and skip to the
        // next newline
        if self.buffer.len() > self.max_line_length {
            let len = self.buffer.len();
            self.buffer.clear();
            if !self.discarding {
                self.discarding = true;
                self.drop_overlong(len);
            }
        }

        frames
    }

    fn drop_overlong(&mut self, len: usize) {
        tracing::warn!(
            len,
            max = self.max_line_length,
            "Dropping overlong SSE line and its frame"
        );
        self.event = None;
        self.data.clear();
        self.id = None;
    }

    fn process_line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }

        // Comment / keep-alive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // `retry:` is ignored; reconnect timing is the channel's job
            _ => {}
        }

        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        let event = self.event.take();
        let id = self.id.take();

        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseFrame {
            event: event
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data,
            id,
        })
    }
}
