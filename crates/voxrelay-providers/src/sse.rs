//! Line-oriented streaming body parsers.
//!
//! Server-Sent Events (OpenAI-compatible chat) and newline-delimited JSON
//! (Ollama) both arrive as arbitrary byte chunks that must be re-split on
//! line boundaries.

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use tokio_stream::StreamExt;

/// A parsed SSE event.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Parse a reqwest response body as an SSE stream.
pub fn parse_sse_stream(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    parse_sse_bytes(Box::pin(response.bytes_stream()))
}

fn parse_sse_bytes(byte_stream: ByteStream) -> impl Stream<Item = anyhow::Result<SseEvent>> {
    futures::stream::unfold(
        SseState {
            lines: LineBuffer::new(byte_stream),
            current_event: None,
            current_data: Vec::new(),
            current_id: None,
        },
        |mut state| async move {
            loop {
                match state.lines.next_line().await {
                    Some(Ok(line)) => {
                        if line.is_empty() {
                            // Empty line = dispatch event
                            if let Some(event) = state.take_event() {
                                return Some((Ok(event), state));
                            }
                            continue;
                        }
                        if line.starts_with(':') {
                            continue;
                        }
                        if let Some(value) = line.strip_prefix("event:") {
                            state.current_event = Some(value.trim_start().to_string());
                        } else if let Some(value) = line.strip_prefix("data:") {
                            state.current_data.push(value.trim_start().to_string());
                        } else if let Some(value) = line.strip_prefix("id:") {
                            state.current_id = Some(value.trim_start().to_string());
                        }
                    }
                    Some(Err(e)) => return Some((Err(e), state)),
                    None => {
                        // Stream ended. Dispatch any remaining data.
                        return state.take_event().map(|event| (Ok(event), state));
                    }
                }
            }
        },
    )
}

struct SseState {
    lines: LineBuffer,
    current_event: Option<String>,
    current_data: Vec<String>,
    current_id: Option<String>,
}

impl SseState {
    fn take_event(&mut self) -> Option<SseEvent> {
        if self.current_data.is_empty() {
            return None;
        }
        let event = SseEvent {
            event: self.current_event.take(),
            data: self.current_data.join("\n"),
            id: self.current_id.take(),
        };
        self.current_data.clear();
        Some(event)
    }
}

/// Parse a reqwest response body as newline-delimited text, skipping blank lines.
pub fn parse_ndjson_stream(response: reqwest::Response) -> impl Stream<Item = anyhow::Result<String>> {
    parse_ndjson_bytes(Box::pin(response.bytes_stream()))
}

fn parse_ndjson_bytes(byte_stream: ByteStream) -> impl Stream<Item = anyhow::Result<String>> {
    futures::stream::unfold(LineBuffer::new(byte_stream), |mut lines| async move {
        loop {
            match lines.next_line().await? {
                Ok(line) if line.trim().is_empty() => continue,
                item => return Some((item, lines)),
            }
        }
    })
}

/// Accumulates partial lines across body chunks.
struct LineBuffer {
    byte_stream: ByteStream,
    buffer: String,
    exhausted: bool,
}

impl LineBuffer {
    fn new(byte_stream: ByteStream) -> Self {
        Self {
            byte_stream,
            buffer: String::new(),
            exhausted: false,
        }
    }

    /// Next complete line without its terminator. A trailing unterminated
    /// line is returned once the body ends.
    async fn next_line(&mut self) -> Option<anyhow::Result<String>> {
        loop {
            if let Some(newline_pos) = self.buffer.find('\n') {
                let line = self.buffer[..newline_pos].trim_end_matches('\r').to_string();
                self.buffer.drain(..=newline_pos);
                return Some(Ok(line));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return None;
                }
                return Some(Ok(std::mem::take(&mut self.buffer)));
            }

            match self.byte_stream.next().await {
                Some(Ok(chunk)) => self.buffer.push_str(&String::from_utf8_lossy(&chunk)),
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.buffer.clear();
                    return Some(Err(anyhow::anyhow!("stream error: {e}")));
                }
                None => self.exhausted = true,
            }
        }
    }
}
