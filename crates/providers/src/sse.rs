//! Incremental decoder for the generation event stream.
//!
//! Framing is line based: every `data:` line carries one JSON payload. Bytes are
//! buffered until a `\n` arrives, so a chunk boundary may fall anywhere,
//! including inside a multi-byte UTF-8 character (a `\n` byte never occurs
//! inside one).

use crate::gemini::StreamPayload;

/// A decoded unit the coordinator acts on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedEvent {
    /// First payload parsed; emitted once per decoder.
    Started,
    Delta(String),
    /// Upstream refused the prompt. Nothing follows this.
    Blocked(String),
}

/// Splits raw bytes into `data:` payload strings, carrying partial lines over.
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Feed raw bytes from the HTTP response. Returns the payloads of any
    /// complete `data:` lines.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            if let Some(data) = data_payload(&self.buffer[start..end]) {
                payloads.push(data);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        payloads
    }

    /// Treat whatever is buffered as a final line.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        data_payload(&rest)
    }
}

impl Default for SseParser {
    fn default() -> Self {
        Self::new()
    }
}

fn data_payload(line: &[u8]) -> Option<String> {
    let line = line.strip_suffix(b"\r").unwrap_or(line);
    let value = line.strip_prefix(b"data:")?;
    let value = value.strip_prefix(b" ").unwrap_or(value);
    if value.is_empty() {
        return None;
    }
    // Ignore other fields (event:, id:, retry:, comments starting with :)
    Some(String::from_utf8_lossy(value).into_owned())
}

/// Turns event-stream bytes into [`DecodedEvent`]s for one generation.
pub struct StreamDecoder {
    parser: SseParser,
    started: bool,
    blocked: bool,
    skipped: u64,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            parser: SseParser::new(),
            started: false,
            blocked: false,
            skipped: 0,
        }
    }

    /// Feed the next chunk. After a block, everything is ignored.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DecodedEvent> {
        if self.blocked {
            return Vec::new();
        }
        let payloads = self.parser.feed(chunk);
        let mut events = Vec::new();
        for data in payloads {
            self.decode_payload(&data, &mut events);
            if self.blocked {
                break;
            }
        }
        events
    }

    /// Call once the chunk stream has ended.
    pub fn finish(&mut self) -> Vec<DecodedEvent> {
        let mut events = Vec::new();
        if self.blocked {
            return events;
        }
        if let Some(data) = self.parser.flush() {
            self.decode_payload(&data, &mut events);
        }
        events
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked
    }

    /// Number of `data:` payloads that failed to parse and were dropped.
    pub fn skipped_frames(&self) -> u64 {
        self.skipped
    }

    fn decode_payload(&mut self, data: &str, events: &mut Vec<DecodedEvent>) {
        let payload = match serde_json::from_str::<StreamPayload>(data) {
            Ok(payload) => payload,
            Err(e) => {
                self.skipped += 1;
                tracing::debug!(error = %e, "skipping unparseable stream payload");
                return;
            }
        };

        if !self.started {
            self.started = true;
            events.push(DecodedEvent::Started);
        }

        if let Some(text) = payload.text_delta() {
            events.push(DecodedEvent::Delta(text.to_string()));
        } else if let Some(feedback) = payload.prompt_feedback() {
            self.blocked = true;
            events.push(DecodedEvent::Blocked(feedback.block_message()));
        }
    }
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}
