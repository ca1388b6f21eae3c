use serde::Deserialize;

/// Events reconstructed from an upstream completion stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// Incremental text content from the model. Order-significant.
    ContentDelta { text: String },

    /// Stream completed. `finish_reason` is the upstream's reason when it
    /// sent one, `None` when the stream simply ended.
    Done { finish_reason: Option<String> },

    /// Stream failed.
    Error { message: String },
}

impl StreamEvent {
    /// Terminal events end the stream; nothing may follow one.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done { .. } | StreamEvent::Error { .. })
    }
}

/// Incremental decoder for OpenAI-style completion streams.
///
/// Upstream bytes arrive at arbitrary chunk boundaries. The parser keeps the
/// residue after the last line feed and only ever interprets complete lines,
/// so feeding one byte at a time or the whole body at once yields the same
/// event sequence. Terminal handling is sticky: after a `Done` the parser
/// swallows everything, which keeps trailing bytes after `[DONE]` from
/// producing phantom events.
#[derive(Debug, Default)]
pub struct SseParser {
    residual: Vec<u8>,
    terminated: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a terminal event has already been produced.
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Consume one raw chunk, producing zero or more events.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        if self.terminated {
            return Vec::new();
        }
        self.residual.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.residual.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.residual.drain(..=pos).collect();
            self.parse_line(&line[..line.len() - 1], &mut events);
            if self.terminated {
                self.residual.clear();
                break;
            }
        }
        events
    }

    /// Signal upstream EOF.
    ///
    /// Emits the fallback `Done` when the stream never produced its own
    /// terminal event. A partial line without a trailing line feed is
    /// dropped — only complete lines are ever parsed.
    pub fn finalize(&mut self) -> Option<StreamEvent> {
        if self.terminated {
            return None;
        }
        self.terminated = true;
        self.residual.clear();
        Some(StreamEvent::Done {
            finish_reason: None,
        })
    }

    fn parse_line(&mut self, raw: &[u8], events: &mut Vec<StreamEvent>) {
        let line = match std::str::from_utf8(raw) {
            Ok(l) => l.trim(),
            Err(_) => return, // undecodable line — drop it, not the stream
        };
        if line.is_empty() || line.starts_with(':') {
            return; // blank or SSE comment/heartbeat
        }
        let data = line.strip_prefix("data: ").unwrap_or(line);

        // Upstream signals end-of-stream with a literal `[DONE]` data value
        if data.trim() == "[DONE]" {
            self.terminated = true;
            events.push(StreamEvent::Done {
                finish_reason: None,
            });
            return;
        }

        let chunk = match serde_json::from_str::<ChatChunk>(data) {
            Ok(c) => c,
            Err(_) => return, // malformed payload lines are non-fatal
        };

        if let Some(choice) = chunk.choices.first() {
            if let Some(content) = &choice.delta.content {
                if !content.is_empty() {
                    events.push(StreamEvent::ContentDelta {
                        text: content.clone(),
                    });
                }
            }
            if let Some(reason) = &choice.finish_reason {
                if !reason.is_empty() {
                    self.terminated = true;
                    events.push(StreamEvent::Done {
                        finish_reason: Some(reason.clone()),
                    });
                }
            }
        }
    }
}

// Upstream streaming chunk types (private — deserialization only)

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}
