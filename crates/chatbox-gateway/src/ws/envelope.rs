//! JSON envelopes for the WebSocket chat wire.

use serde::Serialize;

/// One stream event as a self-contained text frame.
///
/// `done` always carries a finish reason (`"stop"` when the upstream
/// supplied none) so clients can key off a stable value.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamFrame {
    Content { delta: String },
    Done { finish_reason: String },
    Error { message: String },
}

impl StreamFrame {
    pub fn content(delta: &str) -> Self {
        StreamFrame::Content {
            delta: delta.to_string(),
        }
    }

    pub fn done(finish_reason: Option<&str>) -> Self {
        StreamFrame::Done {
            finish_reason: finish_reason.unwrap_or("stop").to_string(),
        }
    }

    pub fn error(message: &str) -> Self {
        StreamFrame::Error {
            message: message.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}
