use async_trait::async_trait;
use thiserror::Error;

/// Failures writing to a downstream transport.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The downstream connection is gone, or the sink already closed.
    #[error("downstream closed")]
    Closed,

    /// Transport-level write failure.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Downstream-facing consumer of stream events.
///
/// One sink instance serves one stream. Implementations own their transport
/// and declare the mandatory response framing before the first write; the
/// relay only ever calls these three methods and finishes every stream with
/// exactly one of `on_done`/`on_error`.
#[async_trait]
pub trait DeliverySink: Send {
    /// Write one incremental text fragment.
    async fn on_delta(&mut self, text: &str) -> Result<(), SinkError>;

    /// Close the stream successfully.
    async fn on_done(&mut self, finish_reason: Option<&str>) -> Result<(), SinkError>;

    /// Close the stream with an error.
    async fn on_error(&mut self, message: &str) -> Result<(), SinkError>;
}

/// Linear per-stream sink lifecycle: `Idle → Streaming → Closed`.
/// Writes against a closed sink fail with [`SinkError::Closed`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SinkState {
    #[default]
    Idle,
    Streaming,
    Closed,
}

impl SinkState {
    /// Guard a delta write.
    pub fn begin_write(&mut self) -> Result<(), SinkError> {
        match self {
            SinkState::Closed => Err(SinkError::Closed),
            _ => {
                *self = SinkState::Streaming;
                Ok(())
            }
        }
    }

    /// Guard a terminal write; the sink is closed once it returns `Ok`.
    pub fn begin_terminal(&mut self) -> Result<(), SinkError> {
        match self {
            SinkState::Closed => Err(SinkError::Closed),
            _ => {
                *self = SinkState::Closed;
                Ok(())
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, SinkState::Closed)
    }
}
