//! Streaming relay core.
//!
//! Forwards one chat-completion request to an OpenAI-compatible upstream,
//! reconstructs typed events from the upstream's line-oriented byte stream,
//! and hands them to a transport-specific delivery sink. The blocking
//! upstream read is isolated on a dedicated worker so the async delivery
//! path never waits on network I/O.

pub mod bridge;
pub mod request;
pub mod sink;
pub mod stream;
pub mod upstream;

pub use bridge::{RelayBridge, RelayOutcome};
pub use request::{ChatMessage, ChatRequest, ProviderQuirks, Role, UpstreamCredentials};
pub use sink::{DeliverySink, SinkError, SinkState};
pub use stream::{SseParser, StreamEvent};
pub use upstream::{ByteSource, ToolSupport, UpstreamClient, UpstreamError};
