//! POST /api/chat/stream — the chunked-HTTP delivery path.
//!
//! The response framing is committed before credentials are resolved, so
//! every failure after validation travels through the stream itself as an
//! `[ERROR]: ` chunk rather than as an HTTP error status.

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use chatbox_relay::{DeliverySink, RelayBridge, SinkError, SinkState};

use crate::app::AppState;
use crate::chat::ChatBody;

/// Marker prefixed to error text delivered inside an already-open stream.
pub const ERROR_MARKER: &str = "[ERROR]: ";

/// Buffer between the delivery loop and the HTTP body writer.
const BODY_BUFFER: usize = 32;

/// Body framing for the chunked streaming endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Raw concatenated delta text.
    Plain,
    /// Each fragment wrapped as a `data: <text>\n\n` event.
    Sse,
}

impl Framing {
    /// SSE when the client asks for `text/event-stream`, plain otherwise.
    pub fn negotiate(headers: &HeaderMap) -> Self {
        let accepts_sse = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.contains("text/event-stream"))
            .unwrap_or(false);
        if accepts_sse {
            Framing::Sse
        } else {
            Framing::Plain
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Framing::Plain => "text/plain; charset=utf-8",
            Framing::Sse => "text/event-stream",
        }
    }

    fn frame(self, text: &str) -> String {
        match self {
            Framing::Plain => text.to_string(),
            Framing::Sse => format!("data: {text}\n\n"),
        }
    }
}

/// Chunked-HTTP delivery sink.
///
/// Each delta becomes one immediately-flushed body chunk; `on_done` closes
/// the body by dropping the sender (hyper writes the zero-length chunked
/// terminator). A send failure means the client went away.
pub struct HttpStreamSink {
    tx: Option<mpsc::Sender<Bytes>>,
    framing: Framing,
    state: SinkState,
}

impl HttpStreamSink {
    fn new(tx: mpsc::Sender<Bytes>, framing: Framing) -> Self {
        Self {
            tx: Some(tx),
            framing,
            state: SinkState::default(),
        }
    }

    async fn send(&self, payload: String) -> Result<(), SinkError> {
        let tx = self.tx.as_ref().ok_or(SinkError::Closed)?;
        tx.send(Bytes::from(payload))
            .await
            .map_err(|_| SinkError::Closed)
    }
}

#[async_trait]
impl DeliverySink for HttpStreamSink {
    async fn on_delta(&mut self, text: &str) -> Result<(), SinkError> {
        self.state.begin_write()?;
        self.send(self.framing.frame(text)).await
    }

    async fn on_done(&mut self, _finish_reason: Option<&str>) -> Result<(), SinkError> {
        self.state.begin_terminal()?;
        self.tx.take();
        Ok(())
    }

    async fn on_error(&mut self, message: &str) -> Result<(), SinkError> {
        self.state.begin_terminal()?;
        let payload = self.framing.frame(&format!("{ERROR_MARKER}{message}"));
        let result = self.send(payload).await;
        self.tx.take();
        result
    }
}

/// POST /api/chat/stream — relay one chat turn as a chunked body.
pub async fn stream_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<ChatBody>,
) -> Response {
    let framing = Framing::negotiate(&headers);

    let turn = match body.into_turn() {
        Ok(turn) => turn,
        Err(message) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response();
        }
    };

    let (tx, rx) = mpsc::channel(BODY_BUFFER);
    let mut sink = HttpStreamSink::new(tx, framing);

    tokio::spawn(async move {
        match crate::chat::prepare(&state, turn) {
            Ok((request, creds)) => {
                let client = state.upstream.clone();
                let outcome = RelayBridge::spawn(move || client.open(&request, &creds))
                    .deliver(&mut sink)
                    .await;
                debug!(outcome = ?outcome, "http chat stream finished");
            }
            Err(message) => {
                if let Err(e) = sink.on_error(&message).await {
                    debug!(error = %e, "client gone before error delivery");
                }
            }
        }
    });

    stream_response(framing, rx)
}

/// Streaming response with intermediary buffering disabled.
fn stream_response(framing: Framing, rx: mpsc::Receiver<Bytes>) -> Response {
    let body = Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, Infallible>));
    let mut response = body.into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(framing.content_type()),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("X-Accel-Buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_sink(framing: Framing) -> (HttpStreamSink, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(BODY_BUFFER);
        (HttpStreamSink::new(tx, framing), rx)
    }

    #[test]
    fn negotiation_defaults_to_plain() {
        let headers = HeaderMap::new();
        assert_eq!(Framing::negotiate(&headers), Framing::Plain);

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        assert_eq!(Framing::negotiate(&headers), Framing::Plain);
    }

    #[test]
    fn event_stream_accept_selects_sse() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        assert_eq!(Framing::negotiate(&headers), Framing::Sse);
    }

    #[tokio::test]
    async fn plain_deltas_pass_through_raw() {
        let (mut sink, mut rx) = new_sink(Framing::Plain);
        sink.on_delta("Hello").await.unwrap();
        sink.on_delta(" world").await.unwrap();
        sink.on_done(Some("stop")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("Hello"));
        assert_eq!(rx.recv().await.unwrap(), Bytes::from(" world"));
        // done writes nothing; the dropped sender closes the body
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sse_framing_wraps_each_delta() {
        let (mut sink, mut rx) = new_sink(Framing::Sse);
        sink.on_delta("tick 1").await.unwrap();
        sink.on_done(None).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("data: tick 1\n\n"));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn error_chunk_carries_the_marker() {
        let (mut sink, mut rx) = new_sink(Framing::Plain);
        sink.on_error("Request timeout").await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), Bytes::from("[ERROR]: Request timeout"));
        assert!(rx.recv().await.is_none());

        let (mut sink, mut rx) = new_sink(Framing::Sse);
        sink.on_error("Request timeout").await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            Bytes::from("data: [ERROR]: Request timeout\n\n")
        );
    }

    #[tokio::test]
    async fn closed_sink_rejects_further_writes() {
        let (mut sink, _rx) = new_sink(Framing::Plain);
        sink.on_done(None).await.unwrap();

        assert!(matches!(sink.on_delta("late").await, Err(SinkError::Closed)));
        assert!(matches!(sink.on_error("late").await, Err(SinkError::Closed)));
    }

    #[tokio::test]
    async fn client_disconnect_surfaces_as_closed() {
        let (mut sink, rx) = new_sink(Framing::Plain);
        drop(rx);
        assert!(matches!(sink.on_delta("x").await, Err(SinkError::Closed)));
    }

    #[test]
    fn response_headers_disable_intermediary_buffering() {
        let (_tx, rx) = mpsc::channel(1);
        let response = stream_response(Framing::Sse, rx);

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(headers[header::CONTENT_TYPE], "text/event-stream");
        assert_eq!(headers[header::CACHE_CONTROL], "no-cache, no-transform");
        assert_eq!(headers[header::CONNECTION], "keep-alive");
        assert_eq!(headers["X-Accel-Buffering"], "no");
    }
}
