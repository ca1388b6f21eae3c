//! Inbound WS text-frame dispatch: demo ticker or one relay chat turn.

use std::fmt::Display;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use tracing::debug;

use chatbox_relay::{DeliverySink, RelayBridge};

use crate::app::AppState;
use crate::chat::ChatBody;
use crate::http::demo::{TICKS, TICK_INTERVAL};
use crate::ws::envelope::StreamFrame;
use crate::ws::sink::WsEnvelopeSink;

/// What the connection loop should do once a text frame is handled.
#[derive(Debug, PartialEq, Eq)]
pub enum TurnResult {
    KeepOpen,
    Close,
}

/// How one inbound text frame should be dispatched.
#[derive(Debug, PartialEq)]
pub enum Inbound {
    /// Not valid JSON. Reported with an error envelope, but not a stream
    /// terminal, so the connection stays open.
    Malformed(String),
    /// `{"command": "start_stream"}` runs the demo ticker.
    Ticker,
    /// Anything else is a chat request body.
    Turn(serde_json::Value),
}

/// Classify one inbound text frame without touching the socket.
pub fn classify_text(text: &str) -> Inbound {
    match serde_json::from_str::<serde_json::Value>(text) {
        Err(e) => Inbound::Malformed(e.to_string()),
        Ok(value) => {
            if value.get("command").and_then(|c| c.as_str()) == Some("start_stream") {
                Inbound::Ticker
            } else {
                Inbound::Turn(value)
            }
        }
    }
}

/// Handle one inbound text frame.
pub async fn handle_text<T>(state: &AppState, conn_id: &str, text: &str, tx: &mut T) -> TurnResult
where
    T: Sink<Message> + Unpin + Send,
    T::Error: Display,
{
    match classify_text(text) {
        Inbound::Malformed(detail) => {
            let frame = StreamFrame::error(&detail);
            if tx.send(Message::Text(frame.to_json().into())).await.is_err() {
                return TurnResult::Close;
            }
            TurnResult::KeepOpen
        }
        Inbound::Ticker => run_ticker(conn_id, tx).await,
        Inbound::Turn(value) => run_turn(state, conn_id, value, tx).await,
    }
}

/// The WS analogue of GET /api/chat/test-stream.
async fn run_ticker<T>(conn_id: &str, tx: &mut T) -> TurnResult
where
    T: Sink<Message> + Unpin + Send,
    T::Error: Display,
{
    let mut sink = WsEnvelopeSink::new(tx);
    for i in 1..=TICKS {
        if sink.on_delta(&format!("tick {i}")).await.is_err() {
            return TurnResult::Close;
        }
        tokio::time::sleep(TICK_INTERVAL).await;
    }
    if sink.on_done(None).await.is_err() {
        return TurnResult::Close;
    }
    debug!(conn_id, "demo ticker finished");
    TurnResult::KeepOpen
}

/// Run one chat turn through the relay with the envelope sink.
async fn run_turn<T>(
    state: &AppState,
    conn_id: &str,
    value: serde_json::Value,
    tx: &mut T,
) -> TurnResult
where
    T: Sink<Message> + Unpin + Send,
    T::Error: Display,
{
    let mut sink = WsEnvelopeSink::new(tx);

    let body: ChatBody = match serde_json::from_value(value) {
        Ok(body) => body,
        Err(e) => {
            let _ = sink.on_error(&e.to_string()).await;
            return TurnResult::Close;
        }
    };

    let turn = match body.into_turn() {
        Ok(turn) => turn,
        Err(message) => {
            let _ = sink.on_error(message).await;
            return TurnResult::Close;
        }
    };

    match crate::chat::prepare(state, turn) {
        Ok((request, creds)) => {
            let client = state.upstream.clone();
            let outcome = RelayBridge::spawn(move || client.open(&request, &creds))
                .deliver(&mut sink)
                .await;
            debug!(conn_id, outcome = ?outcome, "ws chat stream finished");
        }
        Err(message) => {
            let _ = sink.on_error(&message).await;
        }
    }

    if sink.errored() {
        TurnResult::Close
    } else {
        TurnResult::KeepOpen
    }
}
