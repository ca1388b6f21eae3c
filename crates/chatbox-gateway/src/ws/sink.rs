use std::fmt::Display;

use async_trait::async_trait;
use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};

use chatbox_relay::{DeliverySink, SinkError, SinkState};

use crate::ws::envelope::StreamFrame;

/// Persistent-connection delivery sink: one envelope per event, written to
/// the send half of an already-open WebSocket.
///
/// Generic over the send half (the live connection passes the `SplitSink`
/// from `WebSocket::split`) so the envelope and close policy can be
/// exercised against an in-memory sink.
///
/// `on_done` leaves the connection open (turns share it); after `on_error`
/// the caller is expected to close it.
pub struct WsEnvelopeSink<'a, T> {
    tx: &'a mut T,
    state: SinkState,
    errored: bool,
}

impl<'a, T> WsEnvelopeSink<'a, T>
where
    T: Sink<Message> + Unpin + Send,
    T::Error: Display,
{
    pub fn new(tx: &'a mut T) -> Self {
        Self {
            tx,
            state: SinkState::default(),
            errored: false,
        }
    }

    /// True once an `error` envelope has been written.
    pub fn errored(&self) -> bool {
        self.errored
    }

    async fn send(&mut self, frame: &StreamFrame) -> Result<(), SinkError> {
        self.tx
            .send(Message::Text(frame.to_json().into()))
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

#[async_trait]
impl<'a, T> DeliverySink for WsEnvelopeSink<'a, T>
where
    T: Sink<Message> + Unpin + Send,
    T::Error: Display,
{
    async fn on_delta(&mut self, text: &str) -> Result<(), SinkError> {
        self.state.begin_write()?;
        self.send(&StreamFrame::content(text)).await
    }

    async fn on_done(&mut self, finish_reason: Option<&str>) -> Result<(), SinkError> {
        self.state.begin_terminal()?;
        self.send(&StreamFrame::done(finish_reason)).await
    }

    async fn on_error(&mut self, message: &str) -> Result<(), SinkError> {
        self.state.begin_terminal()?;
        self.errored = true;
        self.send(&StreamFrame::error(message)).await
    }
}
