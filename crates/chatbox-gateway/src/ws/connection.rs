use axum::{
    extract::{ws::Message, ws::WebSocket, State, WebSocketUpgrade},
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::info;

use crate::app::AppState;
use crate::ws::chat::{self, TurnResult};

/// Axum handler — upgrades HTTP to WebSocket at GET /ws/chat.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Per-connection event loop — lives for the entire WS session.
///
/// Turns are strictly sequential: the next inbound frame is read only after
/// the current turn's stream has finished.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    info!(conn_id = %conn_id, "new WS chat connection");

    let (mut tx, mut rx) = socket.split();

    while let Some(msg) = rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                match chat::handle_text(&state, &conn_id, &text, &mut tx).await {
                    TurnResult::KeepOpen => {}
                    TurnResult::Close => break,
                }
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    info!(conn_id, "WS chat connection closed");
}
