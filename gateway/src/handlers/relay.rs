//! Relay WebSocket handler
//!
//! Adapts an axum WebSocket to a [`RelaySession`]: a reader task turns socket
//! messages into [`ClientInbound`]s, a writer task drains [`MessageRoute`]s
//! back onto the socket, and the session task sits between them.

use axum::{
    extract::{
        State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::core::session::{ClientInbound, MessageRoute, RelaySession};
use crate::state::AppState;

/// Outbound routes buffered per session
const CHANNEL_BUFFER_SIZE: usize = 1024;

/// Inbound client messages buffered per session
const INBOUND_BUFFER_SIZE: usize = 256;

/// Maximum WebSocket frame size (1 MiB)
const MAX_WS_FRAME_SIZE: usize = 1024 * 1024;

/// Maximum WebSocket message size (1 MiB)
const MAX_WS_MESSAGE_SIZE: usize = 1024 * 1024;

/// How long the writer gets to flush after the session ends
const WRITER_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Relay WebSocket handler
///
/// Upgrades the HTTP connection and starts a relay session for it.
pub async fn relay_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    debug!("Relay WebSocket connection upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state))
}

async fn handle_relay_socket(socket: WebSocket, app_state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    info!(session_id = %session_id, "Relay WebSocket connection established");

    let (mut sender, mut receiver) = socket.split();
    let (route_tx, mut route_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);
    let (inbound_tx, inbound_rx) = mpsc::channel::<ClientInbound>(INBOUND_BUFFER_SIZE);

    // Sender task for outgoing routes
    let mut sender_task = tokio::spawn(async move {
        while let Some(route) = route_rx.recv().await {
            let should_close = matches!(route, MessageRoute::Close { .. });

            let result = match route {
                MessageRoute::Control(message) => match message.to_json() {
                    Ok(json_str) => sender.send(Message::Text(json_str.into())).await,
                    Err(e) => {
                        error!("Failed to serialize control message: {}", e);
                        continue;
                    }
                },
                MessageRoute::Binary(data) => sender.send(Message::Binary(data)).await,
                MessageRoute::Close { code, reason } => {
                    sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await
                }
            };

            if let Err(e) = result {
                warn!("Failed to send WebSocket message: {}", e);
                break;
            }

            if should_close {
                break;
            }
        }
    });

    // Receiver task for incoming client messages
    let receiver_task = tokio::spawn(async move {
        while let Some(msg_result) = receiver.next().await {
            let inbound = match msg_result {
                Ok(Message::Binary(data)) => ClientInbound::Binary(data),
                Ok(Message::Text(text)) => ClientInbound::Text(text.as_str().to_owned()),
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "Client sent close frame");
                    let _ = inbound_tx.send(ClientInbound::Disconnected).await;
                    return;
                }
                // Ping/pong are answered by the socket itself
                Ok(_) => continue,
                Err(e) => {
                    let _ = inbound_tx.send(ClientInbound::Error(e.to_string())).await;
                    return;
                }
            };

            if inbound_tx.send(inbound).await.is_err() {
                return;
            }
        }
        let _ = inbound_tx.send(ClientInbound::Disconnected).await;
    });

    let shutdown = app_state.sessions.register(session_id);
    let session = RelaySession::new(
        session_id,
        app_state.config.session_config(),
        app_state.connector.clone(),
        route_tx,
    );

    let reason = session.run(inbound_rx, shutdown).await;
    app_state.sessions.remove(&session_id);
    receiver_task.abort();

    if tokio::time::timeout(WRITER_FLUSH_TIMEOUT, &mut sender_task)
        .await
        .is_err()
    {
        warn!(session_id = %session_id, "Writer did not flush in time");
        sender_task.abort();
    }

    info!(
        session_id = %session_id,
        reason = reason.as_str(),
        "Relay WebSocket connection terminated"
    );
}
