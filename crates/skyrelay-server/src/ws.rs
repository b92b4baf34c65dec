//! `WebSocket` transport: one actor per connection.
//!
//! Clients connect to `GET /ws`. Each socket is split in two:
//!
//! - a **writer task** owns the sink and forwards every
//!   [`OutboundMessage`] queued for the connection as a JSON text frame;
//! - the **reader loop** decodes each text frame as an
//!   [`InboundMessage`] and hands it to [`Hub::dispatch`].
//!
//! The queue's sender is what the hub's registry holds, so anything in the
//! hub can address this client without touching the socket. Malformed or
//! rejected frames are answered with `Error` and the connection stays up.
//! When the socket closes the hub purges everything derived from it.
//!
//! [`Hub::dispatch`]: skyrelay_core::Hub::dispatch

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use skyrelay_core::ConnectionSender;
use skyrelay_types::{ConnectionId, InboundMessage, OutboundMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::state::AppState;

/// Upgrade an HTTP request to a hub connection.
///
/// # Route
///
/// `GET /ws`
pub async fn ws_connect(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| run_connection(socket, state))
}

/// Drive one connection from upgrade to close.
async fn run_connection(socket: WebSocket, state: Arc<AppState>) {
    let (sink, mut stream) = socket.split();
    let (tx, rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let id = state.hub.connect(tx.clone());
    let writer = tokio::spawn(writer_task(sink, rx, id));

    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => handle_text(&state, id, &tx, text.as_str()),
            Some(Ok(Message::Binary(_))) => {
                reply_error(&tx, "binary frames are not supported");
            }
            Some(Ok(Message::Close(_))) | None => {
                debug!(connection_id = %id, "WebSocket client disconnected");
                break;
            }
            Some(Ok(_)) => {
                // Ping and pong are answered by axum.
            }
            Some(Err(e)) => {
                debug!(connection_id = %id, "WebSocket error: {e}");
                break;
            }
        }
    }

    close_connection(&state, id);
    drop(tx);
    writer.abort();
}

/// Purge everything the hub derived from a closed socket.
fn close_connection(state: &AppState, id: ConnectionId) {
    let summary = state.hub.disconnect(id);
    debug!(
        connection_id = %id,
        was_registered = summary.was_registered,
        failed_requests = summary.failed_requests,
        "WebSocket session closed"
    );
}

/// Decode and apply one text frame.
fn handle_text(state: &AppState, id: ConnectionId, tx: &ConnectionSender, text: &str) {
    let message = match serde_json::from_str::<InboundMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(connection_id = %id, error = %e, "Malformed frame");
            reply_error(tx, &format!("malformed message: {e}"));
            return;
        }
    };

    if let Err(e) = state.hub.dispatch(id, message) {
        warn!(connection_id = %id, error = %e, "Rejected message");
        reply_error(tx, &e.to_string());
    }
}

fn reply_error(tx: &ConnectionSender, message: &str) {
    // A closed queue means the writer is gone; the reader will see the
    // close shortly.
    let _ = tx.send(OutboundMessage::Error {
        message: message.to_owned(),
    });
}

/// Forward queued messages to the socket until the queue or socket closes.
async fn writer_task(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<OutboundMessage>,
    id: ConnectionId,
) {
    while let Some(message) = rx.recv().await {
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                warn!(connection_id = %id, kind = message.kind(), "Failed to serialize message: {e}");
                continue;
            }
        };
        if sink.send(Message::Text(json.into())).await.is_err() {
            debug!(connection_id = %id, "WebSocket client disconnected (send failed)");
            break;
        }
    }
    let _ = sink.close().await;
}
