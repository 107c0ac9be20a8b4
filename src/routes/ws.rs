//! WebSocket handler — per-connection read and write loops.
//!
//! DESIGN
//! ======
//! On upgrade the connection registers with the hub, splits the socket, and
//! runs two loops:
//! - Write loop (spawned task): sole owner of the socket sink. Drains the
//!   client's outbound queue and sends keepalive pings. Nothing else writes.
//! - Read loop (upgrade task): decodes inbound envelopes and hands them to
//!   the hub router. Every received frame, pongs included, refreshes the read
//!   deadline.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → assign id → register (welcome notice queued first)
//! 2. Read loop routes frames; write loop drains queue + pings
//! 3. Any terminal condition on either side ends the read loop: close frame,
//!    read error, read deadline, or the write loop exiting
//! 4. Unregister (closes the queue) → write loop sends close and exits

use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::RelayConfig;
use crate::hub::{Client, ClientKey, Hub, RouteOutcome};
use crate::state::AppState;

/// Fresh identifiers tried before giving up on a connection.
const MAX_ID_ATTEMPTS: usize = 3;

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
enum WriteError {
    #[error("write deadline exceeded")]
    Deadline,
    #[error("transport: {0}")]
    Transport(#[from] axum::Error),
}

/// Why a read loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadEnd {
    /// Peer sent a close frame or the stream ended.
    Closed,
    /// Transport error, including an oversized frame.
    Error,
    /// Nothing arrived within the pong wait.
    Deadline,
    /// Write loop exited first (queue closed or write failure).
    WriterGone,
}

// =============================================================================
// UPGRADE
// =============================================================================

pub async fn handle_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let max = state.config.max_message_size;
    ws.max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| run_ws(socket, state))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState) {
    let Some((key, queue)) = register_client(&state).await else {
        warn!("ws: could not assign a unique client id, closing");
        let _ = socket.send(Message::Close(None)).await;
        return;
    };
    let client_id = key.id.clone();
    info!(%client_id, "ws: client connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_loop(sink, queue, client_id.clone(), state.config.clone()));

    let end = read_loop(stream, &state, &client_id, &mut writer).await;

    state.hub.unregister(&key).await;
    if end != ReadEnd::WriterGone {
        // Queue is closed now; the writer sends its close frame and exits.
        let _ = writer.await;
    }
    info!(%client_id, reason = ?end, "ws: client disconnected");
}

/// Generate an identifier and register, regenerating on collision.
async fn register_client(state: &AppState) -> Option<(ClientKey, mpsc::Receiver<String>)> {
    for _ in 0..MAX_ID_ATTEMPTS {
        let (client, queue) = Client::new(Uuid::new_v4().to_string(), state.config.queue_capacity);
        match state.hub.register(client).await {
            Ok(key) => return Some((key, queue)),
            Err(e) => warn!(error = %e, "ws: client id collision, regenerating"),
        }
    }
    None
}

// =============================================================================
// READ LOOP
// =============================================================================

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    state: &AppState,
    client_id: &str,
    writer: &mut JoinHandle<()>,
) -> ReadEnd {
    let pong_wait = state.config.pong_wait;
    loop {
        let next = tokio::select! {
            _ = &mut *writer => return ReadEnd::WriterGone,
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        let msg = match next {
            Err(_) => {
                info!(%client_id, "ws: read deadline expired");
                return ReadEnd::Deadline;
            }
            Ok(None) => return ReadEnd::Closed,
            Ok(Some(Err(e))) => {
                warn!(%client_id, error = %e, "ws: read failed");
                return ReadEnd::Error;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => {
                relay_frame(&state.hub, client_id, text.as_str()).await;
            }
            Message::Binary(bytes) => match std::str::from_utf8(&bytes) {
                Ok(text) => {
                    relay_frame(&state.hub, client_id, text).await;
                }
                Err(_) => warn!(%client_id, len = bytes.len(), "ws: non-utf8 binary frame discarded"),
            },
            Message::Pong(_) => debug!(%client_id, "ws: pong received"),
            Message::Ping(_) => {}
            Message::Close(_) => return ReadEnd::Closed,
        }
    }
}

/// Decode one inbound frame and route it untouched to its addressee.
///
/// Returns `None` when the frame is not a valid envelope; the frame is
/// dropped and the connection stays open.
async fn relay_frame(hub: &Hub, client_id: &str, raw: &str) -> Option<RouteOutcome> {
    let envelope = match frames::decode_envelope(raw) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            return None;
        }
    };
    debug!(%client_id, to = %envelope.id, len = envelope.message.len(), "ws: recv frame");
    Some(hub.route(&envelope.id, raw.to_owned()).await)
}

// =============================================================================
// WRITE LOOP
// =============================================================================

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<String>,
    client_id: String,
    config: Arc<RelayConfig>,
) {
    let mut keepalive = tokio::time::interval_at(Instant::now() + config.ping_period, config.ping_period);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = queue.recv() => {
                let Some(frame) = frame else {
                    debug!(%client_id, "ws: outbound queue closed");
                    let _ = send_with_deadline(&mut sink, Message::Close(None), config.write_wait).await;
                    break;
                };
                if let Err(e) = send_with_deadline(&mut sink, Message::Text(frame.into()), config.write_wait).await {
                    warn!(%client_id, error = %e, "ws: write failed");
                    break;
                }
            }
            _ = keepalive.tick() => {
                debug!(%client_id, "ws: sending ping");
                if let Err(e) = send_with_deadline(&mut sink, Message::Ping(Bytes::new()), config.write_wait).await {
                    warn!(%client_id, error = %e, "ws: ping failed");
                    break;
                }
            }
        }
    }

    let _ = tokio::time::timeout(config.write_wait, sink.close()).await;
}

async fn send_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    msg: Message,
    wait: Duration,
) -> Result<(), WriteError> {
    tokio::time::timeout(wait, sink.send(msg))
        .await
        .map_err(|_| WriteError::Deadline)??;
    Ok(())
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
