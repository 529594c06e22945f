//! WebSocket bridge between a socket and its signaling worker.
//!
//! Each socket gets three tasks:
//! - reader: socket frames to the worker's inbound queue
//! - writer: the connection's outbound queue to the socket
//! - worker: [`SignalingHub::drive`](visionrtc_webrtc::SignalingHub::drive)
//!
//! The reader cancels the connection token when the socket closes, which
//! aborts any in-flight negotiation.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};
use visionrtc_webrtc::ServerMessage;

use crate::state::AppState;

/// Handle a single WebSocket connection until either side goes away.
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerMessage>(state.channel_capacity);
    let (inbound_tx, inbound_rx) = mpsc::channel::<Bytes>(state.channel_capacity);

    let hub = Arc::clone(&state.hub);
    let conn = hub.on_connect(outbound_tx);
    let client_id = conn.id();
    let token = conn.cancellation_token();

    // Shutdown closes every socket
    let shutdown = state.shutdown.clone();
    let conn_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => conn_token.cancel(),
            _ = conn_token.cancelled() => {}
        }
    });

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let text = match message.to_json() {
                Ok(text) => text,
                Err(e) => {
                    error!(client_id = %client_id, "Failed to encode message: {}", e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                debug!(client_id = %client_id, "Socket closed while sending");
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    let reader_token = token.clone();
    let reader = tokio::spawn(async move {
        loop {
            let frame = tokio::select! {
                _ = reader_token.cancelled() => break,
                frame = ws_rx.next() => frame,
            };

            let raw = match frame {
                Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!(client_id = %client_id, "WebSocket receive error: {}", e);
                    break;
                }
            };

            if inbound_tx.send(raw).await.is_err() {
                break;
            }
        }
        reader_token.cancel();
    });

    hub.drive(conn, inbound_rx).await;

    reader.abort();
    // The outbound sender was dropped with the connection; the writer
    // flushes what is queued and closes the socket.
    if let Err(e) = writer.await {
        warn!(client_id = %client_id, "Writer task failed: {}", e);
    }
    debug!(client_id = %client_id, "WebSocket connection finished");
}
