//! WebSocket connection lifecycle: session registration, read/write loops.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use voxrelay_core::error::ErrorCode;
use voxrelay_core::protocol::{ClientMessage, ServerMessage};

use crate::state::GatewayState;

/// How long the writer gets to flush queued replies after the session ends.
const WRITER_DRAIN: Duration = Duration::from_secs(2);

/// Handle a new WebSocket connection bound to `session_id`.
pub async fn handle_ws_connection(state: Arc<GatewayState>, ws: WebSocket, session_id: String) {
    let (mut ws_tx, mut ws_rx) = ws.split();

    if !state.register(&session_id).await {
        warn!(session_id = %session_id, "Session id already connected, refusing");
        #[cfg(feature = "metrics")]
        crate::metrics::record_rejected("session_conflict");
        let refusal = ServerMessage::failure(
            ErrorCode::SessionConflict,
            "Session is already connected",
        );
        let _ = ws_tx.send(Message::Text(refusal.to_json().into())).await;
        let _ = ws_tx.send(Message::Close(None)).await;
        return;
    }

    info!(session_id = %session_id, "New WebSocket connection");
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_connect();

    let gateway = state.config.gateway();
    let (reply_tx, reply_rx) = mpsc::channel::<ServerMessage>(gateway.outbound_buffer.max(1));
    let session = state
        .orchestrator
        .open_session(session_id.clone(), reply_tx, &state.shutdown);

    let heartbeat = (gateway.heartbeat_interval_secs > 0)
        .then(|| Duration::from_secs(gateway.heartbeat_interval_secs));
    let mut send_task = spawn_writer(ws_tx, reply_rx, heartbeat, session_id.clone());

    // Main read loop; ends on client close, transport error, or once the
    // writer stops (session closed or socket gone).
    loop {
        let msg_result = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = &mut send_task => break,
        };
        let Some(msg_result) = msg_result else {
            debug!(session_id = %session_id, "Client disconnected");
            break;
        };

        match msg_result {
            Ok(Message::Binary(frame)) => {
                // Waits while the session inbox is full, so reading pauses too.
                if !session.submit_audio(frame.to_vec()).await {
                    break;
                }
            }
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(ClientMessage::Close) => {
                    debug!(session_id = %session_id, "Client requested close");
                    break;
                }
                Ok(ClientMessage::Reset) => {
                    if !session.reset().await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(session_id = %session_id, %e, "Ignoring unrecognized text frame");
                }
            },
            Ok(Message::Close(_)) => {
                debug!(session_id = %session_id, "Client sent close frame");
                break;
            }
            Ok(_) => {
                // Pings are answered by axum; pongs need no handling.
            }
            Err(e) => {
                warn!(session_id = %session_id, %e, "WebSocket error");
                break;
            }
        }
    }

    // Cancel in-flight work and wait for the session to release its history.
    session.shutdown().await;

    if !send_task.is_finished()
        && tokio::time::timeout(WRITER_DRAIN, &mut send_task).await.is_err()
    {
        send_task.abort();
    }

    let held = state.unregister(&session_id).await;
    #[cfg(feature = "metrics")]
    crate::metrics::record_ws_disconnect();
    info!(
        session_id = %session_id,
        connected_secs = held.map(|d| d.as_secs()).unwrap_or(0),
        "WebSocket connection closed"
    );
}

/// Forward session replies to the socket and send heartbeat pings.
///
/// Finishes with a close frame once the session drops its reply sender.
fn spawn_writer(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut reply_rx: mpsc::Receiver<ServerMessage>,
    heartbeat: Option<Duration>,
    session_id: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = heartbeat.map(|every| {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });
        if let Some(ticker) = ticker.as_mut() {
            // The first tick completes immediately.
            ticker.tick().await;
        }

        loop {
            let ping_due = async {
                match ticker.as_mut() {
                    Some(ticker) => {
                        ticker.tick().await;
                    }
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else { break };
                    if ws_tx.send(Message::Text(reply.to_json().into())).await.is_err() {
                        debug!(session_id = %session_id, "Socket closed while sending reply");
                        return;
                    }
                }
                _ = ping_due => {
                    if ws_tx.send(Message::Ping(bytes::Bytes::new())).await.is_err() {
                        debug!(session_id = %session_id, "Socket closed while sending ping");
                        return;
                    }
                }
            }
        }

        let _ = ws_tx.send(Message::Close(None)).await;
    })
}
