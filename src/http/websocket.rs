//! WebSocket transport for the Model Context Protocol
//!
//! Each upgraded connection runs a send loop (unit → socket) and a receive loop
//! (socket → unit). The processing unit decides what is sent; this module only moves
//! frames and reports how the connection ended.

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, warn};

use crate::{
    http::handlers::WEBSOCKET_ENDPOINT,
    session::{ConnectionId, Outbound, UnitHandle, CLOSE_ABNORMAL},
    AppState,
};

/// Close code used when the peer sent a close frame without a status.
const CLOSE_NO_STATUS: u16 = 1005;

pub async fn websocket_endpoint(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade,
        Err(rejection) => {
            debug!(reason = %rejection, "websocket endpoint called without upgrade");
            return upgrade_required();
        }
    };

    let unit = state.unit();
    let connection = state.units.next_connection_id();
    let buffer = state.session_buffer;
    upgrade.on_upgrade(move |socket| run_session(socket, unit, connection, buffer))
}

fn upgrade_required() -> Response {
    (
        StatusCode::UPGRADE_REQUIRED,
        [(header::UPGRADE, "websocket")],
        Json(json!({
            "error": "Expected WebSocket upgrade",
            "upgrade": "websocket",
            "endpoint": WEBSOCKET_ENDPOINT,
        })),
    )
        .into_response()
}

async fn run_session(socket: WebSocket, unit: UnitHandle, connection: ConnectionId, buffer: usize) {
    let (ws_sender, ws_receiver) = socket.split();
    let (tx, rx) = mpsc::channel(buffer);

    if let Err(err) = unit.accept(connection, tx).await {
        warn!(connection = %connection, error = %err, "could not register socket session");
        return;
    }

    let send_handle = tokio::spawn(send_loop(ws_sender, rx, connection));
    recv_loop(ws_receiver, &unit, connection, send_handle).await;
    debug!(connection = %connection, "socket session ended");
}

async fn send_loop<S>(mut ws_sender: S, mut rx: mpsc::Receiver<Outbound>, connection: ConnectionId)
where
    S: Sink<Message> + Unpin,
    S::Error: std::fmt::Display,
{
    loop {
        let Some(frame) = rx.recv().await else {
            // Dropped by the unit after a peer close; answer it.
            let _ = ws_sender.send(Message::Close(None)).await;
            break;
        };
        let (message, closing) = match frame {
            Outbound::Text(text) => (Message::Text(text.into()), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: reason.into(),
                })),
                true,
            ),
        };

        if let Err(err) = ws_sender.send(message).await {
            debug!(connection = %connection, error = %err, "send failed, closing");
            break;
        }
        if closing {
            break;
        }
    }
}

async fn recv_loop<R>(
    mut ws_receiver: R,
    unit: &UnitHandle,
    connection: ConnectionId,
    mut send_handle: JoinHandle<()>,
) where
    R: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let mut send_finished = false;

    loop {
        let frame = tokio::select! {
            _ = &mut send_handle => {
                // Nothing more can be written; release the connection in the unit.
                send_finished = true;
                let _ = unit.close(connection, CLOSE_ABNORMAL, "send loop ended").await;
                break;
            }
            frame = ws_receiver.next() => frame,
        };

        let delivered = match frame {
            None => {
                let _ = unit
                    .close(connection, CLOSE_ABNORMAL, "connection dropped")
                    .await;
                break;
            }
            Some(Err(err)) => {
                let _ = unit.fault(connection, err.to_string()).await;
                break;
            }
            Some(Ok(Message::Text(text))) => unit.deliver(connection, text.as_str().to_owned()).await,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => unit.deliver(connection, text).await,
                Err(_) => {
                    let _ = unit
                        .fault(connection, "binary frame is not valid UTF-8")
                        .await;
                    break;
                }
            },
            Some(Ok(Message::Close(frame))) => {
                let (code, reason) = frame
                    .map(|frame| (frame.code, frame.reason.as_str().to_owned()))
                    .unwrap_or((CLOSE_NO_STATUS, String::new()));
                let _ = unit.close(connection, code, reason).await;
                break;
            }
            // Ping/pong are answered by axum.
            Some(Ok(_)) => Ok(()),
        };

        if let Err(err) = delivered {
            warn!(connection = %connection, error = %err, "processing unit rejected frame");
            break;
        }
    }

    if !send_finished {
        let _ = send_handle.await;
    }
}
