//! WebSocket connection read/write loops.
//!
//! Each evaluator socket gets one reader loop (this task) feeding a
//! [`BrokerSession`] and one writer task draining the connection's
//! outbound queue into the socket sink. Callers never touch the socket:
//! they queue frames through the shared [`Connection`] handle.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use super::session::BrokerSession;
use crate::domain::{Connection, ConnectionRegistry, Outbound};
use crate::protocol::Envelope;
use crate::store::SessionStore;

/// How long the writer may keep flushing after the reader stops.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Why the reader loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Peer,
    Error,
    Evicted,
    WriterGone,
}

impl CloseReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Peer => "peer closed",
            Self::Error => "read error",
            Self::Evicted => "evicted",
            Self::WriterGone => "writer stopped",
        }
    }
}

/// Runs the broker loop for a single evaluator WebSocket.
///
/// - Frames are handled strictly in receipt order.
/// - Eviction through the registry stops the loop and closes the socket,
///   even when the evaluator has stopped reading and replies are stuck.
/// - On exit the session is unregistered and its conversations resolved.
pub async fn run_connection(
    socket: WebSocket,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn SessionStore>,
    outbound_buffer: usize,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<Outbound>(outbound_buffer.max(1));
    let connection = Arc::new(Connection::new(out_tx));
    let conn_id = connection.id();
    let mut shutdown = connection.shutdown_signal();
    let mut session = BrokerSession::new(Arc::clone(&connection), registry, store);

    tracing::info!(%conn_id, "evaluator connected");

    let mut writer = tokio::spawn(async move {
        while let Some(item) = out_rx.recv().await {
            match item {
                Outbound::Frame(text) => {
                    if ws_tx.send(Message::text(text)).await.is_err() {
                        break;
                    }
                }
                Outbound::Close => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        let _ = ws_tx.close().await;
    });

    let reason = loop {
        tokio::select! {
            msg = ws_rx.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => session.handle_frame(text.as_str()).await,
                    Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                        Ok(text) => session.handle_frame(text).await,
                        Err(_) => Some(Envelope::invalid("", "binary frame is not valid UTF-8")),
                    },
                    Some(Ok(Message::Close(_))) | None => break CloseReason::Peer,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        tracing::warn!(%conn_id, error = %e, "websocket error");
                        break CloseReason::Error;
                    }
                };
                if let Some(reply) = reply {
                    tokio::select! {
                        sent = connection.send(&reply) => {
                            if sent.is_err() {
                                break CloseReason::WriterGone;
                            }
                        }
                        () = evicted(&mut shutdown) => break CloseReason::Evicted,
                    }
                }
            }
            () = evicted(&mut shutdown) => break CloseReason::Evicted,
        }
    };

    session.close().await;
    drop(ws_rx);
    if !connection.close_transport() {
        tracing::debug!(%conn_id, "outbound queue full at close");
    }
    drop(connection);
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        tracing::debug!(%conn_id, "writer stalled, aborting");
        writer.abort();
    }

    tracing::info!(%conn_id, reason = reason.as_str(), "evaluator disconnected");
}

/// Resolves once the connection is evicted.
async fn evicted(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|evicted| *evicted).await.is_err() {
        // The handle is gone, so nobody can evict; wait for the socket instead.
        std::future::pending::<()>().await;
    }
}
