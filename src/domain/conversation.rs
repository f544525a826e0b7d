//! Per-connection conversation multiplexing.
//!
//! A [`ConversationTable`] maps correlation ids to single-use reply slots
//! so that many request/response exchanges can share one physical
//! connection. A [`Conversation`] is the caller's handle on one slot; the
//! slot is released when the handle is closed or dropped, whichever path
//! the caller takes out of the exchange.
//!
//! # Locking
//!
//! The table is guarded by a synchronous [`parking_lot::Mutex`] so that
//! `Drop` can release a slot. The lock only ever covers map updates:
//! waking a waiter and every send happen after it is released.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::ConversationId;
use super::connection::Connection;
use crate::error::BrokerError;
use crate::protocol::{Envelope, ServerBody};

/// What a waiting conversation gets woken with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// The evaluator replied under this conversation's id.
    Reply(Envelope),
    /// The connection went away before a reply arrived.
    Disconnected,
}

#[derive(Debug, Default)]
struct TableState {
    slots: HashMap<ConversationId, oneshot::Sender<Delivery>>,
    closed: bool,
}

/// Correlation id → pending reply slot, for one connection.
#[derive(Debug, Default)]
pub struct ConversationTable {
    state: Mutex<TableState>,
}

impl ConversationTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mints a fresh id and registers a reply slot for it.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportClosed`] once the owning connection
    /// has disconnected.
    pub fn open(&self) -> Result<(ConversationId, oneshot::Receiver<Delivery>), BrokerError> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock();
        if state.closed {
            return Err(BrokerError::TransportClosed);
        }
        let mut id = ConversationId::new();
        while state.slots.contains_key(&id) {
            id = ConversationId::new();
        }
        state.slots.insert(id.clone(), tx);
        Ok((id, rx))
    }

    /// Delivers an evaluator message to the conversation named by its id.
    ///
    /// The slot is consumed: a second message under the same id is
    /// unmatched.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::UnknownConversation`] if no open
    /// conversation has that id, or its waiter is already gone.
    pub fn route(&self, envelope: Envelope) -> Result<(), BrokerError> {
        let slot = self.state.lock().slots.remove(envelope.id.as_str());
        let Some(tx) = slot else {
            return Err(BrokerError::UnknownConversation);
        };
        tx.send(Delivery::Reply(envelope))
            .map_err(|_| BrokerError::UnknownConversation)
    }

    /// Releases a slot. Returns `true` if it was still open.
    pub fn close(&self, id: &str) -> bool {
        self.state.lock().slots.remove(id).is_some()
    }

    /// Resolves every open slot with [`Delivery::Disconnected`] and
    /// refuses further [`ConversationTable::open`] calls.
    ///
    /// Returns the number of conversations resolved.
    pub fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.closed = true;
            state.slots.drain().map(|(_, tx)| tx).collect()
        };
        let count = drained.len();
        for tx in drained {
            let _ = tx.send(Delivery::Disconnected);
        }
        count
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, id: &str) -> bool {
        self.state.lock().slots.contains_key(id)
    }

    /// Number of open conversations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    /// Returns `true` if no conversation is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }
}

/// Caller-side handle on one exchange with an evaluator.
///
/// Opening registers the reply slot; dropping (or [`Conversation::close`])
/// releases it, so no slot outlives its conversation regardless of
/// whether the exchange succeeded, timed out, or failed.
#[derive(Debug)]
pub struct Conversation {
    connection: Arc<Connection>,
    id: ConversationId,
    inbox: Option<oneshot::Receiver<Delivery>>,
    opened_at: Instant,
}

impl Conversation {
    /// Opens a conversation on `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportClosed`] if the connection has
    /// already disconnected.
    pub fn open(connection: Arc<Connection>) -> Result<Self, BrokerError> {
        let (id, inbox) = connection.conversations().open()?;
        tracing::debug!(conn_id = %connection.id(), conversation_id = %id, "conversation opened");
        Ok(Self {
            connection,
            id,
            inbox: Some(inbox),
            opened_at: Instant::now(),
        })
    }

    /// Correlation id of this conversation.
    #[must_use]
    pub const fn id(&self) -> &ConversationId {
        &self.id
    }

    /// Sends a broker message to the evaluator under this conversation's id.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportClosed`] if the connection is gone.
    pub async fn send(&self, body: ServerBody) -> Result<(), BrokerError> {
        self.connection
            .send(&Envelope::server(self.id.as_str(), body))
            .await
    }

    /// Queues a broker message, giving up at `deadline`.
    ///
    /// A stalled evaluator fills the connection's outbound queue; this
    /// keeps the caller's deadline binding while waiting for room.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::RemoteTimeout`] if the queue stays full until the
    ///   deadline. The slot is released and no notice is sent.
    /// - [`BrokerError::TransportClosed`] if the connection is gone.
    pub async fn send_until(&self, body: ServerBody, deadline: Instant) -> Result<(), BrokerError> {
        match tokio::time::timeout_at(deadline, self.send(body)).await {
            Ok(sent) => sent,
            Err(_elapsed) => {
                self.connection.conversations().close(self.id.as_str());
                tracing::debug!(conversation_id = %self.id, "outbound queue full until deadline");
                Err(self.timed_out())
            }
        }
    }

    /// Waits for the evaluator's reply until `deadline`.
    ///
    /// On expiry the slot is released before a best-effort `TIMEOUT`
    /// notice is queued, so a late reply is treated as unmatched. The
    /// notice is dropped if the outbound queue is full.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::RemoteTimeout`] if the deadline passes first.
    /// - [`BrokerError::TransportClosed`] if the connection drops.
    /// - [`BrokerError::Internal`] if the reply was already awaited.
    pub async fn await_reply(&mut self, deadline: Instant) -> Result<Envelope, BrokerError> {
        let Some(mut inbox) = self.inbox.take() else {
            return Err(BrokerError::Internal(
                "conversation reply already consumed".to_string(),
            ));
        };
        match tokio::time::timeout_at(deadline, &mut inbox).await {
            Ok(Ok(Delivery::Reply(envelope))) => Ok(envelope),
            Ok(Ok(Delivery::Disconnected) | Err(_)) => Err(BrokerError::TransportClosed),
            Err(_elapsed) => {
                self.connection.conversations().close(self.id.as_str());
                // A reply routed between expiry and the close above still counts.
                if let Ok(Delivery::Reply(envelope)) = inbox.try_recv() {
                    return Ok(envelope);
                }
                let notice = Envelope::server(self.id.as_str(), ServerBody::Timeout);
                if let Err(e) = self.connection.try_send(&notice) {
                    tracing::debug!(conversation_id = %self.id, error = %e, "timeout notice not sent");
                }
                Err(self.timed_out())
            }
        }
    }

    fn timed_out(&self) -> BrokerError {
        let waited = Instant::now().saturating_duration_since(self.opened_at);
        BrokerError::RemoteTimeout {
            waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Ends the conversation and releases its slot.
    pub fn close(self) {}
}

impl Drop for Conversation {
    fn drop(&mut self) {
        if self.connection.conversations().close(self.id.as_str()) {
            tracing::trace!(conversation_id = %self.id, "conversation slot released");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::domain::SessionKey;
    use crate::domain::connection::Outbound;
    use crate::protocol::{ClientBody, EvalResult, decode};

    fn connection() -> (Arc<Connection>, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(16);
        (Arc::new(Connection::new(tx)), rx)
    }

    fn reply(id: &str, stdout: &str) -> Envelope {
        Envelope::client(
            id,
            SessionKey::from("k"),
            ClientBody::Result(EvalResult::Success {
                exit_code: None,
                stdout: Some(stdout.to_string()),
                stderr: None,
            }),
        )
    }

    #[test]
    fn open_mints_distinct_ids() {
        let table = ConversationTable::new();
        let Ok((a, _rx_a)) = table.open() else {
            panic!("open failed");
        };
        let Ok((b, _rx_b)) = table.open() else {
            panic!("open failed");
        };
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn route_wakes_matching_waiter_once() {
        let table = ConversationTable::new();
        let Ok((id, rx)) = table.open() else {
            panic!("open failed");
        };
        assert!(table.route(reply(id.as_str(), "hi")).is_ok());
        assert!(table.is_empty());

        let Ok(Delivery::Reply(env)) = rx.await else {
            panic!("expected reply");
        };
        assert_eq!(env.id, id.as_str());

        // The slot is spent; a duplicate reply is unmatched.
        let again = table.route(reply(id.as_str(), "hi"));
        assert!(matches!(again, Err(BrokerError::UnknownConversation)));
    }

    #[test]
    fn route_unknown_id_is_rejected() {
        let table = ConversationTable::new();
        let result = table.route(reply("nope", "x"));
        assert!(matches!(result, Err(BrokerError::UnknownConversation)));
    }

    #[test]
    fn close_is_idempotent() {
        let table = ConversationTable::new();
        let Ok((id, _rx)) = table.open() else {
            panic!("open failed");
        };
        assert!(table.close(id.as_str()));
        assert!(!table.close(id.as_str()));
        assert!(!table.contains(id.as_str()));
    }

    #[tokio::test]
    async fn close_all_signals_disconnect_and_refuses_new() {
        let table = ConversationTable::new();
        let Ok((_, rx1)) = table.open() else {
            panic!("open failed");
        };
        let Ok((_, rx2)) = table.open() else {
            panic!("open failed");
        };
        assert_eq!(table.close_all(), 2);
        assert_eq!(rx1.await, Ok(Delivery::Disconnected));
        assert_eq!(rx2.await, Ok(Delivery::Disconnected));
        assert!(matches!(table.open(), Err(BrokerError::TransportClosed)));
    }

    #[tokio::test]
    async fn send_then_reply_before_deadline() {
        let (conn, mut out) = connection();
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        let sent = convo
            .send(ServerBody::Evaluate {
                code: "print('hi')".to_string(),
            })
            .await;
        assert!(sent.is_ok());

        let Some(Outbound::Frame(text)) = out.recv().await else {
            panic!("expected outbound frame");
        };
        let Ok(request) = decode(&text) else {
            panic!("outbound frame does not decode");
        };
        assert_eq!(request.id, convo.id().as_str());
        assert!(conn.conversations().route(reply(&request.id, "hi")).is_ok());

        let deadline = Instant::now() + Duration::from_secs(5);
        let Ok(env) = convo.await_reply(deadline).await else {
            panic!("expected reply");
        };
        assert_eq!(env, reply(&request.id, "hi"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_releases_slot_and_notifies_evaluator() {
        let (conn, mut out) = connection();
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        let id = convo.id().to_string();

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = convo.await_reply(deadline).await;
        assert!(matches!(result, Err(BrokerError::RemoteTimeout { .. })));

        // Slot is gone before the TIMEOUT notice goes out.
        assert!(!conn.conversations().contains(&id));
        let Some(Outbound::Frame(text)) = out.recv().await else {
            panic!("expected timeout notice");
        };
        assert_eq!(decode(&text), Ok(Envelope::server(id.as_str(), ServerBody::Timeout)));

        // A late reply never reaches the caller.
        let late = conn.conversations().route(reply(&id, "late"));
        assert!(matches!(late, Err(BrokerError::UnknownConversation)));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_with_full_queue_skips_notice() {
        let (tx, mut out) = mpsc::channel(1);
        let conn = Arc::new(Connection::new(tx));
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        assert!(convo.send(ServerBody::Evaluate { code: "x".to_string() }).await.is_ok());

        let deadline = Instant::now() + Duration::from_millis(50);
        let result = convo.await_reply(deadline).await;
        assert!(matches!(result, Err(BrokerError::RemoteTimeout { .. })));
        assert!(conn.conversations().is_empty());

        // Only the request made it into the queue.
        let Some(Outbound::Frame(text)) = out.recv().await else {
            panic!("expected the request");
        };
        assert_eq!(decode(&text).map(|e| e.kind()), Ok("EVALUATE"));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn send_until_gives_up_on_full_queue() {
        let (tx, _out) = mpsc::channel(1);
        assert!(tx.try_send(Outbound::Frame("backlog".to_string())).is_ok());
        let conn = Arc::new(Connection::new(tx));
        let Ok(convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };

        let deadline = Instant::now() + Duration::from_millis(50);
        let sent = convo
            .send_until(ServerBody::Evaluate { code: "x".to_string() }, deadline)
            .await;
        assert!(matches!(sent, Err(BrokerError::RemoteTimeout { .. })));
        assert!(conn.conversations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reply_racing_the_deadline_is_kept() {
        let (conn, _out) = connection();
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        let id = convo.id().to_string();
        assert!(conn.conversations().route(reply(&id, "just in time")).is_ok());

        // A reply already delivered when the deadline passes wins.
        let deadline = Instant::now();
        tokio::time::advance(Duration::from_millis(10)).await;
        let Ok(env) = convo.await_reply(deadline).await else {
            panic!("reply was discarded");
        };
        assert_eq!(env, reply(&id, "just in time"));
    }

    #[tokio::test]
    async fn disconnect_resolves_waiter() {
        let (conn, _out) = connection();
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        conn.conversations().close_all();
        let result = convo.await_reply(Instant::now() + Duration::from_secs(5)).await;
        assert!(matches!(result, Err(BrokerError::TransportClosed)));
    }

    #[tokio::test]
    async fn drop_releases_slot() {
        let (conn, _out) = connection();
        let Ok(convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        assert_eq!(conn.conversations().len(), 1);
        drop(convo);
        assert!(conn.conversations().is_empty());
    }

    #[tokio::test]
    async fn second_await_is_an_error() {
        let (conn, _out) = connection();
        let Ok(mut convo) = Conversation::open(Arc::clone(&conn)) else {
            panic!("open failed");
        };
        let id = convo.id().to_string();
        assert!(conn.conversations().route(reply(&id, "x")).is_ok());
        let deadline = Instant::now() + Duration::from_secs(1);
        assert!(convo.await_reply(deadline).await.is_ok());
        assert!(matches!(
            convo.await_reply(deadline).await,
            Err(BrokerError::Internal(_))
        ));
    }
}
