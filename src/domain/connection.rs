//! Handle to one live evaluator connection.
//!
//! The socket itself is owned by the connection's reader and writer tasks
//! (see [`crate::ws::connection`]). Everything else talks to it through a
//! [`Connection`]: frames are queued on a bounded outbound channel, and
//! eviction is requested through a shutdown signal that the reader task
//! watches.

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use super::conversation::ConversationTable;
use crate::error::BrokerError;
use crate::protocol::{Envelope, encode};

/// Item queued for the connection's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// An encoded envelope to send as a text frame.
    Frame(String),
    /// Send a close frame and stop writing.
    Close,
}

/// Shared handle to a live evaluator connection.
#[derive(Debug)]
pub struct Connection {
    id: Uuid,
    outbound: mpsc::Sender<Outbound>,
    conversations: ConversationTable,
    shutdown: watch::Sender<bool>,
}

impl Connection {
    /// Creates a handle that writes through `outbound`.
    #[must_use]
    pub fn new(outbound: mpsc::Sender<Outbound>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            outbound,
            conversations: ConversationTable::new(),
            shutdown,
        }
    }

    /// Unique id of this physical connection, used in logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Outstanding conversations multiplexed over this connection.
    #[must_use]
    pub const fn conversations(&self) -> &ConversationTable {
        &self.conversations
    }

    /// Encodes and queues an envelope for sending.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TransportClosed`] if the writer task has
    /// already stopped.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        self.outbound
            .send(Outbound::Frame(encode(envelope)))
            .await
            .map_err(|_| BrokerError::TransportClosed)
    }

    /// Queues an envelope without waiting for room.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::Backpressure`] if the outbound queue is full.
    /// - [`BrokerError::TransportClosed`] if the writer task has stopped.
    pub fn try_send(&self, envelope: &Envelope) -> Result<(), BrokerError> {
        self.outbound
            .try_send(Outbound::Frame(encode(envelope)))
            .map_err(|e| match e {
                TrySendError::Full(_) => BrokerError::Backpressure,
                TrySendError::Closed(_) => BrokerError::TransportClosed,
            })
    }

    /// Asks the writer task to send a close frame and stop.
    ///
    /// Returns `false` if the request could not be queued; the caller
    /// must then stop the writer itself.
    pub fn close_transport(&self) -> bool {
        self.outbound.try_send(Outbound::Close).is_ok()
    }

    /// Asks the reader task to tear the transport down.
    ///
    /// The reader's normal disconnect path then unregisters the session
    /// and resolves outstanding conversations.
    pub fn evict(&self) {
        self.shutdown.send_replace(true);
    }

    /// Returns `true` once [`Connection::evict`] has been called.
    #[must_use]
    pub fn is_evicted(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Receiver that flips to `true` on eviction.
    #[must_use]
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }
}
