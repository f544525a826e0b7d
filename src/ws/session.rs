//! Per-connection broker state machine.
//!
//! ```text
//! UNAUTHENTICATED ──REGISTER ok──▶ REGISTERED
//!        │                             │
//!        └──────── transport close ────┴──▶ CLOSED
//! ```
//!
//! [`BrokerSession`] consumes decoded frames one at a time, in receipt
//! order, and returns the reply (if any) to send on the same connection.
//! Protocol, auth, and state errors become `INVALID` replies; none of
//! them ends the session.

use std::sync::Arc;

use crate::domain::{Connection, ConnectionRegistry, SessionKey};
use crate::error::BrokerError;
use crate::protocol::{ClientBody, Envelope, Payload, ServerBody, Side, decode};
use crate::store::SessionStore;

/// Lifecycle state of one evaluator connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Connected, no valid `REGISTER` yet.
    Unauthenticated,
    /// Bound to the given key in the registry.
    Registered(SessionKey),
    /// Transport gone; terminal.
    Closed,
}

/// Broker side of one evaluator connection.
#[derive(Debug)]
pub struct BrokerSession {
    connection: Arc<Connection>,
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn SessionStore>,
    state: SessionState,
}

impl BrokerSession {
    /// Creates an unauthenticated session for `connection`.
    #[must_use]
    pub fn new(
        connection: Arc<Connection>,
        registry: Arc<ConnectionRegistry>,
        store: Arc<dyn SessionStore>,
    ) -> Self {
        Self {
            connection,
            registry,
            store,
            state: SessionState::Unauthenticated,
        }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Handles one inbound text frame and returns the reply to send.
    pub async fn handle_frame(&mut self, raw: &str) -> Option<Envelope> {
        if self.state == SessionState::Closed {
            return None;
        }
        let envelope = match decode(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(
                    conn_id = %self.connection.id(),
                    field = e.reason().field(),
                    error = %e,
                    "rejecting undecodable frame"
                );
                return Some(Envelope::invalid(
                    e.correlation_id().unwrap_or_default(),
                    e.to_string(),
                ));
            }
        };
        let id = envelope.id.clone();
        match self.dispatch(envelope).await {
            Ok(reply) => reply,
            Err(e) if e.is_recoverable_in_session() => {
                tracing::debug!(
                    conn_id = %self.connection.id(),
                    conversation_id = %id,
                    category = ?e.category(),
                    error = %e,
                    "rejecting frame"
                );
                Some(Envelope::invalid(id, e.to_string()))
            }
            Err(e) => {
                tracing::warn!(
                    conn_id = %self.connection.id(),
                    conversation_id = %id,
                    category = ?e.category(),
                    error = %e,
                    "frame handling failed"
                );
                Some(Envelope::invalid(id, e.to_string()))
            }
        }
    }

    async fn dispatch(&mut self, envelope: Envelope) -> Result<Option<Envelope>, BrokerError> {
        let (key, is_register) = match &envelope.payload {
            Payload::Server(_) => return Err(BrokerError::UnexpectedSide(Side::Server)),
            Payload::Client { key, body } => (key, matches!(body, ClientBody::Register)),
        };
        let registered = match self.state {
            SessionState::Unauthenticated => false,
            SessionState::Registered(_) => true,
            SessionState::Closed => return Ok(None),
        };
        match (registered, is_register) {
            (false, true) => {
                self.register(key.clone()).await?;
                Ok(Some(Envelope::server(envelope.id, ServerBody::ServerOk)))
            }
            (false, false) => Err(BrokerError::NotRegistered),
            (true, true) => Err(BrokerError::AlreadyRegistered),
            (true, false) => {
                self.connection.conversations().route(envelope)?;
                Ok(None)
            }
        }
    }

    async fn register(&mut self, key: SessionKey) -> Result<(), BrokerError> {
        if !self.store.validate_key(&key) {
            return Err(BrokerError::InvalidKey);
        }
        self.registry
            .register(key.clone(), Arc::clone(&self.connection))
            .await?;
        let language = self.store.find_by_key(&key).map(|lang| lang.name);
        tracing::info!(
            conn_id = %self.connection.id(),
            language = language.as_deref().unwrap_or("<unknown>"),
            "evaluator registered"
        );
        self.state = SessionState::Registered(key);
        Ok(())
    }

    /// Runs the disconnect path: unregisters the session and resolves
    /// every open conversation with a disconnect signal. Idempotent.
    pub async fn close(&mut self) {
        let previous = std::mem::replace(&mut self.state, SessionState::Closed);
        if let SessionState::Registered(key) = previous {
            self.registry.unregister(&key).await;
        }
        let resolved = self.connection.conversations().close_all();
        if resolved > 0 {
            tracing::info!(
                conn_id = %self.connection.id(),
                conversations = resolved,
                "resolved open conversations on disconnect"
            );
        }
    }
}
