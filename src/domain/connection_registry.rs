//! Session registry: secret key → live connection.
//!
//! [`ConnectionRegistry`] enforces that at most one connection is bound
//! to a key. Every operation takes the single registry lock, and none of
//! them performs I/O while holding it: eviction only flips the target
//! connection's shutdown signal.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use super::SessionKey;
use super::connection::Connection;
use crate::error::BrokerError;

/// Central store of live evaluator sessions.
///
/// # Concurrency
///
/// - Registration is atomic: of two connections racing for one key,
///   exactly one wins.
/// - Lookups hand out `Arc<Connection>` clones; callers never hold the
///   registry lock while talking to a connection.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    sessions: Mutex<HashMap<SessionKey, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `key` to `connection`.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::SessionTaken`] if the key is already bound;
    /// the existing binding is left untouched.
    pub async fn register(
        &self,
        key: SessionKey,
        connection: Arc<Connection>,
    ) -> Result<(), BrokerError> {
        let mut map = self.sessions.lock().await;
        if map.contains_key(&key) {
            return Err(BrokerError::SessionTaken);
        }
        map.insert(key, connection);
        Ok(())
    }

    /// Removes the binding for `key`. Idempotent.
    ///
    /// Returns the connection that was bound, if any.
    pub async fn unregister(&self, key: &SessionKey) -> Option<Arc<Connection>> {
        self.sessions.lock().await.remove(key)
    }

    /// Returns the connection bound to `key`.
    pub async fn lookup(&self, key: &SessionKey) -> Option<Arc<Connection>> {
        self.sessions.lock().await.get(key).cloned()
    }

    /// Forcibly terminates the session bound to `key`.
    ///
    /// The connection's own disconnect path performs the unregistration.
    /// Returns `true` if a session was bound.
    pub async fn evict(&self, key: &SessionKey) -> bool {
        let connection = self.lookup(key).await;
        match connection {
            Some(conn) => {
                tracing::info!(conn_id = %conn.id(), key = %key, "evicting session");
                conn.evict();
                true
            }
            None => false,
        }
    }

    /// Keys of all live sessions.
    pub async fn keys(&self) -> Vec<SessionKey> {
        self.sessions.lock().await.keys().cloned().collect()
    }

    /// Returns the number of live sessions.
    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Returns `true` if no session is live.
    pub async fn is_empty(&self) -> bool {
        self.sessions.lock().await.is_empty()
    }
}
