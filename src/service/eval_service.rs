//! Evaluation service: the front-end caller of the broker.
//!
//! [`EvalService`] resolves a language to its live session, runs one
//! conversation per evaluation, and owns the caller-side timeout. It
//! also issues evaluator keys, evicting the session bound to a key that
//! a new registration replaced.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::domain::{Conversation, ConnectionRegistry, SessionKey};
use crate::error::BrokerError;
use crate::protocol::{ClientBody, Envelope, EvalResult, Payload, ServerBody};
use crate::store::{Language, LanguageStore, SessionStore};

/// Result of a completed evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Primary name of the language that ran the code.
    pub language: String,
    /// What the evaluator reported.
    pub result: EvalResult,
    /// Time between sending the request and receiving the reply.
    pub elapsed: Duration,
}

/// Outcome of [`EvalService::issue_key`].
#[derive(Debug, Clone)]
pub struct IssuedKey {
    /// The newly registered language, carrying the fresh key.
    pub language: Language,
    /// The owner's previous language, whose key is now invalid.
    pub replaced: Option<Language>,
    /// Whether a live session on the replaced key was evicted.
    pub evicted: bool,
}

/// A language with a live evaluator session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    /// Owner of the language.
    pub owner_id: u64,
    /// Primary name.
    pub name: String,
    /// Short name.
    pub short: String,
}

/// Orchestrates evaluations and key management on top of the broker.
#[derive(Debug, Clone)]
pub struct EvalService {
    registry: Arc<ConnectionRegistry>,
    store: Arc<LanguageStore>,
    eval_timeout: Duration,
}

impl EvalService {
    /// Creates a new `EvalService`.
    #[must_use]
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        store: Arc<LanguageStore>,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            store,
            eval_timeout,
        }
    }

    /// Returns a reference to the inner [`ConnectionRegistry`].
    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Returns a reference to the inner [`LanguageStore`].
    #[must_use]
    pub fn store(&self) -> &Arc<LanguageStore> {
        &self.store
    }

    /// Opens a conversation with the session bound to `key`, if any.
    pub async fn open_conversation(&self, key: &SessionKey) -> Option<Conversation> {
        let connection = self.registry.lookup(key).await?;
        Conversation::open(connection).ok()
    }

    /// Evaluates `code` on the evaluator of `language`.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::LanguageNotFound`] if no language answers to the name.
    /// - [`BrokerError::SessionOffline`] if its evaluator is not connected.
    /// - [`BrokerError::RemoteTimeout`] if no reply arrives in time, or
    ///   the evaluator stopped reading and the request cannot be queued.
    /// - [`BrokerError::TransportClosed`] if the evaluator disconnects.
    /// - [`BrokerError::RemoteFailure`] if the evaluator answers `ERROR`.
    /// - [`BrokerError::UnexpectedReply`] for any other reply kind.
    pub async fn evaluate(&self, language: &str, code: String) -> Result<Evaluation, BrokerError> {
        let lang = self
            .store
            .find_language(language)
            .ok_or_else(|| BrokerError::LanguageNotFound(language.to_owned()))?;
        let mut convo = self
            .open_conversation(&lang.key)
            .await
            .ok_or_else(|| BrokerError::SessionOffline(lang.name.clone()))?;

        let started = Instant::now();
        let deadline = started + self.eval_timeout;
        let reply = match convo.send_until(ServerBody::Evaluate { code }, deadline).await {
            Ok(()) => convo.await_reply(deadline).await,
            Err(e) => Err(e),
        };
        let conversation_id = convo.id().to_string();
        convo.close();

        let reply = reply.inspect_err(|e| {
            tracing::warn!(language = %lang.name, %conversation_id, error = %e, "evaluation failed");
        })?;
        let result = into_eval_result(reply)?;
        let elapsed = started.elapsed();
        tracing::info!(
            language = %lang.name,
            %conversation_id,
            success = result.is_success(),
            elapsed_ms = elapsed.as_millis(),
            "evaluation finished"
        );
        Ok(Evaluation {
            language: lang.name,
            result,
            elapsed,
        })
    }

    /// Mints a key for the owner's language, replacing any previous one.
    ///
    /// A live session on the replaced key is evicted.
    ///
    /// # Errors
    ///
    /// - [`BrokerError::InvalidRequest`] if a name is not a valid identifier.
    /// - [`BrokerError::Registration`] if another owner uses the name.
    /// - [`BrokerError::Persistence`] if the store cannot be saved.
    /// - [`BrokerError::Internal`] if the blocking store task panics.
    pub async fn issue_key(
        &self,
        owner_id: u64,
        name: &str,
        short: Option<&str>,
    ) -> Result<IssuedKey, BrokerError> {
        let language = Language::new(owner_id, name, short, SessionKey::generate())?;
        let store = Arc::clone(&self.store);
        let record = language.clone();
        let replaced = tokio::task::spawn_blocking(move || store.register_language(record))
            .await
            .map_err(|e| BrokerError::Internal(format!("store task failed: {e}")))??;
        let evicted = match &replaced {
            Some(old) => self.registry.evict(&old.key).await,
            None => false,
        };
        tracing::info!(
            owner_id,
            language = %language.name,
            replaced = replaced.is_some(),
            evicted,
            "evaluator key issued"
        );
        Ok(IssuedKey {
            language,
            replaced,
            evicted,
        })
    }

    /// Evicts the live session of `language`.
    ///
    /// Returns `false` if the language exists but is offline.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::LanguageNotFound`] if no language answers to
    /// the name.
    pub async fn evict_language(&self, language: &str) -> Result<bool, BrokerError> {
        let lang = self
            .store
            .find_language(language)
            .ok_or_else(|| BrokerError::LanguageNotFound(language.to_owned()))?;
        Ok(self.registry.evict(&lang.key).await)
    }

    /// Languages whose evaluator is currently connected.
    pub async fn live_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .registry
            .keys()
            .await
            .iter()
            .filter_map(|key| self.store.find_by_key(key))
            .map(|lang| SessionInfo {
                owner_id: lang.owner_id,
                name: lang.name,
                short: lang.short,
            })
            .collect();
        sessions.sort_by(|a, b| a.name.cmp(&b.name));
        sessions
    }
}

/// Interprets an evaluator's reply to `EVALUATE`.
fn into_eval_result(reply: Envelope) -> Result<EvalResult, BrokerError> {
    let kind = reply.kind();
    match reply.payload {
        Payload::Client {
            body: ClientBody::Result(result),
            ..
        } => Ok(result),
        Payload::Client {
            body: ClientBody::Error { error },
            ..
        } => Err(BrokerError::RemoteFailure(error)),
        _ => Err(BrokerError::UnexpectedReply(kind)),
    }
}
