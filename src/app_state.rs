//! Shared application state injected into all Axum handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::ConnectionRegistry;
use crate::service::EvalService;
use crate::store::LanguageStore;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Front-end service for evaluations and key management.
    pub eval_service: Arc<EvalService>,
    /// Live evaluator sessions.
    pub registry: Arc<ConnectionRegistry>,
    /// Language and key store.
    pub store: Arc<LanguageStore>,
    /// Capacity of each connection's outbound frame queue.
    pub outbound_buffer: usize,
}

impl AppState {
    /// Wires the registry, store, and service together.
    #[must_use]
    pub fn new(store: Arc<LanguageStore>, eval_timeout: Duration, outbound_buffer: usize) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let eval_service = Arc::new(EvalService::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            eval_timeout,
        ));
        Self {
            eval_service,
            registry,
            store,
            outbound_buffer,
        }
    }
}
