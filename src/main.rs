//! eval-broker server entry point.
//!
//! Starts the Axum HTTP server with REST and WebSocket endpoints.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use eval_broker::api;
use eval_broker::app_state::AppState;
use eval_broker::config::{BrokerConfig, LogFormat};
use eval_broker::store::LanguageStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config = BrokerConfig::from_env()?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
    tracing::info!(addr = %config.listen_addr, "starting eval-broker");

    // Build store
    let store = if config.store_persistence_enabled {
        LanguageStore::open(config.language_store_path.clone()).with_context(|| {
            format!(
                "opening language store at {}",
                config.language_store_path.display()
            )
        })?
    } else {
        tracing::warn!("store persistence disabled, languages are kept in memory");
        LanguageStore::in_memory()
    };

    // Build application state and router
    let app_state = AppState::new(
        Arc::new(store),
        config.eval_timeout,
        config.outbound_buffer,
    );
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
