//! Axum WebSocket upgrade handler for evaluators.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::store::SessionStore;

/// `GET /ws`: Upgrade an evaluator's HTTP connection to WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let registry = Arc::clone(&state.registry);
    let store: Arc<dyn SessionStore> = Arc::clone(&state.store) as Arc<dyn SessionStore>;
    let outbound_buffer = state.outbound_buffer;

    ws.on_upgrade(move |socket| run_connection(socket, registry, store, outbound_buffer))
}
