//! Live session listing and eviction.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get};
use axum::{Json, Router};

use crate::api::dto::{SessionDto, SessionListResponse};
use crate::app_state::AppState;
use crate::error::{BrokerError, ErrorResponse};

/// `GET /sessions`: List connected evaluators.
#[utoipa::path(
    get,
    path = "/api/v1/sessions",
    tag = "Sessions",
    summary = "List live sessions",
    responses(
        (status = 200, description = "Live sessions", body = SessionListResponse),
    )
)]
pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<SessionDto> = state
        .eval_service
        .live_sessions()
        .await
        .into_iter()
        .map(SessionDto::from)
        .collect();
    let total = data.len();
    Json(SessionListResponse { data, total })
}

/// `DELETE /sessions/{language}`: Disconnect a language's evaluator.
///
/// # Errors
///
/// Returns [`BrokerError::LanguageNotFound`] if the language is unknown,
/// and [`BrokerError::SessionOffline`] if it has no live session.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{language}",
    tag = "Sessions",
    summary = "Evict a session",
    params(
        ("language" = String, Path, description = "Primary or short language name"),
    ),
    responses(
        (status = 204, description = "Session evicted"),
        (status = 404, description = "Unknown language", body = ErrorResponse),
        (status = 503, description = "Language has no live session", body = ErrorResponse),
    )
)]
pub async fn evict_session(
    State(state): State<AppState>,
    Path(language): Path<String>,
) -> Result<impl IntoResponse, BrokerError> {
    if state.eval_service.evict_language(&language).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(BrokerError::SessionOffline(language))
    }
}

/// Session routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", get(list_sessions))
        .route("/sessions/{language}", delete(evict_session))
}
