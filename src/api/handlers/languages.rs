//! Evaluator key issuance.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;

use crate::api::dto::{IssueKeyRequest, IssueKeyResponse};
use crate::app_state::AppState;
use crate::error::{BrokerError, ErrorResponse};

/// `POST /languages`: Issue a fresh evaluator key.
///
/// Replaces the owner's previous language and evicts its live session.
///
/// # Errors
///
/// Returns [`BrokerError::InvalidRequest`] for bad names,
/// [`BrokerError::Registration`] if another owner holds the name, and
/// [`BrokerError::Persistence`] if the store cannot be saved.
#[utoipa::path(
    post,
    path = "/api/v1/languages",
    tag = "Languages",
    summary = "Issue an evaluator key",
    description = "Registers or replaces the owner's language and returns a new secret key. Any session using the previous key is disconnected.",
    request_body = IssueKeyRequest,
    responses(
        (status = 201, description = "Key issued", body = IssueKeyResponse),
        (status = 400, description = "Invalid language name", body = ErrorResponse),
        (status = 409, description = "Name held by another owner", body = ErrorResponse),
    )
)]
pub async fn issue_key(
    State(state): State<AppState>,
    Json(req): Json<IssueKeyRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    let issued = state
        .eval_service
        .issue_key(req.owner_id, &req.name, req.short.as_deref())
        .await?;

    let response = IssueKeyResponse {
        key: issued.language.key.expose().to_string(),
        name: issued.language.name,
        short: issued.language.short,
        replaced: issued.replaced.is_some(),
        evicted: issued.evicted,
        issued_at: Utc::now(),
    };
    Ok((StatusCode::CREATED, Json(response)))
}

/// Language routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/languages", post(issue_key))
}
