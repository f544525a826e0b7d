//! Evaluation handler.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};

use crate::api::dto::{EvalRequest, EvalResponse};
use crate::app_state::AppState;
use crate::error::{BrokerError, ErrorResponse};

/// `POST /eval`: Run code on a connected evaluator.
///
/// # Errors
///
/// Returns [`BrokerError`] if the language is unknown or offline, or the
/// evaluator times out, disconnects, or fails.
#[utoipa::path(
    post,
    path = "/api/v1/eval",
    tag = "Evaluation",
    summary = "Evaluate code",
    description = "Sends the code to the evaluator session of the named language and waits for its result, up to the configured timeout.",
    request_body = EvalRequest,
    responses(
        (status = 200, description = "Evaluator result", body = EvalResponse),
        (status = 404, description = "Unknown language", body = ErrorResponse),
        (status = 502, description = "Evaluator failed or disconnected", body = ErrorResponse),
        (status = 503, description = "Evaluator offline", body = ErrorResponse),
        (status = 504, description = "Evaluator timed out", body = ErrorResponse),
    )
)]
pub async fn evaluate(
    State(state): State<AppState>,
    Json(req): Json<EvalRequest>,
) -> Result<impl IntoResponse, BrokerError> {
    if req.code.is_empty() {
        return Err(BrokerError::InvalidRequest("code must not be empty".to_string()));
    }
    let evaluation = state.eval_service.evaluate(&req.language, req.code).await?;
    Ok(Json(EvalResponse::from(evaluation)))
}

/// Evaluation routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/eval", post(evaluate))
}
