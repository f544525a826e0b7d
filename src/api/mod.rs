//! REST API layer: route handlers, DTOs, and router composition.
//!
//! All resource endpoints are mounted under `/api/v1`. The evaluator
//! WebSocket lives at `/ws`.

pub mod dto;
pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};
use crate::ws::handler::ws_handler;

/// OpenAPI document for the REST endpoints.
#[derive(Debug, OpenApi)]
#[openapi(
    info(title = "eval-broker", description = "Remote code evaluation broker"),
    paths(
        handlers::eval::evaluate,
        handlers::languages::issue_key,
        handlers::sessions::list_sessions,
        handlers::sessions::evict_session,
        handlers::system::health_handler,
    ),
    components(schemas(
        dto::EvalRequest,
        dto::EvalResponse,
        dto::IssueKeyRequest,
        dto::IssueKeyResponse,
        dto::SessionDto,
        dto::SessionListResponse,
        handlers::system::HealthResponse,
        ErrorResponse,
        ErrorBody,
    ))
)]
pub struct ApiDoc;

/// Builds the complete API router with all REST endpoints.
pub fn build_router() -> Router<AppState> {
    Router::new()
        .nest("/api/v1", handlers::routes())
        .merge(handlers::system::routes())
}

/// Builds the full application: REST API, evaluator socket, and layers.
pub fn build_app(state: AppState) -> Router {
    let router = Router::new()
        .merge(build_router())
        .route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::store::LanguageStore;

    fn app() -> Router {
        build_app(AppState::new(
            Arc::new(LanguageStore::in_memory()),
            Duration::from_secs(1),
            8,
        ))
    }

    async fn call(request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let Ok(response) = app().oneshot(request).await;
        let status = response.status();
        let Ok(bytes) = to_bytes(response.into_body(), usize::MAX).await else {
            panic!("body read failed");
        };
        let body = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, body)
    }

    fn post(uri: &str, body: &serde_json::Value) -> Request<Body> {
        let Ok(request) = Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
        else {
            panic!("bad request");
        };
        request
    }

    #[tokio::test]
    async fn health_reports_zero_sessions() {
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("bad request");
        };
        let (status, body) = call(request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
    }

    #[tokio::test]
    async fn issue_key_returns_created_with_key() {
        let (status, body) = call(post(
            "/api/v1/languages",
            &serde_json::json!({ "owner_id": 1, "name": "pylang", "short": "py_" }),
        ))
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["name"], "pylang");
        assert_eq!(body["short"], "py_");
        assert_eq!(body["replaced"], false);
        assert!(body["key"].as_str().is_some_and(|k| !k.is_empty()));
    }

    #[tokio::test]
    async fn empty_code_is_bad_request() {
        let (status, body) = call(post(
            "/api/v1/eval",
            &serde_json::json!({ "language": "pylang", "code": "" }),
        ))
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].is_string());
    }

    #[test]
    fn openapi_lists_all_paths() {
        let doc = ApiDoc::openapi();
        for path in [
            "/api/v1/eval",
            "/api/v1/languages",
            "/api/v1/sessions",
            "/api/v1/sessions/{language}",
            "/health",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
    }
}
