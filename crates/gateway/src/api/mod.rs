pub mod admin;
pub mod auth;
pub mod chat;
pub mod idempotency;
pub mod reply;
pub mod status;

use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes split into **public** (health probe) and **protected** (gated
/// behind the bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new().route("/health", get(status::health));

    let protected = Router::new()
        // Chat (core runtime)
        .route("/api/chat", post(chat::chat))
        .route("/api/chat/stream", post(chat::chat_stream))
        // Status
        .route("/api/status/simple", get(status::simple))
        .route("/api/status/routes", get(status::routes))
        .route("/api/status/guardian", get(status::guardian))
        .route("/api/status/slo", get(status::slo))
        .route("/api/status/bandit", get(status::bandit))
        // Admin
        .route("/api/cache/invalidate", post(admin::invalidate_cache))
        .route("/api/admin/reload", post(admin::reload_config))
        // Apply API auth middleware to all protected routes.
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public
        .merge(protected)
        .layer(tower_http::trace::TraceLayer::new_for_http())
        // Any handler panic becomes a sanitized 500 with a trace id for
        // correlation; nothing from the panic payload leaks out.
        .layer(CatchPanicLayer::custom(handle_panic))
}

fn handle_panic(err: Box<dyn std::any::Any + Send + 'static>) -> axum::response::Response {
    let detail = err
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| err.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    let trace_id = uuid::Uuid::new_v4();
    tracing::error!(%trace_id, panic = %detail, "handler panicked");

    (
        axum::http::StatusCode::INTERNAL_SERVER_ERROR,
        axum::Json(serde_json::json!({
            "error": {
                "code": "internal",
                "message": "ett internt fel inträffade",
                "trace_id": trace_id,
            }
        })),
    )
        .into_response()
}
