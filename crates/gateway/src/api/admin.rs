//! Admin endpoints: cache invalidation and config hot reload.
//!
//! - `POST /api/cache/invalidate` — body `{"intent": ..}` |
//!   `{"schema_version": ..}` | `{"deps_version": ..}`
//! - `POST /api/admin/reload`     — re-read and swap the config

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

use sv_cache::InvalidateFilter;
use sv_domain::config::{Config, ConfigSeverity};

use crate::state::AppState;

/// Build a standardized JSON error response.
fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "error": { "code": "validation", "message": message.into() }
        })),
    )
        .into_response()
}

/// `POST /api/cache/invalidate`
pub async fn invalidate_cache(
    State(state): State<AppState>,
    Json(filter): Json<InvalidateFilter>,
) -> Response {
    let removed = state.cache.invalidate(&filter);
    tracing::info!(?filter, removed, "cache invalidated");
    Json(serde_json::json!({ "removed": removed })).into_response()
}

/// `POST /api/admin/reload`
///
/// Re-reads the TOML the server started with, validates it, and swaps
/// the config pointer atomically. In-flight turns keep their snapshot.
pub async fn reload_config(State(state): State<AppState>) -> Response {
    let Some(path) = state.config.path().map(std::path::Path::to_path_buf) else {
        return api_error(
            StatusCode::CONFLICT,
            "server started without a config file; nothing to reload",
        );
    };

    let config = match Config::load(&path) {
        Ok(c) => c,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, format!("reload failed: {e}")),
    };

    let issues = config.validate();
    let errors: Vec<String> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.to_string())
        .collect();
    if !errors.is_empty() {
        return api_error(
            StatusCode::BAD_REQUEST,
            format!("config invalid: {}", errors.join("; ")),
        );
    }
    let warnings: Vec<String> = issues.iter().map(|i| i.to_string()).collect();

    state.config.swap(config);
    tracing::info!(path = %path.display(), "config reloaded");
    Json(serde_json::json!({
        "reloaded": true,
        "warnings": warnings,
    }))
    .into_response()
}
