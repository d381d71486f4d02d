//! Chat API endpoints — the primary interface for running turns.
//!
//! - `POST /api/chat`        — non-streaming: returns the full reply
//! - `POST /api/chat/stream` — SSE: `meta`, `delta`, then `final`
//!
//! The non-streaming endpoint honors `Idempotency-Key`: duplicates
//! replay the stored response, and concurrent duplicates share exactly
//! one execution.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use futures_util::stream::Stream;
use serde::Deserialize;

use sv_domain::{Error, Result};

use crate::api::auth::verify_hmac;
use crate::api::idempotency::{IdemTicket, StoredResponse};
use crate::api::reply::{error_body, status_for};
use crate::runtime::{run_turn, TurnInput, TurnReply};
use crate::state::AppState;

/// Ingress cap on the message field.
const MAX_MESSAGE_BYTES: usize = 16 * 1024;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Request schema version; must be `"1"`.
    pub v: String,
    pub session_id: String,
    #[serde(default = "d_lang")]
    pub lang: String,
    pub message: String,
    /// Reserved; carried for future consent-scoped integrations.
    #[serde(default)]
    #[allow(dead_code)]
    pub consent_scopes: Option<Vec<String>>,
}

fn d_lang() -> String {
    "sv".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match ingress_checks(&state, &headers, &body) {
        Ok(req) => req,
        Err(e) => return render_stored(&failure_response(&e, None)),
    };

    // ── Idempotency ─────────────────────────────────────────────────
    let idem_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|key| format!("{}:{key}", request.session_id));

    let Some(key) = idem_key else {
        let stored = execute_turn(&state, request).await;
        return render_stored(&stored);
    };

    match state.idempotency.check(&key) {
        IdemTicket::Replay(stored) => render_stored(&stored),
        IdemTicket::Wait(mut rx) => match rx.recv().await {
            Ok(Ok(stored)) => render_stored(&stored),
            _ => render_stored(&failure_response(
                &Error::Internal("duplicate submission failed".into()),
                None,
            )),
        },
        IdemTicket::Fresh(guard) => {
            let stored = execute_turn(&state, request).await;
            state.idempotency.complete(&key, guard, stored.clone());
            render_stored(&stored)
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/chat/stream (SSE)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let request = match ingress_checks(&state, &headers, &body) {
        Ok(req) => req,
        Err(e) => return render_stored(&failure_response(&e, None)),
    };

    let stream = make_sse_stream(state, request);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

fn make_sse_stream(
    state: AppState,
    request: ChatRequest,
) -> impl Stream<Item = std::result::Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let input = TurnInput {
            session_id: request.session_id,
            lang: request.lang,
            message: request.message,
        };
        match run_turn(&state, input).await {
            Ok(reply) => {
                let meta = serde_json::json!({
                    "trace_id": reply.trace_id,
                    "route": reply.route,
                    "cache_tier": reply.cache_tier.as_str(),
                    "intent": reply.intent,
                });
                yield Ok(Event::default().event("meta").data(meta.to_string()));
                yield Ok(Event::default()
                    .event("delta")
                    .data(serde_json::json!({ "text": reply.text }).to_string()));
                yield Ok(Event::default().event("final").data("{}"));
            }
            Err(e) => {
                let body = error_body(&e, None);
                yield Ok(Event::default().event("error").data(body.to_string()));
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ingress checks: optional HMAC signature, JSON shape, version, size.
fn ingress_checks(state: &AppState, headers: &HeaderMap, body: &Bytes) -> Result<ChatRequest> {
    if let (Some(secret), Some(signature)) = (
        state.hmac_secret.as_deref(),
        headers.get("x-signature").and_then(|v| v.to_str().ok()),
    ) {
        let timestamp = headers
            .get("x-timestamp")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| Error::Auth("signed request missing X-Timestamp".into()))?;
        let window_s = state.config.get().server.hmac_window_s;
        verify_hmac(
            secret,
            body,
            timestamp,
            signature,
            window_s,
            &state.replays,
            Utc::now().timestamp(),
        )
        .map_err(|reason| Error::Auth(format!("signature rejected: {reason}")))?;
    }

    let request: ChatRequest = serde_json::from_slice(body)
        .map_err(|e| Error::Validation(format!("invalid request body: {e}")))?;
    if request.v != "1" {
        return Err(Error::Validation(format!(
            "unsupported request version \"{}\"",
            request.v
        )));
    }
    if request.session_id.is_empty() {
        return Err(Error::Validation("session_id must not be empty".into()));
    }
    if request.message.is_empty() {
        return Err(Error::Validation("message must not be empty".into()));
    }
    if request.message.len() > MAX_MESSAGE_BYTES {
        return Err(Error::Validation(format!(
            "message exceeds {MAX_MESSAGE_BYTES} bytes"
        )));
    }
    Ok(request)
}

async fn execute_turn(state: &AppState, request: ChatRequest) -> StoredResponse {
    let input = TurnInput {
        session_id: request.session_id,
        lang: request.lang,
        message: request.message,
    };
    match run_turn(state, input).await {
        Ok(reply) => success_response(&reply),
        Err(e) => failure_response(&e, None),
    }
}

fn success_response(reply: &TurnReply) -> StoredResponse {
    let mut headers = vec![
        (
            "X-Route".to_string(),
            reply
                .route
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "none".into()),
        ),
        ("X-Intent".to_string(), reply.intent.clone()),
        ("X-Cache".to_string(), reply.cache_tier.as_str().to_string()),
    ];
    if let Some(hint) = reply.route_hint {
        headers.push(("X-Route-Hint".to_string(), hint.as_str().to_string()));
    }
    StoredResponse {
        status: 200,
        body: serde_json::json!({
            "text": reply.text,
            "route": reply.route,
            "cache_tier": reply.cache_tier.as_str(),
            "trace_id": reply.trace_id,
        }),
        headers,
    }
}

fn failure_response(e: &Error, trace_id: Option<uuid::Uuid>) -> StoredResponse {
    let mut headers = vec![(
        "X-Trace-Id".to_string(),
        trace_id.unwrap_or_else(uuid::Uuid::new_v4).to_string(),
    )];
    if let Some(retry_after) = e.retry_after() {
        headers.push(("Retry-After".to_string(), retry_after.to_string()));
    }
    StoredResponse {
        status: status_for(e),
        body: error_body(e, trace_id),
        headers,
    }
}

fn render_stored(stored: &StoredResponse) -> Response {
    let status = StatusCode::from_u16(stored.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, Json(stored.body.clone())).into_response();
    for (name, value) in &stored.headers {
        if let (Ok(name), Ok(value)) = (
            axum::http::HeaderName::from_bytes(name.as_bytes()),
            axum::http::HeaderValue::from_str(value),
        ) {
            response.headers_mut().insert(name, value);
        }
    }
    response
}
