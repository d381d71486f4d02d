//! API authentication.
//!
//! Bearer tokens: the env var named by `server.api_token_env` is read
//! **once at startup** and cached as a SHA-256 digest in `AppState`.
//! Unset or empty = dev mode (no auth enforced, logged once).
//!
//! HMAC (webhook-style integrations): when the secret env is set and a
//! request carries `X-Signature`, the handler verifies HMAC-SHA256 over
//! `"{timestamp}.{body}"` with a ±300 s window and a replay cache.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

type HmacSha256 = Hmac<Sha256>;

/// Axum middleware enforcing bearer-token authentication on protected
/// routes. Attach via `axum::middleware::from_fn_with_state`.
pub async fn require_api_token(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    // `api_token_hash` is `None` in dev mode (no token configured).
    let expected_hash = match &state.api_token_hash {
        Some(h) => h,
        None => return next.run(req).await,
    };

    let provided = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    // Hash the provided token to a fixed-length digest, then compare in
    // constant time. This avoids leaking the token length.
    let provided_hash = Sha256::digest(provided.as_bytes());

    if !bool::from(provided_hash.ct_eq(expected_hash.as_slice())) {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": {
                    "code": "auth",
                    "message": "invalid or missing API token"
                }
            })),
        )
            .into_response();
    }

    next.run(req).await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HMAC verification
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Replay suppression for signed requests: a signature is accepted at
/// most once inside the timestamp window.
pub struct ReplayCache {
    seen: Mutex<HashMap<String, Instant>>,
    ttl: Duration,
}

impl ReplayCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            seen: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Returns `true` when the signature was already seen (replay).
    pub fn check_and_insert(&self, signature: &str) -> bool {
        let mut seen = self.seen.lock();
        let now = Instant::now();
        if seen.len() > 10_000 {
            let ttl = self.ttl;
            seen.retain(|_, at| now.duration_since(*at) < ttl);
        }
        if let Some(at) = seen.get(signature) {
            if now.duration_since(*at) < self.ttl {
                return true;
            }
        }
        seen.insert(signature.to_string(), now);
        false
    }
}

/// Verify a signed request. `timestamp` is unix seconds as sent in
/// `X-Timestamp`; `signature` is lowercase hex from `X-Signature`.
pub fn verify_hmac(
    secret: &[u8],
    body: &[u8],
    timestamp: &str,
    signature: &str,
    window_s: u64,
    replays: &ReplayCache,
    now_epoch_s: i64,
) -> Result<(), &'static str> {
    let ts: i64 = timestamp.parse().map_err(|_| "invalid timestamp")?;
    if (now_epoch_s - ts).unsigned_abs() > window_s {
        return Err("timestamp outside accepted window");
    }

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| "invalid secret")?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    // Constant-time comparison to prevent timing attacks.
    if computed.as_bytes().ct_eq(signature.as_bytes()).unwrap_u8() != 1 {
        return Err("signature mismatch");
    }
    if replays.check_and_insert(signature) {
        return Err("signature replay");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &[u8], timestamp: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_inside_window_passes() {
        let replays = ReplayCache::new(Duration::from_secs(600));
        let sig = sign(b"hemlis", "1700000000", b"{}");
        assert!(verify_hmac(b"hemlis", b"{}", "1700000000", &sig, 300, &replays, 1_700_000_100)
            .is_ok());
    }

    #[test]
    fn stale_timestamp_is_rejected() {
        let replays = ReplayCache::new(Duration::from_secs(600));
        let sig = sign(b"hemlis", "1700000000", b"{}");
        let err =
            verify_hmac(b"hemlis", b"{}", "1700000000", &sig, 300, &replays, 1_700_000_500)
                .unwrap_err();
        assert!(err.contains("window"));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let replays = ReplayCache::new(Duration::from_secs(600));
        let sig = sign(b"fel-nyckel", "1700000000", b"{}");
        assert!(verify_hmac(b"hemlis", b"{}", "1700000000", &sig, 300, &replays, 1_700_000_000)
            .is_err());
    }

    #[test]
    fn replayed_signature_is_rejected() {
        let replays = ReplayCache::new(Duration::from_secs(600));
        let sig = sign(b"hemlis", "1700000000", b"{}");
        assert!(verify_hmac(b"hemlis", b"{}", "1700000000", &sig, 300, &replays, 1_700_000_000)
            .is_ok());
        let err =
            verify_hmac(b"hemlis", b"{}", "1700000000", &sig, 300, &replays, 1_700_000_000)
                .unwrap_err();
        assert_eq!(err, "signature replay");
    }

    #[test]
    fn tampered_body_is_rejected() {
        let replays = ReplayCache::new(Duration::from_secs(600));
        let sig = sign(b"hemlis", "1700000000", b"{}");
        assert!(verify_hmac(
            b"hemlis",
            b"{\"x\":1}",
            "1700000000",
            &sig,
            300,
            &replays,
            1_700_000_000
        )
        .is_err());
    }
}
