//! Health and status endpoints.
//!
//! - `GET /health`               — per-dependency statuses and overall
//! - `GET /api/status/simple`    — turn counts, hit rate, latencies
//! - `GET /api/status/routes`    — per-route latency and quota windows
//! - `GET /api/status/guardian`  — state, thresholds, last transitions
//! - `GET /api/status/slo`       — SLO gate evaluation
//! - `GET /api/status/bandit`    — per-arm posterior means and pulls

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use sv_resilience::BreakerState;
use sv_telemetry::evaluate_slo;

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let breakers = state.breakers.snapshot();
    let degraded = breakers
        .iter()
        .any(|b| b.state != BreakerState::Closed);
    let guardian_state = state.guardian.state();

    let overall = if degraded {
        "degraded"
    } else {
        match guardian_state {
            sv_domain::turn::GuardianState::Normal => "ok",
            _ => "degraded",
        }
    };

    Json(serde_json::json!({
        "status": overall,
        "guardian": guardian_state,
        "dependencies": breakers,
        "cache": state.cache.stats(),
    }))
}

pub async fn simple(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.telemetry.snapshot();
    Json(serde_json::json!({
        "turns": snapshot.turns,
        "cache_hit_rate": snapshot.cache_hit_rate,
        "tool_success_rate": snapshot.tool_success_rate,
        "guardian": state.guardian.state(),
        "routes": snapshot.routes,
    }))
}

pub async fn routes(State(state): State<AppState>) -> impl IntoResponse {
    let telemetry = state.telemetry.snapshot();
    Json(serde_json::json!({
        "latency": telemetry.routes,
        "quota_windows": state.quotas.snapshot(),
    }))
}

pub async fn guardian(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.guardian.snapshot();
    let cfg = state.guardian.config();
    Json(serde_json::json!({
        "state": snapshot.state,
        "since": snapshot.since,
        "policy": snapshot.policy,
        "last_sample": snapshot.last_sample,
        "thresholds": {
            "ram_soft_pct": cfg.ram_soft_pct,
            "ram_hard_pct": cfg.ram_hard_pct,
            "ram_recover_pct": cfg.ram_recover_pct,
            "cpu_soft_pct": cfg.cpu_soft_pct,
            "temp_hard_c": cfg.temp_hard_c,
            "battery_hard_pct": cfg.battery_hard_pct,
            "recover_dwell_s": cfg.recover_dwell_s,
        },
        "transitions": state.guardian.recent_transitions(),
    }))
}

pub async fn slo(State(state): State<AppState>) -> impl IntoResponse {
    let report = evaluate_slo(&state.telemetry.snapshot());
    Json(serde_json::json!(report))
}

pub async fn bandit(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "canary_share": state.bandit.config().canary_share,
        "buckets": state.bandit.export(),
    }))
}
