//! Process wiring: build the shared state from config and spawn the
//! background tasks. Kept out of `main.rs` so integration tests can
//! assemble the same state with stub backends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use sv_backends::BackendRegistry;
use sv_cache::TieredCache;
use sv_canon::{Canonicalizer, PiiMasker};
use sv_domain::config::Config;
use sv_domain::turn::{GuardianState, Route};
use sv_guardian::Guardian;
use sv_nlu::NluClient;
use sv_planner::{PlanExecutor, ToolRegistry};
use sv_resilience::{BreakerConfig, BreakerRegistry, RouteQuotas};
use sv_router::BanditRouter;
use sv_telemetry::TelemetryRecorder;

use crate::api::auth::ReplayCache;
use crate::api::idempotency::IdempotencyStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::ratelimit::SessionRateLimiter;
use crate::state::{AppState, ConfigHandle};

/// Assemble the application state. `backends` lets tests inject stubs;
/// production passes `None` and gets the HTTP clients from config.
pub fn build_state(
    config: Config,
    config_path: Option<PathBuf>,
    backends: Option<Arc<BackendRegistry>>,
) -> anyhow::Result<AppState> {
    // ── Guardian ─────────────────────────────────────────────────────
    let guardian = Guardian::new(config.guardian.clone());
    tracing::info!("guardian ready");

    // ── Cache (sled-backed tiers) ────────────────────────────────────
    let cache = Arc::new(
        TieredCache::open(config.cache.clone()).context("opening cache backing store")?,
    );
    tracing::info!(
        dir = %config.cache.data_dir.display(),
        entries = cache.stats().entries,
        "cache ready"
    );

    // ── NLU gateway ──────────────────────────────────────────────────
    let nlu = Arc::new(NluClient::new(config.nlu.clone()));
    tracing::info!(url = %config.nlu.base_url, "NLU gateway ready");

    // ── Backends ─────────────────────────────────────────────────────
    let backends =
        backends.unwrap_or_else(|| Arc::new(BackendRegistry::from_config(&config.backends)));

    // ── Bandit (restore snapshot or clean start) ─────────────────────
    let bandit = match sv_router::load_latest(&config.router.snapshot_dir) {
        Some(state) => {
            tracing::info!(buckets = state.len(), "bandit state restored from snapshot");
            Arc::new(BanditRouter::with_state(config.router.clone(), state))
        }
        None => {
            tracing::info!("bandit starting clean (no usable snapshot)");
            Arc::new(BanditRouter::new(config.router.clone()))
        }
    };

    // ── Breakers & quotas ────────────────────────────────────────────
    let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
    let quotas = Arc::new(RouteQuotas::new(
        config.quota.clone(),
        config.router.planner_max_concurrent,
        config.router.deep_max_concurrent,
    ));

    // ── Tool registry & planner executor ─────────────────────────────
    let registry = Arc::new(
        ToolRegistry::load(&config.planner.registry_path).context("loading tool registry")?,
    );
    tracing::info!(
        version = %registry.version,
        tools = registry.tool_names().len(),
        "tool registry loaded"
    );
    let executor = Arc::new(PlanExecutor::new(
        registry,
        breakers.clone(),
        config.planner.tool_timeout_ms,
        config.planner.args_from_model,
    ));

    // ── Telemetry ────────────────────────────────────────────────────
    let telemetry = TelemetryRecorder::spawn(
        config.telemetry.data_dir.clone(),
        config.telemetry.latency_window,
    );
    tracing::info!(dir = %config.telemetry.data_dir.display(), "telemetry recorder ready");

    // ── API token (read once, hash for constant-time comparison) ─────
    let api_token_hash = match std::env::var(&config.server.api_token_env) {
        Ok(token) if !token.is_empty() => {
            tracing::info!(env_var = %config.server.api_token_env, "bearer-token auth enabled");
            Some(Sha256::digest(token.as_bytes()).to_vec())
        }
        _ => {
            tracing::warn!(
                env_var = %config.server.api_token_env,
                "bearer-token auth DISABLED (dev mode)"
            );
            None
        }
    };
    let hmac_secret = match std::env::var(&config.server.hmac_secret_env) {
        Ok(secret) if !secret.is_empty() => {
            tracing::info!("HMAC verification enabled for signed requests");
            Some(secret.into_bytes())
        }
        _ => None,
    };

    let idempotency = Arc::new(IdempotencyStore::new(Duration::from_secs(
        config.server.idempotency_ttl_s,
    )));
    let session_limiter = Arc::new(SessionRateLimiter::new(config.quota.session_rpm));
    let replays = Arc::new(ReplayCache::new(Duration::from_secs(
        config.server.hmac_window_s * 2,
    )));

    Ok(AppState {
        config: Arc::new(ConfigHandle::new(config, config_path)),
        guardian,
        cache,
        nlu,
        backends,
        bandit,
        executor,
        telemetry,
        canonicalizer: Arc::new(Canonicalizer::new()),
        masker: Arc::new(PiiMasker::new()),
        breakers,
        quotas,
        session_limiter,
        cancel_map: Arc::new(CancelMap::new()),
        session_tool_errors: Arc::new(Mutex::new(HashMap::new())),
        idempotency,
        api_token_hash,
        hmac_secret,
        replays,
    })
}

/// Spawn the long-running background tasks: the guardian sampler, the
/// deep-work cancel watcher, periodic bandit snapshots, and the
/// telemetry retention sweep.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Guardian sampler (1 s cadence) ───────────────────────────────
    state.guardian.spawn_sampler();

    // ── Guardian watcher: cancel outstanding deep work on departure
    //    from NORMAL; each cancellation is a kill action.
    {
        let guardian = state.guardian.clone();
        let cancel_map = state.cancel_map.clone();
        let mut rx = guardian.subscribe();
        tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = rx.borrow_and_update().state;
                if current != GuardianState::Normal {
                    let cancelled = cancel_map.cancel_route(Route::Deep);
                    for _ in 0..cancelled {
                        guardian.record_kill();
                    }
                    if cancelled > 0 {
                        tracing::info!(cancelled, state = %current, "deep work cancelled");
                    }
                }
            }
        });
    }

    // ── Periodic bandit snapshot ─────────────────────────────────────
    {
        let bandit = state.bandit.clone();
        let cfg = state.config.get();
        let dir = cfg.router.snapshot_dir.clone();
        let interval_s = cfg.router.snapshot_interval_s.max(5);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(interval_s));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                if let Err(e) = sv_router::write_snapshot(&dir, &bandit.export()) {
                    tracing::warn!(error = %e, "bandit snapshot failed");
                }
            }
        });
    }

    // ── Telemetry retention sweep (hourly) ───────────────────────────
    {
        let cfg = state.config.get();
        let data_dir = cfg.telemetry.data_dir.clone();
        let retention_days = cfg.privacy.session_retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(3_600));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                let removed = sv_telemetry::sweep_retention(
                    &data_dir,
                    retention_days,
                    chrono::Utc::now(),
                );
                if removed > 0 {
                    tracing::info!(removed, "telemetry retention sweep");
                }
            }
        });
    }
}

/// Final snapshot on graceful shutdown.
pub fn shutdown_snapshot(state: &AppState) {
    let cfg = state.config.get();
    if let Err(e) = sv_router::write_snapshot(&cfg.router.snapshot_dir, &state.bandit.export()) {
        tracing::warn!(error = %e, "shutdown bandit snapshot failed");
    }
}
