//! Shared application state passed to all API handlers.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use sv_backends::BackendRegistry;
use sv_cache::TieredCache;
use sv_canon::{Canonicalizer, PiiMasker};
use sv_domain::config::Config;
use sv_guardian::Guardian;
use sv_nlu::NluClient;
use sv_planner::PlanExecutor;
use sv_resilience::{BreakerRegistry, RouteQuotas};
use sv_router::BanditRouter;
use sv_telemetry::TelemetryRecorder;

use crate::api::auth::ReplayCache;
use crate::api::idempotency::IdempotencyStore;
use crate::runtime::cancel::CancelMap;
use crate::runtime::ratelimit::SessionRateLimiter;

/// Atomically swappable configuration. Handlers take one snapshot per
/// turn; the admin reload endpoint swaps the pointer.
pub struct ConfigHandle {
    inner: RwLock<Arc<Config>>,
    path: Option<std::path::PathBuf>,
}

impl ConfigHandle {
    pub fn new(config: Config, path: Option<std::path::PathBuf>) -> Self {
        Self {
            inner: RwLock::new(Arc::new(config)),
            path,
        }
    }

    pub fn get(&self) -> Arc<Config> {
        self.inner.read().clone()
    }

    pub fn swap(&self, config: Config) {
        *self.inner.write() = Arc::new(config);
    }

    /// The TOML file this config was loaded from (`None` = defaults).
    pub fn path(&self) -> Option<&std::path::Path> {
        self.path.as_deref()
    }
}

/// Shared application state.
///
/// Fields are grouped by concern:
/// - **Core pipeline** — guardian, cache, NLU, backends, bandit, planner
/// - **Protection** — breakers, route quotas, session rate limit
/// - **Turn bookkeeping** — cancel map, per-session tool-error flags
/// - **Surface** — idempotency store, auth material
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ConfigHandle>,

    // ── Core pipeline ─────────────────────────────────────────────────
    pub guardian: Arc<Guardian>,
    pub cache: Arc<TieredCache>,
    pub nlu: Arc<NluClient>,
    pub backends: Arc<BackendRegistry>,
    pub bandit: Arc<BanditRouter>,
    pub executor: Arc<PlanExecutor>,
    pub telemetry: Arc<TelemetryRecorder>,
    pub canonicalizer: Arc<Canonicalizer>,
    pub masker: Arc<PiiMasker>,

    // ── Protection ────────────────────────────────────────────────────
    pub breakers: Arc<BreakerRegistry>,
    pub quotas: Arc<RouteQuotas>,
    pub session_limiter: Arc<SessionRateLimiter>,

    // ── Turn bookkeeping ──────────────────────────────────────────────
    pub cancel_map: Arc<CancelMap>,
    /// Per-session "last tool call failed" flag (a bandit feature).
    pub session_tool_errors: Arc<Mutex<HashMap<String, bool>>>,

    // ── Surface ───────────────────────────────────────────────────────
    pub idempotency: Arc<IdempotencyStore>,
    /// SHA-256 of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// HMAC secret for webhook-style signed requests. `None` = HMAC
    /// verification disabled.
    pub hmac_secret: Option<Vec<u8>>,
    /// Replay suppression for signed requests.
    pub replays: Arc<ReplayCache>,
}
