//! Contextual bandit over the {micro, planner, deep} arms.
//!
//! Context is bucketed into a small discrete key (confidence band,
//! length band, question-ness); each bucket keeps independent per-arm
//! statistics. Arm selection is upper-confidence within the admissible
//! set, with a bounded canary share routed to the least-pulled arm so
//! uncertain arms cannot flood traffic.

use std::collections::HashMap;

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};

use sv_domain::config::RouterConfig;
use sv_domain::turn::{GuardianState, Route};

/// Inverse golden ratio, used to shape successful rewards away from the
/// extremes (any success lands in [1-1/φ, 1]).
const INV_PHI: f64 = 0.618_033_988_749_894_8;

/// Energy normalization reference, Wh. A turn at or above this scores
/// zero on the energy term.
const ENERGY_REF_WH: f64 = 0.01;

/// Pulls below which an arm counts as uncertain (canary target).
const UNCERTAIN_PULLS: u64 = 10;

/// Quarantine trip: enough evidence and a collapsed mean.
const QUARANTINE_MIN_PULLS: u64 = 20;
const QUARANTINE_MEAN: f64 = 0.2;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Context
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Features of the current request, as seen by the bandit.
#[derive(Debug, Clone, Copy)]
pub struct RouteContext {
    pub intent_confidence: f32,
    pub text_len: usize,
    pub has_question: bool,
    pub cache_hint: bool,
    pub guardian_state: GuardianState,
    pub last_tool_error: bool,
}

impl RouteContext {
    /// Discrete bucket key. Small on purpose: per-bucket statistics
    /// need traffic to converge.
    pub fn bucket(&self) -> String {
        let confidence = if self.intent_confidence >= 0.8 {
            "high"
        } else if self.intent_confidence >= 0.5 {
            "mid"
        } else {
            "low"
        };
        let length = if self.text_len > 80 { "long" } else { "short" };
        let question = if self.has_question { "q" } else { "s" };
        let tool = if self.last_tool_error { "terr" } else { "tok" };
        format!("{confidence}:{length}:{question}:{tool}")
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arm state
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Per-(bucket, arm) statistics. Persisted in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmState {
    pub mean: f64,
    pub pulls: u64,
    pub last_update_epoch: i64,
    pub quarantined: bool,
}

impl Default for ArmState {
    fn default() -> Self {
        Self {
            // Optimistic-neutral prior.
            mean: 0.5,
            pulls: 0,
            last_update_epoch: 0,
            quarantined: false,
        }
    }
}

impl ArmState {
    /// Exploit score: mean plus an upper-confidence bonus. Untried arms
    /// stay at the prior so the canary path, not the exploit path,
    /// owns their traffic.
    fn score(&self, bucket_pulls: u64) -> f64 {
        if self.pulls == 0 {
            return self.mean;
        }
        let bonus = (2.0 * (bucket_pulls.max(1) as f64).ln() / self.pulls as f64).sqrt();
        self.mean + bonus
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reward
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounded scalar reward in [0, 1]: zero on failure; on success a
/// latency-vs-SLO and energy blend shaped by the inverse golden ratio
/// so exploration is never starved by a harsh success score.
pub fn compute_reward(
    cfg: &RouterConfig,
    success: bool,
    full_ms: u64,
    slo_full_ms: u64,
    energy_wh: f64,
) -> f64 {
    if !success {
        return 0.0;
    }
    let latency_score = 1.0 - (full_ms as f64 / slo_full_ms.max(1) as f64).min(1.0);
    let energy_score = 1.0 - (energy_wh / ENERGY_REF_WH).min(1.0);
    let total_weight = (cfg.w_latency + cfg.w_energy).max(f64::EPSILON);
    let blend = (cfg.w_latency * latency_score + cfg.w_energy * energy_score) / total_weight;
    (1.0 - INV_PHI) + INV_PHI * blend.clamp(0.0, 1.0)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// BanditRouter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

type BucketMap = HashMap<String, HashMap<Route, ArmState>>;

pub struct BanditRouter {
    cfg: RouterConfig,
    buckets: Mutex<BucketMap>,
}

impl BanditRouter {
    pub fn new(cfg: RouterConfig) -> Self {
        Self {
            cfg,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Restore from a persisted snapshot.
    pub fn with_state(cfg: RouterConfig, state: BucketMap) -> Self {
        Self {
            cfg,
            buckets: Mutex::new(state),
        }
    }

    /// Choose an arm among `admissible` (already clamped by guardian,
    /// quotas, and breakers by the caller). Empty input falls back to
    /// MICRO.
    pub fn choose(&self, ctx: &RouteContext, admissible: &[Route]) -> Route {
        self.choose_inner(ctx, admissible, rand::thread_rng().gen::<f64>())
    }

    /// Deterministic core: `coin` ∈ [0, 1) pre-drawn by the caller.
    pub fn choose_inner(&self, ctx: &RouteContext, admissible: &[Route], coin: f64) -> Route {
        let Some(&first) = admissible.first() else {
            return Route::Micro;
        };
        if admissible.len() == 1 {
            return first;
        }

        let bucket_key = ctx.bucket();
        let buckets = self.buckets.lock();
        let arms = buckets.get(&bucket_key);

        let state_of = |route: Route| -> ArmState {
            arms.and_then(|m| m.get(&route)).cloned().unwrap_or_default()
        };
        let bucket_pulls: u64 = admissible.iter().map(|&r| state_of(r).pulls).sum();

        // ── Canary path: bounded share to the least-pulled uncertain arm ──
        if coin < self.cfg.canary_share {
            if let Some(&route) = admissible
                .iter()
                .filter(|&&r| state_of(r).pulls < UNCERTAIN_PULLS || state_of(r).quarantined)
                .min_by_key(|&&r| state_of(r).pulls)
            {
                return route;
            }
        }

        // ── Exploit path: best UCB score among non-quarantined arms ──
        admissible
            .iter()
            .filter(|&&r| !state_of(r).quarantined)
            .copied()
            .max_by(|&a, &b| {
                state_of(a)
                    .score(bucket_pulls)
                    .partial_cmp(&state_of(b).score(bucket_pulls))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .unwrap_or(first)
    }

    /// Record a turn outcome. Updates for one (bucket, arm) pair are
    /// serialized by the internal lock; arms update independently.
    pub fn update(&self, ctx: &RouteContext, route: Route, reward: f64) {
        let reward = reward.clamp(0.0, 1.0);
        let bucket_key = ctx.bucket();
        let mut buckets = self.buckets.lock();
        let arm = buckets
            .entry(bucket_key)
            .or_default()
            .entry(route)
            .or_default();
        arm.pulls += 1;
        arm.mean += (reward - arm.mean) / arm.pulls as f64;
        arm.last_update_epoch = chrono::Utc::now().timestamp();
        arm.quarantined = arm.pulls >= QUARANTINE_MIN_PULLS && arm.mean < QUARANTINE_MEAN;
    }

    /// Clone the full arm state (snapshot source, status API).
    pub fn export(&self) -> BucketMap {
        self.buckets.lock().clone()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.cfg
    }
}
