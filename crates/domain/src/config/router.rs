use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Router (contextual bandit)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Bounded fraction of traffic allowed to explore uncertain arms.
    #[serde(default = "d_canary_share")]
    pub canary_share: f64,
    /// MICRO share cap applied when NLU confidence is low.
    #[serde(default = "d_micro_max_share")]
    pub micro_max_share: f64,
    #[serde(default = "d_planner_max_concurrent")]
    pub planner_max_concurrent: usize,
    #[serde(default = "d_true")]
    pub deep_enabled: bool,
    /// Global DEEP concurrency. One interruptible slot; the wallclock
    /// kill switch assumes it.
    #[serde(default = "d_deep_max_concurrent")]
    pub deep_max_concurrent: usize,

    /// Reward blend weights (success path): latency-vs-SLO and energy.
    #[serde(default = "d_w_latency")]
    pub w_latency: f64,
    #[serde(default = "d_w_energy")]
    pub w_energy: f64,

    /// Arm-state snapshot directory and cadence.
    #[serde(default = "d_snapshot_dir")]
    pub snapshot_dir: PathBuf,
    #[serde(default = "d_snapshot_interval_s")]
    pub snapshot_interval_s: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            canary_share: d_canary_share(),
            micro_max_share: d_micro_max_share(),
            planner_max_concurrent: d_planner_max_concurrent(),
            deep_enabled: true,
            deep_max_concurrent: d_deep_max_concurrent(),
            w_latency: d_w_latency(),
            w_energy: d_w_energy(),
            snapshot_dir: d_snapshot_dir(),
            snapshot_interval_s: d_snapshot_interval_s(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_canary_share() -> f64 {
    0.05
}
fn d_micro_max_share() -> f64 {
    0.20
}
fn d_planner_max_concurrent() -> usize {
    2
}
fn d_deep_max_concurrent() -> usize {
    1
}
fn d_w_latency() -> f64 {
    0.7
}
fn d_w_energy() -> f64 {
    0.3
}
fn d_snapshot_dir() -> PathBuf {
    PathBuf::from("./state/bandit")
}
fn d_snapshot_interval_s() -> u64 {
    60
}
