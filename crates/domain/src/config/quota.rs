use serde::{Deserialize, Serialize};

use crate::turn::Route;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Quotas
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Per-session request budget per minute.
    #[serde(default = "d_session_rpm")]
    pub session_rpm: u32,
    /// Sliding-window length for per-route counters.
    #[serde(default = "d_route_window_s")]
    pub route_window_s: u64,
    /// Per-route request caps within one window.
    #[serde(default = "d_micro_max")]
    pub micro_max_requests: u32,
    #[serde(default = "d_planner_max")]
    pub planner_max_requests: u32,
    #[serde(default = "d_deep_max")]
    pub deep_max_requests: u32,
}

impl QuotaConfig {
    pub fn route_max(&self, route: Route) -> u32 {
        match route {
            Route::Micro => self.micro_max_requests,
            Route::Planner => self.planner_max_requests,
            Route::Deep => self.deep_max_requests,
        }
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            session_rpm: d_session_rpm(),
            route_window_s: d_route_window_s(),
            micro_max_requests: d_micro_max(),
            planner_max_requests: d_planner_max(),
            deep_max_requests: d_deep_max(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_session_rpm() -> u32 {
    10
}
fn d_route_window_s() -> u64 {
    60
}
fn d_micro_max() -> u32 {
    120
}
fn d_planner_max() -> u32 {
    30
}
fn d_deep_max() -> u32 {
    6
}
