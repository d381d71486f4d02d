use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::turn::Route;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Telemetry & energy model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Daily event files land under `<data_dir>/YYYY-MM-DD/events.jsonl`.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
    /// E2E outcome records for the external SLO gate.
    #[serde(default = "d_tests_dir")]
    pub tests_dir: PathBuf,
    /// Host baseline draw used by the energy model (elapsed × watts).
    #[serde(default = "d_baseline_watts")]
    pub baseline_watts: f64,
    /// Per-route multipliers on the baseline.
    #[serde(default = "d_weight_micro")]
    pub weight_micro: f64,
    #[serde(default = "d_weight_planner")]
    pub weight_planner: f64,
    #[serde(default = "d_weight_deep")]
    pub weight_deep: f64,
    /// Rolling latency window per route for P50/P95.
    #[serde(default = "d_latency_window")]
    pub latency_window: usize,
}

impl TelemetryConfig {
    pub fn route_weight(&self, route: Route) -> f64 {
        match route {
            Route::Micro => self.weight_micro,
            Route::Planner => self.weight_planner,
            Route::Deep => self.weight_deep,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            data_dir: d_data_dir(),
            tests_dir: d_tests_dir(),
            baseline_watts: d_baseline_watts(),
            weight_micro: d_weight_micro(),
            weight_planner: d_weight_planner(),
            weight_deep: d_weight_deep(),
            latency_window: d_latency_window(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_data_dir() -> PathBuf {
    PathBuf::from("./data/telemetry")
}
fn d_tests_dir() -> PathBuf {
    PathBuf::from("./data/tests")
}
fn d_baseline_watts() -> f64 {
    4.0
}
fn d_weight_micro() -> f64 {
    0.5
}
fn d_weight_planner() -> f64 {
    1.0
}
fn d_weight_deep() -> f64 {
    2.5
}
fn d_latency_window() -> usize {
    512
}
