use serde::{Deserialize, Serialize};

use crate::turn::Route;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Generative backends (opaque local services)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One backend endpoint plus its latency budgets. Budgets are hierarchical:
/// the orchestrator derives child deadlines no later than these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEndpoint {
    pub base_url: String,
    pub model_id: String,
    pub first_token_budget_ms: u64,
    pub full_budget_ms: u64,
}

impl BackendEndpoint {
    fn with_defaults(port: u16, model_id: &str, first: u64, full: u64) -> Self {
        Self {
            base_url: format!("http://127.0.0.1:{port}"),
            model_id: model_id.into(),
            first_token_budget_ms: first,
            full_budget_ms: full,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendsConfig {
    #[serde(default = "d_micro")]
    pub micro: BackendEndpoint,
    #[serde(default = "d_planner")]
    pub planner: BackendEndpoint,
    #[serde(default = "d_deep")]
    pub deep: BackendEndpoint,
}

impl BackendsConfig {
    pub fn endpoint(&self, route: Route) -> &BackendEndpoint {
        match route {
            Route::Micro => &self.micro,
            Route::Planner => &self.planner,
            Route::Deep => &self.deep,
        }
    }
}

impl Default for BackendsConfig {
    fn default() -> Self {
        Self {
            micro: d_micro(),
            planner: d_planner(),
            deep: d_deep(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_micro() -> BackendEndpoint {
    BackendEndpoint::with_defaults(9201, "micro-1b", 250, 1_000)
}
fn d_planner() -> BackendEndpoint {
    BackendEndpoint::with_defaults(9202, "planner-3b", 900, 1_500)
}
fn d_deep() -> BackendEndpoint {
    BackendEndpoint::with_defaults(9203, "deep-14b", 1_800, 3_000)
}
