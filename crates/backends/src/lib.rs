//! Generative backend clients. The backends themselves (micro, planner,
//! deep models) are opaque local HTTP services; this crate owns the
//! trait seam, the HTTP implementation with hierarchical budgets, and
//! the registry keyed by route.

mod http;

pub use http::HttpBackend;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use sv_domain::config::BackendsConfig;
use sv_domain::turn::Route;
use sv_domain::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / reply
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One generation request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub trace_id: String,
    pub text: String,
    pub intent: String,
    pub slots: BTreeMap<String, String>,
    pub lang: String,
    /// Guardian-degraded mode: smaller context, strict schema.
    pub degraded: bool,
    pub rag_top_k: usize,
    /// Planner-route requests expect a JSON plan in the reply text.
    pub expect_plan: bool,
}

/// A completed generation with its latency split.
#[derive(Debug, Clone)]
pub struct GenerateReply {
    /// Reply text; for plan-producing routes this is the raw plan JSON.
    pub text: String,
    pub first_token_ms: u64,
    pub full_ms: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One backend arm. Implementations enforce their own first-token and
/// full budgets and surface overruns as `Error::Timeout`.
#[async_trait]
pub trait BackendClient: Send + Sync {
    fn route(&self) -> Route;
    fn model_id(&self) -> &str;
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The closed {micro, planner, deep} set. No subclass hierarchies; a
/// route maps to exactly one client.
pub struct BackendRegistry {
    micro: Arc<dyn BackendClient>,
    planner: Arc<dyn BackendClient>,
    deep: Arc<dyn BackendClient>,
}

impl BackendRegistry {
    /// Build HTTP clients from config.
    pub fn from_config(cfg: &BackendsConfig) -> Self {
        Self {
            micro: Arc::new(HttpBackend::new(Route::Micro, cfg.micro.clone())),
            planner: Arc::new(HttpBackend::new(Route::Planner, cfg.planner.clone())),
            deep: Arc::new(HttpBackend::new(Route::Deep, cfg.deep.clone())),
        }
    }

    /// Assemble from arbitrary clients (tests inject stubs here).
    pub fn new(
        micro: Arc<dyn BackendClient>,
        planner: Arc<dyn BackendClient>,
        deep: Arc<dyn BackendClient>,
    ) -> Self {
        Self {
            micro,
            planner,
            deep,
        }
    }

    pub fn get(&self, route: Route) -> Arc<dyn BackendClient> {
        match route {
            Route::Micro => self.micro.clone(),
            Route::Planner => self.planner.clone(),
            Route::Deep => self.deep.clone(),
        }
    }

    pub fn model_id(&self, route: Route) -> String {
        self.get(route).model_id().to_string()
    }
}
