//! HTTP backend client with hierarchical latency budgets: the
//! first-token budget bounds time-to-headers, the full budget bounds
//! the whole exchange.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sv_domain::config::BackendEndpoint;
use sv_domain::turn::Route;
use sv_domain::{Error, Result};

use crate::{BackendClient, GenerateRequest, GenerateReply};

#[derive(Debug, Serialize)]
struct GenerateWireRequest<'a> {
    v: &'static str,
    model: &'a str,
    text: &'a str,
    intent: &'a str,
    slots: &'a std::collections::BTreeMap<String, String>,
    lang: &'a str,
    degraded: bool,
    rag_top_k: usize,
    expect_plan: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateWireReply {
    text: String,
}

pub struct HttpBackend {
    route: Route,
    endpoint: BackendEndpoint,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(route: Route, endpoint: BackendEndpoint) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(endpoint.full_budget_ms + 250))
            .build()
            .unwrap_or_default();
        Self {
            route,
            endpoint,
            http,
        }
    }
}

#[async_trait]
impl BackendClient for HttpBackend {
    fn route(&self) -> Route {
        self.route
    }

    fn model_id(&self) -> &str {
        &self.endpoint.model_id
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateReply> {
        let url = format!(
            "{}/generate",
            self.endpoint.base_url.trim_end_matches('/')
        );
        let body = GenerateWireRequest {
            v: "1",
            model: &self.endpoint.model_id,
            text: &req.text,
            intent: &req.intent,
            slots: &req.slots,
            lang: &req.lang,
            degraded: req.degraded,
            rag_top_k: req.rag_top_k,
            expect_plan: req.expect_plan,
        };

        let started = Instant::now();

        // First-token budget bounds time-to-headers.
        let response = tokio::time::timeout(
            Duration::from_millis(self.endpoint.first_token_budget_ms),
            self.http
                .post(&url)
                .header("x-trace-id", &req.trace_id)
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: format!("backend.{}.first_token", self.route),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })?
        .map_err(|e| Error::Backend {
            route: self.route.to_string(),
            status: 0,
            message: e.to_string(),
        })?;

        let first_token_ms = started.elapsed().as_millis() as u64;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Backend {
                route: self.route.to_string(),
                status: status.as_u16(),
                message: format!("backend returned {status}"),
            });
        }

        // Remaining full budget bounds the body.
        let remaining = self
            .endpoint
            .full_budget_ms
            .saturating_sub(first_token_ms)
            .max(1);
        let wire: GenerateWireReply = tokio::time::timeout(
            Duration::from_millis(remaining),
            response.json::<GenerateWireReply>(),
        )
        .await
        .map_err(|_| Error::Timeout {
            stage: format!("backend.{}.full", self.route),
            elapsed_ms: started.elapsed().as_millis() as u64,
        })?
        .map_err(|e| Error::Backend {
            route: self.route.to_string(),
            status: 0,
            message: format!("invalid reply body: {e}"),
        })?;

        Ok(GenerateReply {
            text: wire.text,
            first_token_ms,
            full_ms: started.elapsed().as_millis() as u64,
        })
    }
}
