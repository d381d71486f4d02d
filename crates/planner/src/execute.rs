//! Plan execution: invoke the chosen tool through the registry with a
//! per-tool timeout and breaker, then walk the per-intent fallback
//! matrix — at most one chain per turn, never an automatic retry on
//! the same tool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::DateTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use sv_domain::error::{ErrorClass, ToolCallClass};
use sv_domain::plan::Plan;
use sv_domain::turn::{degrade_notice, DegradeReason, ToolCallRecord};
use sv_domain::{Error, Result};

use sv_resilience::BreakerRegistry;

use crate::args::build_args;
use crate::registry::{ToolKind, ToolRegistry, ToolSpec};
use crate::tools::{render_response, run_builtin};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Serialize)]
struct ToolWireRequest<'a> {
    v: &'static str,
    tool: &'a str,
    args: &'a BTreeMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ToolWireReply {
    text: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ExecutionResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of executing one plan, including every tool call made.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub reply_text: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub used_fallback: bool,
    pub success: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PlanExecutor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct PlanExecutor {
    registry: Arc<ToolRegistry>,
    breakers: Arc<BreakerRegistry>,
    http: reqwest::Client,
    default_timeout_ms: u64,
    trust_model_args: bool,
}

impl PlanExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        breakers: Arc<BreakerRegistry>,
        default_timeout_ms: u64,
        trust_model_args: bool,
    ) -> Self {
        Self {
            registry,
            breakers,
            http: reqwest::Client::new(),
            default_timeout_ms,
            trust_model_args,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Execute a validated plan. Candidate order is the plan's tool
    /// followed by the intent's fallback chain; the walk stops at the
    /// first success, at the first non-fallbackable error, or at the
    /// end of the chain (degraded user message).
    pub async fn execute(
        &self,
        plan: &Plan,
        slots: &BTreeMap<String, String>,
        now: DateTime<Tz>,
    ) -> ExecutionResult {
        let mut candidates: Vec<String> = vec![plan.tool.clone()];
        for name in self.registry.fallback_chain(&plan.intent) {
            if !candidates.contains(name) {
                candidates.push(name.clone());
            }
        }

        let mut tool_calls = Vec::new();

        for (idx, tool_name) in candidates.iter().enumerate() {
            let Some(spec) = self.registry.tool(tool_name) else {
                continue;
            };

            // Arguments are rebuilt per candidate: a fallback tool has
            // its own schema.
            let args = match build_args(spec, slots, &plan.args, self.trust_model_args, now) {
                Ok(args) => args,
                Err(e) => {
                    tool_calls.push(ToolCallRecord {
                        name: tool_name.clone(),
                        class: ToolCallClass::Schema,
                        lat_ms: 0,
                    });
                    tracing::debug!(tool = %tool_name, error = %e, "fallback candidate skipped: args");
                    continue;
                }
            };

            let started = Instant::now();
            let outcome = self.invoke(spec, &args, now).await;
            let lat_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(output) => {
                    tool_calls.push(ToolCallRecord {
                        name: tool_name.clone(),
                        class: ToolCallClass::Ok,
                        lat_ms,
                    });
                    return ExecutionResult {
                        reply_text: render_response(plan, &output),
                        tool_calls,
                        used_fallback: idx > 0,
                        success: true,
                    };
                }
                Err(e) => {
                    let class = tool_call_class(&e);
                    tool_calls.push(ToolCallRecord {
                        name: tool_name.clone(),
                        class,
                        lat_ms,
                    });
                    tracing::warn!(tool = %tool_name, error = %e, "tool invocation failed");
                    // An open tool breaker is not retried, but the
                    // chain may continue to a different tool.
                    let chain_may_continue = e.class().allows_fallback()
                        || matches!(e, Error::BreakerOpen { .. });
                    if !chain_may_continue {
                        break;
                    }
                }
            }
        }

        ExecutionResult {
            reply_text: degrade_notice(DegradeReason::ToolUnavailable).to_string(),
            tool_calls,
            used_fallback: true,
            success: false,
        }
    }

    async fn invoke(
        &self,
        spec: &ToolSpec,
        args: &BTreeMap<String, Value>,
        now: DateTime<Tz>,
    ) -> Result<String> {
        let breaker_name = format!("tool.{}", spec.name);
        if let Err(retry_after_s) = self.breakers.allow(&breaker_name) {
            return Err(Error::BreakerOpen {
                dependency: breaker_name,
                retry_after_s,
            });
        }

        let result = match spec.kind {
            ToolKind::Builtin => run_builtin(&spec.name, args, now),
            ToolKind::Http => self.invoke_http(spec, args).await,
        };
        self.breakers.record(&breaker_name, result.is_ok());
        result
    }

    async fn invoke_http(&self, spec: &ToolSpec, args: &BTreeMap<String, Value>) -> Result<String> {
        let endpoint = spec
            .endpoint
            .as_deref()
            .ok_or_else(|| Error::Internal(format!("http tool {} without endpoint", spec.name)))?;
        let timeout_ms = spec.timeout_ms.unwrap_or(self.default_timeout_ms);
        let body = ToolWireRequest {
            v: "1",
            tool: &spec.name,
            args,
        };

        let started = Instant::now();
        let response = tokio::time::timeout(
            Duration::from_millis(timeout_ms),
            self.http.post(endpoint).json(&body).send(),
        )
        .await
        .map_err(|_| Error::Tool {
            tool: spec.name.clone(),
            class: ToolCallClass::Timeout,
            message: format!("timed out after {timeout_ms}ms"),
        })?
        .map_err(|e| Error::Tool {
            tool: spec.name.clone(),
            class: ToolCallClass::Other,
            message: e.to_string(),
        })?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(Error::Tool {
                tool: spec.name.clone(),
                class: ToolCallClass::TooManyRequests,
                message: "tool rate limited".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::Tool {
                tool: spec.name.clone(),
                class: ToolCallClass::FiveXx,
                message: format!("tool returned {status}"),
            });
        }

        let remaining = timeout_ms.saturating_sub(started.elapsed().as_millis() as u64).max(1);
        let wire: ToolWireReply =
            tokio::time::timeout(Duration::from_millis(remaining), response.json())
                .await
                .map_err(|_| Error::Tool {
                    tool: spec.name.clone(),
                    class: ToolCallClass::Timeout,
                    message: "reply body over budget".into(),
                })?
                .map_err(|e| Error::Tool {
                    tool: spec.name.clone(),
                    class: ToolCallClass::Schema,
                    message: format!("invalid tool reply: {e}"),
                })?;
        Ok(wire.text)
    }
}

/// Map an invocation error onto the telemetry tool-call class.
fn tool_call_class(e: &Error) -> ToolCallClass {
    match e {
        Error::Tool { class, .. } => *class,
        Error::Timeout { .. } => ToolCallClass::Timeout,
        Error::Schema(_) => ToolCallClass::Schema,
        _ => match e.class() {
            ErrorClass::RateLimited => ToolCallClass::TooManyRequests,
            ErrorClass::Backend5xx => ToolCallClass::FiveXx,
            _ => ToolCallClass::Other,
        },
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
