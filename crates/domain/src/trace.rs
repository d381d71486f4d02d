//! Structured runtime events. A closed set with fixed fields — no
//! free-form logging of pipeline decisions. These integrate with the
//! `tracing` crate and are machine-parseable.

use serde::Serialize;

use crate::turn::{CacheTier, GuardianState, Route};

/// Structured events emitted by the orchestrator and its components.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    /// Guardian changed state.
    GuardianTransition {
        from: GuardianState,
        to: GuardianState,
        reasons: Vec<String>,
    },

    /// Cache lookup resolved.
    CacheDecision {
        tier: CacheTier,
        intent: String,
        key_prefix: String,
    },

    /// The router settled on an arm (after clamping).
    RouteChosen {
        route: Route,
        proposed: Route,
        demoted: bool,
    },

    /// A plan failed validation and was repaired.
    PlanRepaired { tool: String, fixes: usize },

    /// A circuit breaker changed state.
    BreakerTransition {
        dependency: String,
        from: String,
        to: String,
    },

    /// Bandit arm state was snapshotted to disk.
    SnapshotWritten { path: String, arms: usize },

    /// Telemetry events were flushed to the daily file.
    TelemetryFlushed { events: usize },
}

impl TraceEvent {
    /// Emit this event as a tracing event under a fixed field.
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "svara_event");
    }
}
