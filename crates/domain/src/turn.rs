//! Core turn model: routes, cache tiers, guardian states, intent
//! results, and the per-turn record the orchestrator builds up and the
//! telemetry recorder consumes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ToolCallClass;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Route
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Generative backend arm. The set is closed; the registry of backends
/// is keyed by this enum, never by subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    Micro,
    Planner,
    Deep,
}

impl Route {
    pub const ALL: [Route; 3] = [Route::Micro, Route::Planner, Route::Deep];

    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Micro => "micro",
            Route::Planner => "planner",
            Route::Deep => "deep",
        }
    }

    /// Demotion order when an arm is inadmissible: deep → planner → micro.
    pub fn demote(&self) -> Option<Route> {
        match self {
            Route::Deep => Some(Route::Planner),
            Route::Planner => Some(Route::Micro),
            Route::Micro => None,
        }
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CacheTier
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which cache tier served (or didn't serve) a turn. Surfaced in the
/// `X-Cache` header and the telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheTier {
    L1,
    L2,
    L3,
    #[serde(rename = "miss")]
    Miss,
    /// Cache disabled or errored; the turn ran without it.
    #[serde(rename = "bypass")]
    Bypass,
}

impl CacheTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTier::L1 => "L1",
            CacheTier::L2 => "L2",
            CacheTier::L3 => "L3",
            CacheTier::Miss => "miss",
            CacheTier::Bypass => "bypass",
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, CacheTier::L1 | CacheTier::L2 | CacheTier::L3)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GuardianState
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Admission-control state. Transitions are owned by the guardian
/// sampler task; everyone else only reads snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardianState {
    Normal,
    Brownout,
    Emergency,
    Lockdown,
}

impl GuardianState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardianState::Normal => "normal",
            GuardianState::Brownout => "brownout",
            GuardianState::Emergency => "emergency",
            GuardianState::Lockdown => "lockdown",
        }
    }
}

impl std::fmt::Display for GuardianState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// IntentResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where an intent classification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentSource {
    /// Deterministic regex guard short-circuit.
    Guard,
    /// The NLU service.
    Nlu,
    /// Entailment second opinion on low NLU confidence.
    Entailment,
    /// Rule-based fallback after an NLU error or timeout.
    Fallback,
}

/// Result of intent classification for one turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub confidence: f32,
    /// Slot hints extracted by the classifier (e.g. `person`, `when`).
    #[serde(default)]
    pub slots: BTreeMap<String, String>,
    #[serde(default)]
    pub route_hint: Option<Route>,
    /// Carried through to telemetry; no routing effect.
    #[serde(default)]
    pub mood_score: Option<f32>,
    pub source: IntentSource,
}

impl IntentResult {
    /// Intents whose answers depend on wall-clock time. Only these get a
    /// time bucket in their fingerprint.
    pub fn is_time_sensitive(intent: &str) -> bool {
        matches!(
            intent,
            "weather.lookup" | "time.now" | "news.briefing"
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turn record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One executed tool call, as recorded in the turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub class: ToolCallClass,
    pub lat_ms: u64,
}

/// Per-stage latency breakdown in milliseconds. Stages that did not run
/// stay `None`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub cache_lookup_ms: Option<u64>,
    pub nlu_ms: Option<u64>,
    pub backend_first_ms: Option<u64>,
    pub backend_full_ms: Option<u64>,
    pub plan_ms: Option<u64>,
    pub store_ms: Option<u64>,
}

/// The turn entity. Created at ingress, exclusively owned by the
/// orchestrator for its lifetime, flushed to telemetry once at the end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub trace_id: Uuid,
    pub session_id: String,
    pub lang: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    pub intent: Option<IntentResult>,
    pub route: Option<Route>,
    pub cache_tier: CacheTier,
    pub tool_calls: Vec<ToolCallRecord>,
    pub timings: StageTimings,

    pub energy_wh: f64,
    pub ram_peak_proc_mb: u64,
    pub ram_peak_sys_mb: u64,
    pub guardian_entry: GuardianState,
    pub guardian_exit: Option<GuardianState>,
    pub pii_masked: bool,
}

impl Turn {
    pub fn new(
        session_id: impl Into<String>,
        lang: impl Into<String>,
        text: impl Into<String>,
        guardian_entry: GuardianState,
    ) -> Self {
        Self {
            trace_id: Uuid::new_v4(),
            session_id: session_id.into(),
            lang: lang.into(),
            text: text.into(),
            received_at: Utc::now(),
            finished_at: None,
            intent: None,
            route: None,
            cache_tier: CacheTier::Miss,
            tool_calls: Vec::new(),
            timings: StageTimings::default(),
            energy_wh: 0.0,
            ram_peak_proc_mb: 0,
            ram_peak_sys_mb: 0,
            guardian_entry,
            guardian_exit: None,
            pii_masked: false,
        }
    }

    /// End-to-end full latency once finished.
    pub fn e2e_full_ms(&self) -> Option<u64> {
        self.finished_at
            .map(|end| (end - self.received_at).num_milliseconds().max(0) as u64)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Degradation notices
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reason a turn ran degraded. Mapped onto a fixed Swedish phrase table;
/// responses never carry stack traces or internals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradeReason {
    LighterMode,
    CachedOnly,
    ToolUnavailable,
    Busy,
}

/// Fixed natural-language notices for degraded operation.
pub fn degrade_notice(reason: DegradeReason) -> &'static str {
    match reason {
        DegradeReason::LighterMode => "Jag växlar till ett lättare läge för snabbare svar.",
        DegradeReason::CachedOnly => "Jag svarar från minnet just nu för att spara resurser.",
        DegradeReason::ToolUnavailable => {
            "Tjänsten är inte tillgänglig just nu, jag gör mitt bästa ändå."
        }
        DegradeReason::Busy => "Jag har mycket att göra just nu, försök igen om en liten stund.",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_wire_format_is_lowercase() {
        assert_eq!(serde_json::to_string(&Route::Micro).unwrap(), "\"micro\"");
        assert_eq!(serde_json::to_string(&Route::Deep).unwrap(), "\"deep\"");
        let r: Route = serde_json::from_str("\"planner\"").unwrap();
        assert_eq!(r, Route::Planner);
    }

    #[test]
    fn demotion_chain_terminates_at_micro() {
        assert_eq!(Route::Deep.demote(), Some(Route::Planner));
        assert_eq!(Route::Planner.demote(), Some(Route::Micro));
        assert_eq!(Route::Micro.demote(), None);
    }

    #[test]
    fn cache_tier_hit_classification() {
        assert!(CacheTier::L1.is_hit());
        assert!(CacheTier::L2.is_hit());
        assert!(CacheTier::L3.is_hit());
        assert!(!CacheTier::Miss.is_hit());
        assert!(!CacheTier::Bypass.is_hit());
    }

    #[test]
    fn time_sensitivity_is_a_closed_set() {
        assert!(IntentResult::is_time_sensitive("weather.lookup"));
        assert!(IntentResult::is_time_sensitive("time.now"));
        assert!(!IntentResult::is_time_sensitive("greeting.hello"));
        assert!(!IntentResult::is_time_sensitive("calendar.create"));
    }

    #[test]
    fn turn_latency_requires_finish() {
        let mut turn = Turn::new("s1", "sv", "hej", GuardianState::Normal);
        assert_eq!(turn.e2e_full_ms(), None);
        turn.finished_at = Some(turn.received_at + chrono::Duration::milliseconds(120));
        assert_eq!(turn.e2e_full_ms(), Some(120));
    }

    #[test]
    fn degrade_notices_are_swedish_and_fixed() {
        for reason in [
            DegradeReason::LighterMode,
            DegradeReason::CachedOnly,
            DegradeReason::ToolUnavailable,
            DegradeReason::Busy,
        ] {
            let notice = degrade_notice(reason);
            assert!(!notice.is_empty());
            assert!(!notice.contains("panic"));
        }
    }
}
