//! The versioned per-turn telemetry event. Field names and types are a
//! wire contract consumed by the data pipeline; changing them requires
//! an `EVENT_VERSION` bump.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use sv_domain::error::ToolCallClass;
use sv_domain::turn::Turn;

pub const EVENT_VERSION: &str = "1";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallEvent {
    pub name: String,
    pub class: ToolCallClass,
    pub lat_ms: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RamPeakMb {
    pub proc: u64,
    pub sys: u64,
}

/// One event per turn, emitted exactly once after all child work
/// terminated. Contains no free text — only the content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnEvent {
    pub v: String,
    /// UTC timestamp, RFC 3339 with `Z`.
    pub ts: String,
    pub trace_id: String,
    pub session_id: String,
    pub route: String,
    pub cache: String,
    pub e2e_first_ms: u64,
    pub e2e_full_ms: u64,
    pub ram_peak_mb: RamPeakMb,
    pub energy_wh: f64,
    pub tool_calls: Vec<ToolCallEvent>,
    pub guardian_state: String,
    pub pii_masked: bool,
    /// SHA-256 of the event body with this field empty.
    pub hash: String,
}

impl TurnEvent {
    /// Build the event from a finished turn. `content_hash` is the
    /// fingerprint digest of the turn's canonical text (never the text
    /// itself).
    pub fn from_turn(turn: &Turn) -> Self {
        let mut event = Self {
            v: EVENT_VERSION.to_string(),
            ts: turn
                .finished_at
                .unwrap_or(turn.received_at)
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            trace_id: turn.trace_id.to_string(),
            session_id: turn.session_id.clone(),
            route: turn
                .route
                .map(|r| r.as_str().to_string())
                .unwrap_or_else(|| "none".to_string()),
            cache: turn.cache_tier.as_str().to_string(),
            e2e_first_ms: turn.timings.backend_first_ms.unwrap_or(0),
            e2e_full_ms: turn.e2e_full_ms().unwrap_or(0),
            ram_peak_mb: RamPeakMb {
                proc: turn.ram_peak_proc_mb,
                sys: turn.ram_peak_sys_mb,
            },
            energy_wh: turn.energy_wh,
            tool_calls: turn
                .tool_calls
                .iter()
                .map(|tc| ToolCallEvent {
                    name: tc.name.clone(),
                    class: tc.class,
                    lat_ms: tc.lat_ms,
                })
                .collect(),
            guardian_state: turn
                .guardian_exit
                .unwrap_or(turn.guardian_entry)
                .as_str()
                .to_string(),
            pii_masked: turn.pii_masked,
            hash: String::new(),
        };
        event.hash = event.compute_hash();
        event
    }

    /// SHA-256 over the serialized event with `hash` emptied. Verifiers
    /// recompute this to detect tampering or truncation.
    pub fn compute_hash(&self) -> String {
        let mut clone = self.clone();
        clone.hash = String::new();
        let raw = serde_json::to_vec(&clone).unwrap_or_default();
        hex::encode(Sha256::digest(raw))
    }

    pub fn verify_hash(&self) -> bool {
        self.hash == self.compute_hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sv_domain::turn::{CacheTier, GuardianState, Route, ToolCallRecord};

    fn turn() -> Turn {
        let mut turn = Turn::new("s-1", "sv", "Hej!", GuardianState::Normal);
        turn.route = Some(Route::Micro);
        turn.cache_tier = CacheTier::L1;
        turn.finished_at = Some(turn.received_at + chrono::Duration::milliseconds(42));
        turn.timings.backend_first_ms = Some(12);
        turn.energy_wh = 0.0001;
        turn.ram_peak_proc_mb = 120;
        turn.ram_peak_sys_mb = 4_100;
        turn.guardian_exit = Some(GuardianState::Normal);
        turn.pii_masked = true;
        turn.tool_calls.push(ToolCallRecord {
            name: "time.now".into(),
            class: ToolCallClass::Ok,
            lat_ms: 1,
        });
        turn
    }

    #[test]
    fn event_carries_required_fields() {
        let event = TurnEvent::from_turn(&turn());
        assert_eq!(event.v, "1");
        assert!(event.ts.ends_with('Z'));
        assert_eq!(event.route, "micro");
        assert_eq!(event.cache, "L1");
        assert_eq!(event.e2e_full_ms, 42);
        assert_eq!(event.ram_peak_mb.proc, 120);
        assert_eq!(event.guardian_state, "normal");
        assert!(event.pii_masked);
        assert_eq!(event.tool_calls.len(), 1);
    }

    #[test]
    fn hash_is_stable_and_verifiable() {
        let event = TurnEvent::from_turn(&turn());
        assert!(!event.hash.is_empty());
        assert!(event.verify_hash());

        let mut tampered = event.clone();
        tampered.e2e_full_ms = 9_999;
        assert!(!tampered.verify_hash());
    }

    #[test]
    fn wire_shape_is_versioned_json() {
        let event = TurnEvent::from_turn(&turn());
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["v"], "1");
        assert_eq!(json["tool_calls"][0]["class"], "ok");
        assert!(json["ram_peak_mb"]["sys"].is_u64());
    }

    #[test]
    fn roundtrip_preserves_hash_validity() {
        let event = TurnEvent::from_turn(&turn());
        let line = serde_json::to_string(&event).unwrap();
        let parsed: TurnEvent = serde_json::from_str(&line).unwrap();
        assert!(parsed.verify_hash());
    }
}
