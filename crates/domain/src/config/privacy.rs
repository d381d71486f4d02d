use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Privacy
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Mask emails, phone numbers, personnummer, and full names before
    /// any text is stored or logged.
    #[serde(default = "d_true")]
    pub pii_masking: bool,
    /// Session-level telemetry retention.
    #[serde(default = "d_session_retention_days")]
    pub session_retention_days: u32,
    /// Aggregate telemetry retention.
    #[serde(default = "d_aggregate_retention_days")]
    pub aggregate_retention_days: u32,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            pii_masking: true,
            session_retention_days: d_session_retention_days(),
            aggregate_retention_days: d_aggregate_retention_days(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_session_retention_days() -> u32 {
    7
}
fn d_aggregate_retention_days() -> u32 {
    30
}
