use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// NLU gateway
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NluConfig {
    #[serde(default = "d_base_url")]
    pub base_url: String,
    /// Hard budget for the classify call. The gateway falls back to
    /// rules when this elapses.
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
    /// Below this confidence the entailment service (if configured) is
    /// consulted for a second opinion.
    #[serde(default = "d_low_confidence")]
    pub low_confidence: f32,
    /// Optional XNLI-style entailment endpoint.
    #[serde(default)]
    pub entailment_url: Option<String>,
    #[serde(default = "d_entailment_timeout_ms")]
    pub entailment_timeout_ms: u64,
}

impl Default for NluConfig {
    fn default() -> Self {
        Self {
            base_url: d_base_url(),
            timeout_ms: d_timeout_ms(),
            low_confidence: d_low_confidence(),
            entailment_url: None,
            entailment_timeout_ms: d_entailment_timeout_ms(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_base_url() -> String {
    "http://127.0.0.1:9100".into()
}
fn d_timeout_ms() -> u64 {
    80
}
fn d_low_confidence() -> f32 {
    0.5
}
fn d_entailment_timeout_ms() -> u64 {
    120
}
