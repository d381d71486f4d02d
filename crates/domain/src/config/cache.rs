use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache (L1 exact / L2 semantic / L3 negative)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Response difficulty level. Only EASY/MEDIUM responses are stored in
/// L1/L2; HARD bypasses the positive tiers to prevent stale writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheLevel {
    Easy,
    Medium,
    Hard,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Token-similarity threshold for an L2 hit.
    #[serde(default = "d_semantic_threshold")]
    pub semantic_threshold: f64,
    /// Candidates scored per L2 lookup.
    #[serde(default = "d_semantic_top_k")]
    pub semantic_top_k: usize,

    /// TTLs by level, seconds.
    #[serde(default = "d_ttl_easy")]
    pub ttl_easy_s: u64,
    #[serde(default = "d_ttl_medium")]
    pub ttl_medium_s: u64,
    #[serde(default = "d_ttl_hard")]
    pub ttl_hard_s: u64,
    /// Default negative-entry TTL when the provider gave no retry_after.
    #[serde(default = "d_negative_ttl")]
    pub negative_ttl_s: u64,

    /// Stored-entry size bounds.
    #[serde(default = "d_max_payload_kb")]
    pub max_payload_kb: usize,
    #[serde(default = "d_max_evidence_kb")]
    pub max_evidence_kb: usize,

    /// Key namespace components. Bumping either makes every prior entry
    /// unreachable by construction.
    #[serde(default = "d_schema_version")]
    pub schema_version: String,
    #[serde(default = "d_deps_version")]
    pub deps_version: String,

    /// Backing store data directory.
    #[serde(default = "d_data_dir")]
    pub data_dir: PathBuf,
}

impl CacheConfig {
    pub fn ttl_for(&self, level: CacheLevel) -> u64 {
        match level {
            CacheLevel::Easy => self.ttl_easy_s,
            CacheLevel::Medium => self.ttl_medium_s,
            CacheLevel::Hard => self.ttl_hard_s,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            semantic_threshold: d_semantic_threshold(),
            semantic_top_k: d_semantic_top_k(),
            ttl_easy_s: d_ttl_easy(),
            ttl_medium_s: d_ttl_medium(),
            ttl_hard_s: d_ttl_hard(),
            negative_ttl_s: d_negative_ttl(),
            max_payload_kb: d_max_payload_kb(),
            max_evidence_kb: d_max_evidence_kb(),
            schema_version: d_schema_version(),
            deps_version: d_deps_version(),
            data_dir: d_data_dir(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_true() -> bool {
    true
}
fn d_semantic_threshold() -> f64 {
    0.85
}
fn d_semantic_top_k() -> usize {
    16
}
fn d_ttl_easy() -> u64 {
    3_600
}
fn d_ttl_medium() -> u64 {
    1_800
}
fn d_ttl_hard() -> u64 {
    300
}
fn d_negative_ttl() -> u64 {
    30
}
fn d_max_payload_kb() -> usize {
    128
}
fn d_max_evidence_kb() -> usize {
    64
}
fn d_schema_version() -> String {
    "1".into()
}
fn d_deps_version() -> String {
    "1".into()
}
fn d_data_dir() -> PathBuf {
    PathBuf::from("./state/cache")
}
