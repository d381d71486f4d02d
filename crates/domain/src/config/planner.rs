use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Planner validation & execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Versioned tool/render registry file (closed enum sets, arg
    /// schemas, repair synonyms, fallback matrix).
    #[serde(default = "d_registry_path")]
    pub registry_path: PathBuf,
    /// When false (the default), tool args are rebuilt deterministically
    /// from slot hints; the model's args are hints only.
    #[serde(default)]
    pub args_from_model: bool,
    /// Auto-repair attempts per turn, at most one.
    #[serde(default = "d_repair_budget")]
    pub repair_budget: u32,
    /// Per-tool invocation timeout.
    #[serde(default = "d_tool_timeout_ms")]
    pub tool_timeout_ms: u64,
    /// RAG top-K in NORMAL vs BROWNOUT (degraded planner).
    #[serde(default = "d_rag_top_k")]
    pub rag_top_k: usize,
    #[serde(default = "d_rag_top_k_degraded")]
    pub rag_top_k_degraded: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            registry_path: d_registry_path(),
            args_from_model: false,
            repair_budget: d_repair_budget(),
            tool_timeout_ms: d_tool_timeout_ms(),
            rag_top_k: d_rag_top_k(),
            rag_top_k_degraded: d_rag_top_k_degraded(),
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_registry_path() -> PathBuf {
    PathBuf::from("./config/tool_registry.toml")
}
fn d_repair_budget() -> u32 {
    1
}
fn d_tool_timeout_ms() -> u64 {
    800
}
fn d_rag_top_k() -> usize {
    8
}
fn d_rag_top_k_degraded() -> usize {
    3
}
