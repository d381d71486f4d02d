//! Planner output contract.
//!
//! A planner-route backend must return exactly this JSON object; unknown
//! keys are rejected at deserialization. `tool` and `render_instruction`
//! are free strings here — membership in the closed enum sets is
//! enforced by the planner validator against the versioned registry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A validated-shape plan as produced by a planner backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Plan {
    pub intent: String,
    pub tool: String,
    /// Tool arguments. When `planner.args_from_model` is false these are
    /// treated as hints only and rebuilt deterministically from slots.
    #[serde(default)]
    pub args: BTreeMap<String, Value>,
    pub render_instruction: String,
    pub confidence: f32,
    #[serde(default)]
    pub reason: String,
}

impl Plan {
    /// A minimal plan that renders a plain reply without any tool.
    pub fn speak(intent: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            tool: "none".into(),
            args: BTreeMap::new(),
            render_instruction: "speak".into(),
            confidence: 1.0,
            reason: reason.into(),
        }
    }
}
