//! Planner output validation and tool execution.
//!
//! A planner backend returns a JSON plan; this crate enforces the
//! strict schema against the versioned tool registry, rebuilds tool
//! arguments deterministically from slot hints, auto-repairs obvious
//! enum synonyms (once), and executes the chosen tool with per-tool
//! breakers and the per-intent fallback matrix.

mod args;
mod execute;
mod registry;
mod tools;
mod validate;

pub use args::build_args;
pub use execute::{ExecutionResult, PlanExecutor};
pub use registry::{ArgKind, ArgSpec, ToolKind, ToolRegistry, ToolSpec};
pub use validate::{validate_plan, ValidatedPlan};
