//! Shared domain types for the Svara orchestrator: configuration, the
//! error taxonomy, turn/route/plan models, and structured trace events.
//!
//! Every other crate in the workspace depends on this one and nothing
//! else inside the workspace, which keeps the component graph acyclic.

pub mod config;
pub mod error;
pub mod plan;
pub mod trace;
pub mod turn;

pub use error::{Error, ErrorClass, Result, ToolCallClass};
