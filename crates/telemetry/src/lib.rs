//! Per-turn telemetry: the versioned event schema, the append-only
//! JSONL recorder with rolling latency windows, the energy model, and
//! the SLO gate evaluation exported to the status API.

mod energy;
mod event;
mod outcomes;
mod recorder;
mod slo;

pub use energy::estimate_energy_wh;
pub use event::{RamPeakMb, ToolCallEvent, TurnEvent, EVENT_VERSION};
pub use outcomes::{append_outcome, OutcomeRecord};
pub use recorder::{sweep_retention, RouteLatencyStats, TelemetryRecorder, TelemetrySnapshot};
pub use slo::{evaluate_slo, GateResult, SloReport};
