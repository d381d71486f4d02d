//! Admission control ("the guardian"): samples host health on a fixed
//! cadence, runs a hysteresis state machine, and gates requests before
//! the orchestrator dispatches work.
//!
//! The guardian never blocks the data path: `admit()` is an O(1) read
//! of the latest published snapshot. All mutation happens on a single
//! background sampler task.

mod guardian;
mod sampler;
mod state;

pub use guardian::{Guardian, GuardianSnapshot, TransitionRecord};
pub use sampler::{HostSample, HostSampler};
pub use state::{Admission, AdmissionPolicy, StateMachine, Transition};
