//! The contextual bandit router: per-context-bucket arm statistics with
//! an upper-confidence exploit path, a bounded canary exploration path,
//! and atomic snapshot persistence.

mod bandit;
mod snapshot;

pub use bandit::{compute_reward, ArmState, BanditRouter, RouteContext};
pub use snapshot::{load_latest, write_snapshot};
