//! Dependency protection: per-dependency circuit breakers and per-route
//! sliding-window quotas with concurrency slots.
//!
//! Both are shared read-mostly structures with short internal locks; no
//! global lock, nothing on the data path blocks.

mod breaker;
mod quota;

pub use breaker::{Breaker, BreakerConfig, BreakerRegistry, BreakerState};
pub use quota::{QuotaExceeded, RouteQuotas, RouteSlot, RouteWindowStats};
