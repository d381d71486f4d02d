//! Multi-tier response cache: L1 exact (sled-backed), L2 semantic
//! (same-intent token similarity), L3 negative (failure suppression),
//! plus keyed single-flight so concurrent identical fingerprints share
//! one build.

mod negative;
mod semantic;
mod singleflight;
mod store;
mod tiers;

pub use negative::NegativeEntry;
pub use semantic::{token_similarity, Candidate, SemanticIndex};
pub use singleflight::{FlightOutcome, FlightTicket, LeaderGuard, SingleFlight};
pub use store::{CacheEntry, EntryStore, StoreError};
pub use tiers::{CacheOutcome, CacheStats, InvalidateFilter, TieredCache};
