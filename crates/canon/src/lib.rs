//! Deterministic text canonicalization, cache fingerprinting, and PII
//! masking for Swedish user turns.
//!
//! Everything in this crate is a pure function of its inputs (wall-clock
//! time is always passed in, never read), so fingerprints are stable
//! across processes and restarts.

pub mod datetime;
pub mod fingerprint;
pub mod normalize;
pub mod pii;

pub use datetime::{resolve_when, time_bucket};
pub use fingerprint::{CanonicalRequest, Fingerprint};
pub use normalize::Canonicalizer;
pub use pii::PiiMasker;
