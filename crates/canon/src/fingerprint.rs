//! Deterministic cache fingerprints.
//!
//! A fingerprint is a SHA-256 over the canonical request fields in a
//! fixed order, keyed under a namespace that encodes the schema and
//! deps versions — bumping either version makes every prior entry
//! unreachable by construction.

use sha2::{Digest, Sha256};

/// Length of the hash prefix used as the key.
const KEY_PREFIX_CHARS: usize = 16;

/// Field separator inside the hashed byte stream. Unit-separator keeps
/// field boundaries unambiguous for any text content.
const SEP: &[u8] = &[0x1f];

/// The canonical fields that uniquely determine a route's input.
///
/// `text` and `context_facts` must already be canonicalized (see
/// [`crate::Canonicalizer`]); the constructor does not re-normalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    pub text: String,
    pub intent: String,
    /// Stable-sorted, deduped context facts.
    pub context_facts: Vec<String>,
    pub schema_version: String,
    pub deps_version: String,
    pub locale: String,
    pub persona_mode: String,
    /// Present only for time-sensitive intents (weather, time, news).
    pub time_bucket: Option<String>,
    pub safety_mode: String,
    pub model_id: String,
}

/// A computed fingerprint: the full digest plus the namespaced key used
/// in the backing store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    /// Full hex digest (kept for telemetry content hashing).
    pub digest: String,
    /// Namespaced store key:
    /// `svara:{schema}:{deps}:{intent}:{prefix}`.
    pub key: String,
    pub intent: String,
}

impl CanonicalRequest {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        // Fixed field order; never reorder without bumping schema_version.
        hasher.update(self.text.as_bytes());
        hasher.update(SEP);
        hasher.update(self.intent.as_bytes());
        hasher.update(SEP);
        for fact in &self.context_facts {
            hasher.update(fact.as_bytes());
            hasher.update(SEP);
        }
        hasher.update(self.schema_version.as_bytes());
        hasher.update(SEP);
        hasher.update(self.deps_version.as_bytes());
        hasher.update(SEP);
        hasher.update(self.locale.as_bytes());
        hasher.update(SEP);
        hasher.update(self.persona_mode.as_bytes());
        hasher.update(SEP);
        if let Some(bucket) = &self.time_bucket {
            hasher.update(bucket.as_bytes());
        }
        hasher.update(SEP);
        hasher.update(self.safety_mode.as_bytes());
        hasher.update(SEP);
        hasher.update(self.model_id.as_bytes());

        let digest = hex::encode(hasher.finalize());
        let key = format!(
            "svara:{}:{}:{}:{}",
            self.schema_version,
            self.deps_version,
            self.intent,
            &digest[..KEY_PREFIX_CHARS]
        );
        Fingerprint {
            digest,
            key,
            intent: self.intent.clone(),
        }
    }
}

impl Fingerprint {
    /// Store-key prefix that covers every entry of one intent under the
    /// current versions. Used for pattern invalidation.
    pub fn intent_prefix(schema_version: &str, deps_version: &str, intent: &str) -> String {
        format!("svara:{schema_version}:{deps_version}:{intent}:")
    }

    /// Store-key prefix covering everything under a version pair.
    pub fn version_prefix(schema_version: &str, deps_version: &str) -> String {
        format!("svara:{schema_version}:{deps_version}:")
    }
}
