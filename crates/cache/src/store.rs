//! The L1 exact-match entry store, backed by sled.
//!
//! Keys are namespaced fingerprint keys
//! (`svara:{schema}:{deps}:{intent}:{prefix}`), so version bumps leave
//! old entries unreachable and prefix scans give pattern invalidation.

use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sv_domain::config::CacheLevel;
use sv_domain::turn::Route;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// CacheEntry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One cached response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub route: Route,
    pub intent: String,
    /// Response text shown to the user. PII-masked before storage.
    pub payload: String,
    /// Supporting evidence (tool output, citations). Bounded separately.
    #[serde(default)]
    pub evidence: Option<String>,
    pub created_at: DateTime<Utc>,
    pub ttl_s: u64,
    pub level: CacheLevel,
    /// Whether the payload passed schema validation at build time.
    pub schema_ok: bool,
    /// Canonical tokens of the source text, for the semantic index.
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl CacheEntry {
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::seconds(self.ttl_s as i64)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }
}

/// Why a store was refused. `store()` refusals are guard failures, not
/// I/O errors; the turn proceeds uncached.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("payload exceeds {limit_kb} KB")]
    PayloadTooLarge { limit_kb: usize },
    #[error("evidence exceeds {limit_kb} KB")]
    EvidenceTooLarge { limit_kb: usize },
    #[error("entry intent {entry} does not match key intent {key}")]
    IntentMismatch { entry: String, key: String },
    #[error("entry failed schema validation")]
    SchemaNotOk,
    #[error("HARD level bypasses the positive tiers")]
    HardLevel,
    #[error("backing store: {0}")]
    Backing(String),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EntryStore
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// sled-backed key/value store for positive entries.
pub struct EntryStore {
    tree: sled::Tree,
}

impl EntryStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("entries")
            .map_err(|e| StoreError::Backing(e.to_string()))?;
        Ok(Self { tree })
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let raw = self.tree.get(key.as_bytes()).ok().flatten()?;
        let entry: CacheEntry = serde_json::from_slice(&raw).ok()?;
        if entry.is_expired(now) {
            // Lazy expiry; the semantic index prunes on its own misses.
            let _ = self.tree.remove(key.as_bytes());
            return None;
        }
        Some(entry)
    }

    pub fn put(&self, key: &str, entry: &CacheEntry) -> Result<(), StoreError> {
        let raw = serde_json::to_vec(entry).map_err(|e| StoreError::Backing(e.to_string()))?;
        self.tree
            .insert(key.as_bytes(), raw)
            .map_err(|e| StoreError::Backing(e.to_string()))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        let _ = self.tree.remove(key.as_bytes());
    }

    /// Delete every key with the given prefix. Returns the count.
    pub fn remove_prefix(&self, prefix: &str) -> usize {
        let keys: Vec<sled::IVec> = self
            .tree
            .scan_prefix(prefix.as_bytes())
            .keys()
            .filter_map(|k| k.ok())
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.tree.remove(&key).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Delete every key whose parsed component matches `predicate`.
    /// Components are `svara:{schema}:{deps}:{intent}:{hash}`.
    pub fn remove_matching(&self, predicate: impl Fn(&str, &str, &str) -> bool) -> usize {
        let keys: Vec<sled::IVec> = self
            .tree
            .iter()
            .keys()
            .filter_map(|k| k.ok())
            .filter(|k| {
                let Ok(key) = std::str::from_utf8(k) else {
                    return false;
                };
                let parts: Vec<&str> = key.splitn(5, ':').collect();
                parts.len() == 5 && predicate(parts[1], parts[2], parts[3])
            })
            .collect();
        let mut removed = 0;
        for key in keys {
            if self.tree.remove(&key).is_ok() {
                removed += 1;
            }
        }
        removed
    }

    /// Iterate live entries (used to rebuild the semantic index at
    /// startup).
    pub fn scan_live(&self, now: DateTime<Utc>) -> Vec<(String, CacheEntry)> {
        self.tree
            .iter()
            .filter_map(|kv| kv.ok())
            .filter_map(|(k, v)| {
                let key = std::str::from_utf8(&k).ok()?.to_string();
                let entry: CacheEntry = serde_json::from_slice(&v).ok()?;
                (!entry.is_expired(now)).then_some((key, entry))
            })
            .collect()
    }

    pub fn flush(&self) {
        let _ = self.tree.flush();
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

/// Open the shared sled database under the cache data dir.
pub fn open_db(dir: &Path) -> Result<sled::Db, StoreError> {
    sled::open(dir).map_err(|e| StoreError::Backing(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(intent: &str, ttl_s: u64) -> CacheEntry {
        CacheEntry {
            route: Route::Micro,
            intent: intent.into(),
            payload: "klockan är 14:00".into(),
            evidence: None,
            created_at: Utc::now(),
            ttl_s,
            level: CacheLevel::Easy,
            schema_ok: true,
            tokens: vec!["vad".into(), "är".into(), "klockan".into()],
        }
    }

    fn open_store() -> (tempfile::TempDir, EntryStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        (dir, EntryStore::open(&db).unwrap())
    }

    #[test]
    fn put_then_get_roundtrips() {
        let (_dir, store) = open_store();
        let e = entry("time.now", 60);
        store.put("svara:1:1:time.now:abcd", &e).unwrap();
        let got = store.get("svara:1:1:time.now:abcd", Utc::now()).unwrap();
        assert_eq!(got, e);
    }

    #[test]
    fn expired_entries_read_as_miss_and_are_removed() {
        let (_dir, store) = open_store();
        let mut e = entry("time.now", 60);
        e.created_at = Utc::now() - Duration::seconds(120);
        store.put("svara:1:1:time.now:abcd", &e).unwrap();
        assert!(store.get("svara:1:1:time.now:abcd", Utc::now()).is_none());
        // Lazy delete happened.
        assert!(store.is_empty());
    }

    #[test]
    fn prefix_removal_scopes_to_intent() {
        let (_dir, store) = open_store();
        store.put("svara:1:1:time.now:aaaa", &entry("time.now", 60)).unwrap();
        store.put("svara:1:1:time.now:bbbb", &entry("time.now", 60)).unwrap();
        store
            .put("svara:1:1:weather.lookup:cccc", &entry("weather.lookup", 60))
            .unwrap();

        let removed = store.remove_prefix("svara:1:1:time.now:");
        assert_eq!(removed, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn component_matching_removal() {
        let (_dir, store) = open_store();
        store.put("svara:1:1:time.now:aaaa", &entry("time.now", 60)).unwrap();
        store.put("svara:1:2:time.now:bbbb", &entry("time.now", 60)).unwrap();

        // Remove everything built against deps version 2.
        let removed = store.remove_matching(|_schema, deps, _intent| deps == "2");
        assert_eq!(removed, 1);
        assert!(store.get("svara:1:1:time.now:aaaa", Utc::now()).is_some());
    }

    #[test]
    fn scan_live_skips_expired() {
        let (_dir, store) = open_store();
        store.put("svara:1:1:time.now:aaaa", &entry("time.now", 60)).unwrap();
        let mut old = entry("time.now", 60);
        old.created_at = Utc::now() - Duration::seconds(120);
        store.put("svara:1:1:time.now:bbbb", &old).unwrap();

        assert_eq!(store.scan_live(Utc::now()).len(), 1);
    }
}
