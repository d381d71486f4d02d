//! The L3 negative cache: fingerprints of deterministically failed
//! requests, suppressing retry storms until `retry_after` elapses.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use sv_domain::error::ErrorClass;

use crate::store::StoreError;

/// One negative entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NegativeEntry {
    pub first_seen: DateTime<Utc>,
    pub retry_after_s: u64,
    pub reason: ErrorClass,
    /// Short operator-facing description; PII-masked upstream.
    pub detail: String,
}

impl NegativeEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.first_seen + Duration::seconds(self.retry_after_s as i64)
    }

    /// Remaining suppression window, seconds.
    pub fn remaining_s(&self, now: DateTime<Utc>) -> u64 {
        let expires = self.first_seen + Duration::seconds(self.retry_after_s as i64);
        (expires - now).num_seconds().max(0) as u64
    }
}

/// sled-backed negative store, keyed by fingerprint key.
pub struct NegativeStore {
    tree: sled::Tree,
}

impl NegativeStore {
    pub fn open(db: &sled::Db) -> Result<Self, StoreError> {
        let tree = db
            .open_tree("negative")
            .map_err(|e| StoreError::Backing(e.to_string()))?;
        Ok(Self { tree })
    }

    pub fn get(&self, key: &str, now: DateTime<Utc>) -> Option<NegativeEntry> {
        let raw = self.tree.get(key.as_bytes()).ok().flatten()?;
        let entry: NegativeEntry = serde_json::from_slice(&raw).ok()?;
        if entry.is_expired(now) {
            let _ = self.tree.remove(key.as_bytes());
            return None;
        }
        Some(entry)
    }

    /// Insert, keeping the original `first_seen` when the key is
    /// already present (repeat failures extend nothing).
    pub fn put(&self, key: &str, entry: NegativeEntry) -> Result<(), StoreError> {
        let to_store = match self.get(key, Utc::now()) {
            Some(existing) => NegativeEntry {
                first_seen: existing.first_seen,
                ..entry
            },
            None => entry,
        };
        let raw = serde_json::to_vec(&to_store).map_err(|e| StoreError::Backing(e.to_string()))?;
        self.tree
            .insert(key.as_bytes(), raw)
            .map_err(|e| StoreError::Backing(e.to_string()))?;
        Ok(())
    }

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

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::open_db;

    fn open() -> (tempfile::TempDir, NegativeStore) {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(dir.path()).unwrap();
        (dir, NegativeStore::open(&db).unwrap())
    }

    fn entry(retry_after_s: u64) -> NegativeEntry {
        NegativeEntry {
            first_seen: Utc::now(),
            retry_after_s,
            reason: ErrorClass::Schema,
            detail: "plan failed validation".into(),
        }
    }

    #[test]
    fn fresh_entry_is_returned() {
        let (_dir, store) = open();
        store.put("k1", entry(30)).unwrap();
        let got = store.get("k1", Utc::now()).unwrap();
        assert_eq!(got.reason, ErrorClass::Schema);
        assert!(got.remaining_s(Utc::now()) <= 30);
    }

    #[test]
    fn expired_entry_is_a_miss() {
        let (_dir, store) = open();
        let mut e = entry(30);
        e.first_seen = Utc::now() - Duration::seconds(60);
        store.put("k1", e).unwrap();
        assert!(store.get("k1", Utc::now()).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn repeat_failure_keeps_first_seen() {
        let (_dir, store) = open();
        let first = Utc::now() - Duration::seconds(10);
        let mut e = entry(60);
        e.first_seen = first;
        store.put("k1", e).unwrap();

        store.put("k1", entry(60)).unwrap();
        let got = store.get("k1", Utc::now()).unwrap();
        assert_eq!(got.first_seen, first);
    }
}
