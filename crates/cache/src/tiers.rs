//! The tiered cache facade: L1 exact → L2 semantic → L3 negative, with
//! store guards, pattern invalidation, and the per-fingerprint
//! single-flight group.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use sv_canon::Fingerprint;
use sv_domain::config::{CacheConfig, CacheLevel};
use sv_domain::error::ErrorClass;
use sv_domain::trace::TraceEvent;
use sv_domain::turn::CacheTier;

use crate::negative::{NegativeEntry, NegativeStore};
use crate::semantic::SemanticIndex;
use crate::singleflight::SingleFlight;
use crate::store::{open_db, CacheEntry, EntryStore, StoreError};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Result of a tiered lookup. `tier` is the first tier that answered;
/// exactly one of `entry` / `negative` is set on a hit.
#[derive(Debug, Clone)]
pub struct CacheOutcome {
    pub tier: CacheTier,
    pub entry: Option<CacheEntry>,
    pub negative: Option<NegativeEntry>,
    pub similarity: Option<f64>,
}

impl CacheOutcome {
    fn miss() -> Self {
        Self {
            tier: CacheTier::Miss,
            entry: None,
            negative: None,
            similarity: None,
        }
    }

    fn bypass() -> Self {
        Self {
            tier: CacheTier::Bypass,
            entry: None,
            negative: None,
            similarity: None,
        }
    }
}

/// Invalidation filters (the admin API shape).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidateFilter {
    Intent(String),
    SchemaVersion(String),
    DepsVersion(String),
}

/// Counters for the status API.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub negatives: usize,
    pub indexed: usize,
    pub inflight: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TieredCache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TieredCache {
    cfg: CacheConfig,
    entries: EntryStore,
    negatives: NegativeStore,
    index: SemanticIndex,
    flight: SingleFlight<CacheEntry>,
}

impl TieredCache {
    /// Open the backing store and rebuild the semantic index from live
    /// entries under the current version namespace.
    pub fn open(cfg: CacheConfig) -> Result<Self, StoreError> {
        let db = open_db(&cfg.data_dir)?;
        let entries = EntryStore::open(&db)?;
        let negatives = NegativeStore::open(&db)?;
        let index = SemanticIndex::new();

        let prefix = Fingerprint::version_prefix(&cfg.schema_version, &cfg.deps_version);
        for (key, entry) in entries.scan_live(Utc::now()) {
            if key.starts_with(&prefix) {
                index.insert(&entry.intent, &key, entry.tokens.clone());
            }
        }

        Ok(Self {
            cfg,
            entries,
            negatives,
            index,
            flight: SingleFlight::new(),
        })
    }

    /// The keyed single-flight group for fingerprint builds.
    pub fn flight(&self) -> &SingleFlight<CacheEntry> {
        &self.flight
    }

    /// Tiered lookup: L1 exact, then L2 semantic within the same
    /// intent, then L3 negative.
    pub fn lookup(&self, fp: &Fingerprint, tokens: &[String], now: DateTime<Utc>) -> CacheOutcome {
        if !self.cfg.enabled {
            return CacheOutcome::bypass();
        }

        // ── L1 exact ─────────────────────────────────────────────────
        if let Some(entry) = self.entries.get(&fp.key, now) {
            if entry.intent == fp.intent {
                self.trace(CacheTier::L1, fp);
                return CacheOutcome {
                    tier: CacheTier::L1,
                    entry: Some(entry),
                    negative: None,
                    similarity: None,
                };
            }
            // Key collision across intents cannot happen by
            // construction; treat it as corruption and drop the entry.
            self.entries.remove(&fp.key);
        }

        // ── L2 semantic (same intent namespace only) ────────────────
        let version_prefix =
            Fingerprint::version_prefix(&self.cfg.schema_version, &self.cfg.deps_version);
        let candidates = self.index.candidates(
            &fp.intent,
            tokens,
            self.cfg.semantic_threshold,
            self.cfg.semantic_top_k,
        );
        for candidate in candidates {
            if !candidate.key.starts_with(&version_prefix) {
                self.index.remove(&fp.intent, &candidate.key);
                continue;
            }
            match self.entries.get(&candidate.key, now) {
                Some(entry) if entry.intent == fp.intent => {
                    self.trace(CacheTier::L2, fp);
                    return CacheOutcome {
                        tier: CacheTier::L2,
                        entry: Some(entry),
                        negative: None,
                        similarity: Some(candidate.similarity),
                    };
                }
                _ => {
                    // TTL expired (or gone): prune the index entry.
                    self.index.remove(&fp.intent, &candidate.key);
                }
            }
        }

        // ── L3 negative ──────────────────────────────────────────────
        if let Some(negative) = self.negatives.get(&fp.key, now) {
            self.trace(CacheTier::L3, fp);
            return CacheOutcome {
                tier: CacheTier::L3,
                entry: None,
                negative: Some(negative),
                similarity: None,
            };
        }

        CacheOutcome::miss()
    }

    /// Store a built response. Guards: enabled, EASY/MEDIUM only,
    /// schema_ok, intent match, size bounds.
    pub fn store(&self, fp: &Fingerprint, entry: CacheEntry) -> Result<(), StoreError> {
        if !self.cfg.enabled {
            return Ok(());
        }
        if entry.level == CacheLevel::Hard {
            return Err(StoreError::HardLevel);
        }
        if !entry.schema_ok {
            return Err(StoreError::SchemaNotOk);
        }
        if entry.intent != fp.intent {
            return Err(StoreError::IntentMismatch {
                entry: entry.intent,
                key: fp.intent.clone(),
            });
        }
        if entry.payload.len() > self.cfg.max_payload_kb * 1024 {
            return Err(StoreError::PayloadTooLarge {
                limit_kb: self.cfg.max_payload_kb,
            });
        }
        if let Some(evidence) = &entry.evidence {
            if evidence.len() > self.cfg.max_evidence_kb * 1024 {
                return Err(StoreError::EvidenceTooLarge {
                    limit_kb: self.cfg.max_evidence_kb,
                });
            }
        }

        self.entries.put(&fp.key, &entry)?;
        self.index.insert(&fp.intent, &fp.key, entry.tokens.clone());
        self.entries.flush();
        Ok(())
    }

    /// Store a negative outcome. Only deterministic error classes are
    /// persisted (a timeout must not suppress retries); returns whether
    /// the entry was stored.
    pub fn store_negative(
        &self,
        fp: &Fingerprint,
        reason: ErrorClass,
        detail: impl Into<String>,
        retry_after_s: Option<u64>,
    ) -> bool {
        if !self.cfg.enabled || !reason.is_deterministic() {
            return false;
        }
        let entry = NegativeEntry {
            first_seen: Utc::now(),
            retry_after_s: retry_after_s.unwrap_or(self.cfg.negative_ttl_s),
            reason,
            detail: detail.into(),
        };
        self.negatives.put(&fp.key, entry).is_ok()
    }

    /// Pattern invalidation. Returns the number of deleted entries.
    pub fn invalidate(&self, filter: &InvalidateFilter) -> usize {
        let removed = match filter {
            InvalidateFilter::Intent(intent) => {
                let prefix = Fingerprint::intent_prefix(
                    &self.cfg.schema_version,
                    &self.cfg.deps_version,
                    intent,
                );
                self.index.remove_intent(intent);
                self.entries.remove_prefix(&prefix) + self.negatives.remove_prefix(&prefix)
            }
            InvalidateFilter::SchemaVersion(version) => {
                let prefix = format!("svara:{version}:");
                let n =
                    self.entries.remove_prefix(&prefix) + self.negatives.remove_prefix(&prefix);
                self.rebuild_index();
                n
            }
            InvalidateFilter::DepsVersion(version) => {
                let n = self
                    .entries
                    .remove_matching(|_schema, deps, _intent| deps == version);
                self.rebuild_index();
                n
            }
        };
        self.entries.flush();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            negatives: self.negatives.len(),
            indexed: self.index.len(),
            inflight: self.flight.inflight_count(),
        }
    }

    // ── Private ──────────────────────────────────────────────────────

    fn rebuild_index(&self) {
        self.index.clear();
        let prefix =
            Fingerprint::version_prefix(&self.cfg.schema_version, &self.cfg.deps_version);
        for (key, entry) in self.entries.scan_live(Utc::now()) {
            if key.starts_with(&prefix) {
                self.index.insert(&entry.intent, &key, entry.tokens.clone());
            }
        }
    }

    fn trace(&self, tier: CacheTier, fp: &Fingerprint) {
        TraceEvent::CacheDecision {
            tier,
            intent: fp.intent.clone(),
            key_prefix: fp.key.chars().take(40).collect(),
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use sv_canon::CanonicalRequest;
    use sv_domain::turn::Route;

    fn cache(dir: &std::path::Path) -> TieredCache {
        let cfg = CacheConfig {
            data_dir: dir.to_path_buf(),
            ..CacheConfig::default()
        };
        TieredCache::open(cfg).unwrap()
    }

    fn request(text: &str, intent: &str) -> CanonicalRequest {
        CanonicalRequest {
            text: text.into(),
            intent: intent.into(),
            context_facts: vec![],
            schema_version: "1".into(),
            deps_version: "1".into(),
            locale: "sv".into(),
            persona_mode: "neutral".into(),
            time_bucket: None,
            safety_mode: "standard".into(),
            model_id: "micro-1b".into(),
        }
    }

    fn tokens(text: &str) -> Vec<String> {
        text.split_whitespace().map(String::from).collect()
    }

    fn entry(text: &str, intent: &str) -> CacheEntry {
        CacheEntry {
            route: Route::Micro,
            intent: intent.into(),
            payload: "svaret".into(),
            evidence: None,
            created_at: Utc::now(),
            ttl_s: 3_600,
            level: CacheLevel::Easy,
            schema_ok: true,
            tokens: tokens(text),
        }
    }

    #[test]
    fn store_then_lookup_hits_l1() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("vad är klockan", "time.now").fingerprint();

        cache.store(&fp, entry("vad är klockan", "time.now")).unwrap();
        let outcome = cache.lookup(&fp, &tokens("vad är klockan"), Utc::now());
        assert_eq!(outcome.tier, CacheTier::L1);
        assert_eq!(outcome.entry.unwrap().payload, "svaret");
    }

    #[test]
    fn similar_query_same_intent_hits_l2() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let stored = request("vad blir vädret i stockholm imorgon", "weather.lookup");
        cache
            .store(
                &stored.fingerprint(),
                entry("vad blir vädret i stockholm imorgon", "weather.lookup"),
            )
            .unwrap();

        // Similar but not identical → different fingerprint → L2
        // (6 shared tokens of 7 → similarity 6/7 ≈ 0.857).
        let query = request("vad blir vädret i stockholm imorgon då", "weather.lookup");
        let outcome = cache.lookup(
            &query.fingerprint(),
            &tokens("vad blir vädret i stockholm imorgon då"),
            Utc::now(),
        );
        assert_eq!(outcome.tier, CacheTier::L2);
        assert!(outcome.similarity.unwrap() >= 0.85);
        assert_eq!(outcome.entry.unwrap().intent, "weather.lookup");
    }

    #[test]
    fn l2_never_crosses_intents() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let stored = request("vad blir vädret imorgon", "weather.lookup");
        cache
            .store(&stored.fingerprint(), entry("vad blir vädret imorgon", "weather.lookup"))
            .unwrap();

        let query = request("vad blir vädret imorgon", "news.briefing");
        let outcome = cache.lookup(
            &query.fingerprint(),
            &tokens("vad blir vädret imorgon"),
            Utc::now(),
        );
        assert_eq!(outcome.tier, CacheTier::Miss);
    }

    #[test]
    fn negative_entry_hits_l3() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("trasig fråga", "calendar.create").fingerprint();

        assert!(cache.store_negative(&fp, ErrorClass::Schema, "plan invalid", None));
        let outcome = cache.lookup(&fp, &tokens("trasig fråga"), Utc::now());
        assert_eq!(outcome.tier, CacheTier::L3);
        assert_eq!(outcome.negative.unwrap().reason, ErrorClass::Schema);
    }

    #[test]
    fn transient_failures_are_not_stored_negative() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("långsam fråga", "calendar.create").fingerprint();

        assert!(!cache.store_negative(&fp, ErrorClass::Timeout, "deadline", None));
        assert!(!cache.store_negative(&fp, ErrorClass::Backend5xx, "boom", None));
        let outcome = cache.lookup(&fp, &tokens("långsam fråga"), Utc::now());
        assert_eq!(outcome.tier, CacheTier::Miss);
    }

    #[test]
    fn hard_level_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("svår fråga", "deep.analysis").fingerprint();
        let mut e = entry("svår fråga", "deep.analysis");
        e.level = CacheLevel::Hard;
        assert_eq!(cache.store(&fp, e), Err(StoreError::HardLevel));
    }

    #[test]
    fn schema_not_ok_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("fråga", "time.now").fingerprint();
        let mut e = entry("fråga", "time.now");
        e.schema_ok = false;
        assert_eq!(cache.store(&fp, e), Err(StoreError::SchemaNotOk));
    }

    #[test]
    fn oversized_payload_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("fråga", "time.now").fingerprint();
        let mut e = entry("fråga", "time.now");
        e.payload = "x".repeat(129 * 1024);
        assert!(matches!(
            cache.store(&fp, e),
            Err(StoreError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn intent_mismatch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("fråga", "time.now").fingerprint();
        let e = entry("fråga", "weather.lookup");
        assert!(matches!(
            cache.store(&fp, e),
            Err(StoreError::IntentMismatch { .. })
        ));
    }

    #[test]
    fn invalidate_by_intent_makes_lookups_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("vad är klockan", "time.now").fingerprint();
        cache.store(&fp, entry("vad är klockan", "time.now")).unwrap();

        let removed = cache.invalidate(&InvalidateFilter::Intent("time.now".into()));
        assert_eq!(removed, 1);
        let outcome = cache.lookup(&fp, &tokens("vad är klockan"), Utc::now());
        assert_eq!(outcome.tier, CacheTier::Miss);
    }

    #[test]
    fn invalidate_by_schema_version_clears_namespace() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path());
        let fp = request("vad är klockan", "time.now").fingerprint();
        cache.store(&fp, entry("vad är klockan", "time.now")).unwrap();

        let removed = cache.invalidate(&InvalidateFilter::SchemaVersion("1".into()));
        assert_eq!(removed, 1);
        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().indexed, 0);
    }

    #[test]
    fn disabled_cache_bypasses_everything() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CacheConfig {
            enabled: false,
            data_dir: dir.path().to_path_buf(),
            ..CacheConfig::default()
        };
        let cache = TieredCache::open(cfg).unwrap();
        let fp = request("vad är klockan", "time.now").fingerprint();
        cache.store(&fp, entry("vad är klockan", "time.now")).unwrap();
        let outcome = cache.lookup(&fp, &tokens("vad är klockan"), Utc::now());
        assert_eq!(outcome.tier, CacheTier::Bypass);
    }

    #[test]
    fn index_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let fp = request("vad blir vädret i stockholm imorgon", "weather.lookup").fingerprint();
        {
            let cache = cache(dir.path());
            cache
                .store(&fp, entry("vad blir vädret i stockholm imorgon", "weather.lookup"))
                .unwrap();
        }
        // Reopen: the semantic index is rebuilt from the store.
        let cache = cache(dir.path());
        let query = request("vad blir vädret i stockholm imorgon då", "weather.lookup");
        let outcome = cache.lookup(
            &query.fingerprint(),
            &tokens("vad blir vädret i stockholm imorgon då"),
            Utc::now(),
        );
        assert_eq!(outcome.tier, CacheTier::L2);
    }
}
