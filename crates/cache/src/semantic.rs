//! The L2 semantic index: per-intent candidate sets scored by symmetric
//! token similarity (Jaccard over canonical token multisets).
//!
//! The index is in-memory and rebuilt from the backing store at
//! startup; cross-intent hits are impossible by construction because
//! candidates live under their intent key.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

/// Symmetric Jaccard similarity over token multisets.
pub fn token_similarity(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    let mut counts_a: BTreeMap<&str, usize> = BTreeMap::new();
    for token in a {
        *counts_a.entry(token.as_str()).or_default() += 1;
    }
    let mut counts_b: BTreeMap<&str, usize> = BTreeMap::new();
    for token in b {
        *counts_b.entry(token.as_str()).or_default() += 1;
    }

    let mut intersection = 0usize;
    let mut union = 0usize;
    for (token, &ca) in &counts_a {
        let cb = counts_b.get(token).copied().unwrap_or(0);
        intersection += ca.min(cb);
        union += ca.max(cb);
    }
    for (token, &cb) in &counts_b {
        if !counts_a.contains_key(token) {
            union += cb;
        }
    }

    intersection as f64 / union as f64
}

/// One scored candidate from the index.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub key: String,
    pub similarity: f64,
}

/// Per-intent mapping of store key → canonical token multiset.
pub struct SemanticIndex {
    by_intent: RwLock<HashMap<String, HashMap<String, Vec<String>>>>,
}

impl SemanticIndex {
    pub fn new() -> Self {
        Self {
            by_intent: RwLock::new(HashMap::new()),
        }
    }

    pub fn insert(&self, intent: &str, key: &str, tokens: Vec<String>) {
        self.by_intent
            .write()
            .entry(intent.to_string())
            .or_default()
            .insert(key.to_string(), tokens);
    }

    pub fn remove(&self, intent: &str, key: &str) {
        let mut map = self.by_intent.write();
        if let Some(entries) = map.get_mut(intent) {
            entries.remove(key);
            if entries.is_empty() {
                map.remove(intent);
            }
        }
    }

    pub fn remove_intent(&self, intent: &str) {
        self.by_intent.write().remove(intent);
    }

    pub fn clear(&self) {
        self.by_intent.write().clear();
    }

    /// Best candidates within `intent`, best-first, capped at `top_k`,
    /// all scoring at least `threshold`.
    pub fn candidates(
        &self,
        intent: &str,
        tokens: &[String],
        threshold: f64,
        top_k: usize,
    ) -> Vec<Candidate> {
        let map = self.by_intent.read();
        let Some(entries) = map.get(intent) else {
            return Vec::new();
        };
        let mut scored: Vec<Candidate> = entries
            .iter()
            .map(|(key, entry_tokens)| Candidate {
                key: key.clone(),
                similarity: token_similarity(tokens, entry_tokens),
            })
            .filter(|c| c.similarity >= threshold)
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        scored.truncate(top_k);
        scored
    }

    pub fn len(&self) -> usize {
        self.by_intent.read().values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SemanticIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(s: &str) -> Vec<String> {
        s.split_whitespace().map(String::from).collect()
    }

    #[test]
    fn identical_sets_score_one() {
        let a = tokens("vad blir vädret imorgon");
        assert_eq!(token_similarity(&a, &a), 1.0);
    }

    #[test]
    fn similarity_is_symmetric() {
        let a = tokens("vad blir vädret imorgon");
        let b = tokens("hur blir vädret imorgon");
        assert_eq!(token_similarity(&a, &b), token_similarity(&b, &a));
    }

    #[test]
    fn disjoint_sets_score_zero() {
        assert_eq!(
            token_similarity(&tokens("hej där"), &tokens("boka möte")),
            0.0
        );
    }

    #[test]
    fn multiset_counts_matter() {
        // "ja ja" vs "ja": intersection 1, union 2.
        assert_eq!(token_similarity(&tokens("ja ja"), &tokens("ja")), 0.5);
    }

    #[test]
    fn candidates_respect_threshold_and_intent() {
        let index = SemanticIndex::new();
        index.insert("weather.lookup", "k1", tokens("vad blir vädret imorgon"));
        index.insert("weather.lookup", "k2", tokens("boka möte imorgon"));
        index.insert("time.now", "k3", tokens("vad blir vädret imorgon"));

        let hits = index.candidates("weather.lookup", &tokens("hur blir vädret imorgon"), 0.6, 8);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k1");

        // Same tokens under a different intent never cross over.
        let hits = index.candidates("greeting.hello", &tokens("vad blir vädret imorgon"), 0.1, 8);
        assert!(hits.is_empty());
    }

    #[test]
    fn candidates_are_best_first_and_capped() {
        let index = SemanticIndex::new();
        index.insert("weather.lookup", "k1", tokens("a b c d"));
        index.insert("weather.lookup", "k2", tokens("a b c e"));
        index.insert("weather.lookup", "k3", tokens("a b c d e"));

        let hits = index.candidates("weather.lookup", &tokens("a b c d"), 0.1, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].key, "k1");
        assert!(hits[0].similarity >= hits[1].similarity);
    }

    #[test]
    fn removal_cleans_up() {
        let index = SemanticIndex::new();
        index.insert("a", "k1", tokens("x"));
        index.insert("a", "k2", tokens("y"));
        index.remove("a", "k1");
        assert_eq!(index.len(), 1);
        index.remove_intent("a");
        assert!(index.is_empty());
    }
}
