//! Text canonicalization: lowercase, punctuation stripping, whitespace
//! collapsing, closed-set synonym substitution, and relative-datetime
//! resolution. Idempotent: canonicalizing already-canonical text is a
//! no-op.

use chrono::DateTime;
use chrono_tz::Tz;
use regex::Regex;

use crate::datetime;

/// A synonym substitution pair. The set is closed and Swedish-aware;
/// replacements are whole-word only and themselves canonical, which is
/// what makes the pass idempotent.
const SYNONYMS: &[(&str, &str)] = &[
    ("kl", "klockan"),
    ("imorn", "imorgon"),
    ("imorrn", "imorgon"),
    ("imorron", "imorgon"),
    ("morgondagen", "imorgon"),
    ("tfn", "telefon"),
    ("mejl", "mail"),
];

/// Compiled canonicalization pipeline. Build once, reuse per turn.
pub struct Canonicalizer {
    word: Regex,
    datetime: datetime::RelativeDatetime,
}

impl Canonicalizer {
    pub fn new() -> Self {
        Self {
            // Tokens worth keeping: letters (incl. åäö), digits, and the
            // time/date separators ':' and '-' inside a token.
            word: Regex::new(r"[0-9a-zåäöéü]+(?:[:\-][0-9a-zåäöéü]+)*").expect("static regex"),
            datetime: datetime::RelativeDatetime::new(),
        }
    }

    /// Canonicalize one turn of user text.
    ///
    /// `now` anchors relative datetime resolution (Europe/Stockholm);
    /// passing the same `now` always yields the same output.
    pub fn canonicalize(&self, text: &str, now: DateTime<Tz>) -> String {
        let lowered = text.to_lowercase();

        // Tokenize: this strips non-semantic punctuation and collapses
        // whitespace in one pass.
        let mut tokens: Vec<String> = self
            .word
            .find_iter(&lowered)
            .map(|m| m.as_str().to_string())
            .collect();

        // Whole-word synonym substitution.
        for token in &mut tokens {
            if let Some((_, canonical)) = SYNONYMS.iter().find(|(from, _)| from == token) {
                *token = (*canonical).to_string();
            }
        }

        let joined = tokens.join(" ");

        // Relative datetimes last, over the normalized token stream
        // ("kl 14" has already become "klockan 14").
        self.datetime.resolve(&joined, now)
    }

    /// Canonicalize context facts: trim, lowercase, stable-sort, dedupe.
    pub fn canonicalize_facts(&self, facts: &[String]) -> Vec<String> {
        let mut out: Vec<String> = facts
            .iter()
            .map(|f| f.trim().to_lowercase())
            .filter(|f| !f.is_empty())
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

impl Default for Canonicalizer {
    fn default() -> Self {
        Self::new()
    }
}
