//! Deterministic Swedish intent guard: high-precision regex patterns
//! that short-circuit the NLU call for unambiguous turns.

use std::collections::BTreeMap;

use regex::Regex;

use sv_domain::turn::{IntentResult, IntentSource, Route};

/// Confidence attached to guard matches. Deliberately high: these
/// patterns are precision-first.
const GUARD_CONFIDENCE: f32 = 0.97;

struct GuardRule {
    intent: &'static str,
    pattern: Regex,
    route_hint: Route,
}

/// Compiled guard. Patterns run against the raw (lowercased) text, in
/// declaration order; first match wins.
pub struct IntentGuard {
    rules: Vec<GuardRule>,
    calendar_with: Regex,
    calendar_when: Regex,
}

impl IntentGuard {
    pub fn new() -> Self {
        let rule = |intent: &'static str, pattern: &str, route_hint: Route| GuardRule {
            intent,
            pattern: Regex::new(pattern).expect("static regex"),
            route_hint,
        };
        Self {
            rules: vec![
                rule(
                    "greeting.hello",
                    r"^\s*(hej|hejsan|hallå|tjena|god\s*(morgon|kväll|dag))\b",
                    Route::Micro,
                ),
                rule(
                    "time.now",
                    r"\b(vad|hur mycket)\s+är\s+klockan\b",
                    Route::Micro,
                ),
                rule(
                    "weather.lookup",
                    r"\b(vädret|väder|regna|regnar|snöa|snöar)\b",
                    Route::Micro,
                ),
                rule(
                    "email.draft",
                    r"\b(skicka|skriv)\s+(ett\s+)?(mail|mejl|e-?post)\b|\bmaila\b",
                    Route::Planner,
                ),
                rule(
                    "calendar.create",
                    r"\bboka\s+(in\s+)?(ett\s+)?möte\b|\blägg\s+in\b.*\bkalender",
                    Route::Planner,
                ),
            ],
            calendar_with: Regex::new(r"\bmed\s+([a-zåäö]+)").expect("static regex"),
            calendar_when: Regex::new(
                r"\b((?:idag|imorgon|övermorgon)(?:\s+(?:kl|klockan))?\s+\d{1,2}(?::\d{2})?)",
            )
            .expect("static regex"),
        }
    }

    /// Check the text against the guard patterns. The input is never
    /// mutated; matching runs on a lowercased copy.
    pub fn check(&self, text: &str) -> Option<IntentResult> {
        let lowered = text.to_lowercase();
        let rule = self.rules.iter().find(|r| r.pattern.is_match(&lowered))?;

        let mut slots = BTreeMap::new();
        if rule.intent == "calendar.create" {
            if let Some(caps) = self.calendar_with.captures(&lowered) {
                slots.insert("with".to_string(), caps[1].to_string());
            }
            if let Some(caps) = self.calendar_when.captures(&lowered) {
                slots.insert("when".to_string(), caps[1].to_string());
            }
        }

        Some(IntentResult {
            intent: rule.intent.to_string(),
            confidence: GUARD_CONFIDENCE,
            slots,
            route_hint: Some(rule.route_hint),
            mood_score: None,
            source: IntentSource::Guard,
        })
    }
}

impl Default for IntentGuard {
    fn default() -> Self {
        Self::new()
    }
}
