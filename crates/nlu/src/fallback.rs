//! Rule-based fallback classification, used when the NLU service is
//! unreachable, over budget, or disallowed by its breaker.

use std::collections::BTreeMap;

use sv_domain::turn::{IntentResult, IntentSource, Route};

/// Confidence attached to rule-based fallbacks. Low on purpose: the
/// router treats these as uncertain context.
const FALLBACK_CONFIDENCE: f32 = 0.3;

/// Keyword rules, first match wins.
const RULES: &[(&str, &[&str], Route)] = &[
    ("weather.lookup", &["väder", "vädret", "regn", "snö"], Route::Micro),
    ("time.now", &["klockan", "vad är tiden"], Route::Micro),
    ("calendar.create", &["boka", "möte", "kalender"], Route::Planner),
    ("email.draft", &["mail", "mejl", "maila", "e-post"], Route::Planner),
    ("memory.query", &["kommer du ihåg", "minns du", "sa jag"], Route::Planner),
];

/// Produce a deterministic fallback intent from keyword rules.
pub fn fallback_intent(text: &str) -> IntentResult {
    let lowered = text.to_lowercase();
    for (intent, keywords, route) in RULES {
        if keywords.iter().any(|kw| lowered.contains(kw)) {
            return IntentResult {
                intent: (*intent).to_string(),
                confidence: FALLBACK_CONFIDENCE,
                slots: BTreeMap::new(),
                route_hint: Some(*route),
                mood_score: None,
                source: IntentSource::Fallback,
            };
        }
    }
    IntentResult {
        intent: "general.chat".to_string(),
        confidence: FALLBACK_CONFIDENCE,
        slots: BTreeMap::new(),
        route_hint: None,
        mood_score: None,
        source: IntentSource::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keyword_rules_map_to_intents() {
        assert_eq!(fallback_intent("hur blir vädret").intent, "weather.lookup");
        assert_eq!(fallback_intent("boka något åt mig").intent, "calendar.create");
        assert_eq!(fallback_intent("maila rapporten").intent, "email.draft");
        assert_eq!(
            fallback_intent("kommer du ihåg vad jag sa").intent,
            "memory.query"
        );
    }

    #[test]
    fn unknown_text_is_general_chat() {
        let result = fallback_intent("berätta om rymden");
        assert_eq!(result.intent, "general.chat");
        assert_eq!(result.source, IntentSource::Fallback);
        assert!(result.confidence < 0.5);
        assert_eq!(result.route_hint, None);
    }

    #[test]
    fn fallback_is_deterministic() {
        let a = fallback_intent("boka möte");
        let b = fallback_intent("boka möte");
        assert_eq!(a.intent, b.intent);
        assert_eq!(a.confidence, b.confidence);
    }
}
