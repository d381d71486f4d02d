//! Deterministic PII masking: emails, phone numbers, personnummer, and
//! full names are redacted before any text reaches a log, the cache, or
//! telemetry.

use regex::Regex;

/// Replacement tokens. Fixed strings so masked output is stable.
const MASK_EMAIL: &str = "[mail]";
const MASK_PHONE: &str = "[telefon]";
const MASK_PERSONNUMMER: &str = "[personnummer]";
const MASK_NAME: &str = "[namn]";

/// Common Swedish sentence-leading words that are never the start of a
/// person's name. Keeps the two-capitalized-words rule from eating
/// ordinary sentence openings.
const NAME_STOPWORDS: &[&str] = &[
    "Boka", "Det", "Hej", "Hur", "Jag", "Kan", "När", "Skicka", "Vad", "Var", "Varför", "Vem",
    "Vilken", "Visa",
];

/// Compiled masking pipeline. Build once at startup.
pub struct PiiMasker {
    email: Regex,
    phone_mobile: Regex,
    phone_generic: Regex,
    personnummer: Regex,
    full_name: Regex,
}

impl PiiMasker {
    pub fn new() -> Self {
        Self {
            email: Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}")
                .expect("static regex"),
            // 07x / +467x mobile numbers, allowing space or dash groups.
            phone_mobile: Regex::new(r"(?:\+46|0)\s?7\d(?:[\s\-]?\d{2,3}){3}")
                .expect("static regex"),
            // Landline shapes: area code + 5-8 digit subscriber number.
            phone_generic: Regex::new(r"(?:\+46|0)\d{1,3}[\s\-]\d{5,8}\b").expect("static regex"),
            // 6 or 8 digit date part, optional separator, 4-digit suffix.
            personnummer: Regex::new(r"\b(?:19|20)?\d{6}[\-+]?\d{4}\b").expect("static regex"),
            full_name: Regex::new(r"\b[A-ZÅÄÖ][a-zåäö]+ [A-ZÅÄÖ][a-zåäö]+\b")
                .expect("static regex"),
        }
    }

    /// Mask PII in `text`. Returns the masked text and whether anything
    /// was changed (the `pii_masked` telemetry flag).
    pub fn mask(&self, text: &str) -> (String, bool) {
        let mut out = text.to_string();

        out = self.email.replace_all(&out, MASK_EMAIL).into_owned();
        out = self
            .personnummer
            .replace_all(&out, MASK_PERSONNUMMER)
            .into_owned();
        out = self.phone_mobile.replace_all(&out, MASK_PHONE).into_owned();
        out = self
            .phone_generic
            .replace_all(&out, MASK_PHONE)
            .into_owned();

        out = self
            .full_name
            .replace_all(&out, |caps: &regex::Captures<'_>| {
                let matched = &caps[0];
                let first = matched.split(' ').next().unwrap_or("");
                if NAME_STOPWORDS.contains(&first) {
                    matched.to_string()
                } else {
                    MASK_NAME.to_string()
                }
            })
            .into_owned();

        let masked = out != text;
        (out, masked)
    }
}

impl Default for PiiMasker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_email() {
        let m = PiiMasker::new();
        let (out, masked) = m.mask("skicka till anna.svensson@example.se tack");
        assert_eq!(out, "skicka till [mail] tack");
        assert!(masked);
    }

    #[test]
    fn masks_mobile_numbers() {
        let m = PiiMasker::new();
        for input in ["ring 070-123 45 67", "ring 0701234567", "ring +46 70 123 45 67"] {
            let (out, masked) = m.mask(input);
            assert!(out.contains("[telefon]"), "input {input} gave {out}");
            assert!(masked);
        }
    }

    #[test]
    fn masks_personnummer() {
        let m = PiiMasker::new();
        let (out, masked) = m.mask("mitt personnummer är 19800101-1234");
        assert_eq!(out, "mitt personnummer är [personnummer]");
        assert!(masked);

        let (out, _) = m.mask("kortform 800101-1234");
        assert_eq!(out, "kortform [personnummer]");
    }

    #[test]
    fn masks_full_names_but_not_sentence_openers() {
        let m = PiiMasker::new();
        let (out, masked) = m.mask("Boka möte med Anna Svensson imorgon");
        assert_eq!(out, "Boka möte med [namn] imorgon");
        assert!(masked);

        // "Vad Gäller" style sentence openings survive.
        let (out, masked) = m.mask("Hej Alice");
        assert_eq!(out, "Hej Alice");
        assert!(!masked);
    }

    #[test]
    fn clean_text_is_unchanged_and_unflagged() {
        let m = PiiMasker::new();
        let (out, masked) = m.mask("vad blir vädret imorgon");
        assert_eq!(out, "vad blir vädret imorgon");
        assert!(!masked);
    }

    #[test]
    fn iso_datetimes_are_not_phone_numbers() {
        let m = PiiMasker::new();
        let (out, masked) = m.mask("mötet är 2025-03-02T14:00");
        assert_eq!(out, "mötet är 2025-03-02T14:00");
        assert!(!masked);
    }

    #[test]
    fn masking_is_idempotent() {
        let m = PiiMasker::new();
        let (once, _) = m.mask("Anna Svensson, 070-123 45 67, anna@example.se");
        let (twice, changed) = m.mask(&once);
        assert_eq!(once, twice);
        assert!(!changed);
    }
}
