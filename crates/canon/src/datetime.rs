//! Relative datetime resolution for Swedish text, anchored in
//! Europe/Stockholm with 5-minute rounding.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike};
use chrono_tz::Tz;
use regex::{Captures, Regex};

/// Minutes per bucket for time-sensitive intents.
const BUCKET_MINUTES: u32 = 5;

/// Resolves relative day references with an explicit clock time
/// ("imorgon klockan 14", "idag 9:30") into ISO datetimes. Text without
/// a resolvable time reference passes through untouched.
pub struct RelativeDatetime {
    pattern: Regex,
}

impl RelativeDatetime {
    pub fn new() -> Self {
        Self {
            // Day word, optional "klockan" (or raw "kl" when called on
            // un-normalized slot text), hour, optional minutes.
            pattern: Regex::new(
                r"\b(idag|imorgon|övermorgon)(?:\s+(?:klockan|kl))?\s+(\d{1,2})(?::(\d{2}))?\b",
            )
            .expect("static regex"),
        }
    }

    /// Replace every resolvable reference with `yyyy-mm-ddthh:mm`
    /// (lowercase `t`, which keeps the output stable under a second
    /// canonicalization pass).
    pub fn resolve(&self, text: &str, now: DateTime<Tz>) -> String {
        self.pattern
            .replace_all(text, |caps: &Captures<'_>| {
                match resolve_capture(caps, now) {
                    Some(iso) => iso.to_lowercase(),
                    // Out-of-range clock values stay as written.
                    None => caps[0].to_string(),
                }
            })
            .into_owned()
    }
}

impl Default for RelativeDatetime {
    fn default() -> Self {
        Self::new()
    }
}

fn resolve_capture(caps: &Captures<'_>, now: DateTime<Tz>) -> Option<String> {
    let day_offset = match &caps[1] {
        "idag" => 0,
        "imorgon" => 1,
        "övermorgon" => 2,
        _ => return None,
    };
    let hour: u32 = caps[2].parse().ok()?;
    let minute: u32 = caps
        .get(3)
        .map(|m| m.as_str().parse())
        .transpose()
        .ok()?
        .unwrap_or(0);
    if hour > 23 || minute > 59 {
        return None;
    }

    let date = (now + Duration::days(day_offset)).date_naive();
    let minute = round_to_bucket(minute);
    Some(format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}",
        date.year(),
        date.month(),
        date.day(),
        hour,
        minute
    ))
}

fn round_to_bucket(minute: u32) -> u32 {
    (minute / BUCKET_MINUTES) * BUCKET_MINUTES
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Public helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Resolve a `when` slot value into a proper ISO datetime (uppercase
/// `T`) for tool arguments. Accepts relative phrases and already-ISO
/// strings.
pub fn resolve_when(slot: &str, now: DateTime<Tz>) -> Option<String> {
    let trimmed = slot.trim().to_lowercase();

    // Already ISO (either separator case).
    if let Some(rest) = trimmed.get(..16) {
        if rest.as_bytes()[10].eq_ignore_ascii_case(&b't')
            && chrono::NaiveDate::parse_from_str(&rest[..10], "%Y-%m-%d").is_ok()
            && chrono::NaiveTime::parse_from_str(&rest[11..16], "%H:%M").is_ok()
        {
            return Some(format!("{}T{}", &rest[..10], &rest[11..16]));
        }
    }

    let resolver = RelativeDatetime::new();
    let resolved = resolver.resolve(&trimmed, now);
    // The slot must reduce to a single datetime token.
    let token = resolved.split_whitespace().find(|t| t.len() == 16 && t.as_bytes()[10] == b't')?;
    Some(format!("{}T{}", &token[..10], &token[11..16]))
}

/// Floor a timestamp to its 5-minute bucket, formatted
/// `YYYY-MM-DDTHH:MM`. Used as a fingerprint component for
/// time-sensitive intents only.
pub fn time_bucket(now: DateTime<Tz>) -> String {
    let floored_minute = round_to_bucket(now.minute());
    let floored = now
        .timezone()
        .with_ymd_and_hms(now.year(), now.month(), now.day(), now.hour(), floored_minute, 0)
        .single()
        .unwrap_or(now);
    floored.format("%Y-%m-%dT%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::Europe::Stockholm;

    fn at(h: u32, m: u32) -> DateTime<Tz> {
        Stockholm.with_ymd_and_hms(2025, 3, 1, h, m, 0).unwrap()
    }

    #[test]
    fn resolves_tomorrow_with_hour() {
        let r = RelativeDatetime::new();
        assert_eq!(
            r.resolve("boka möte imorgon klockan 14", at(10, 0)),
            "boka möte 2025-03-02t14:00"
        );
    }

    #[test]
    fn resolves_today_with_minutes_rounded() {
        let r = RelativeDatetime::new();
        // 9:33 rounds down to the 9:30 bucket.
        assert_eq!(r.resolve("idag 9:33", at(8, 0)), "2025-03-01t09:30");
    }

    #[test]
    fn day_after_tomorrow() {
        let r = RelativeDatetime::new();
        assert_eq!(
            r.resolve("övermorgon klockan 8", at(10, 0)),
            "2025-03-03t08:00"
        );
    }

    #[test]
    fn out_of_range_hour_is_left_alone() {
        let r = RelativeDatetime::new();
        assert_eq!(r.resolve("imorgon klockan 26", at(10, 0)), "imorgon klockan 26");
    }

    #[test]
    fn bare_day_word_without_time_is_untouched() {
        let r = RelativeDatetime::new();
        assert_eq!(r.resolve("vad händer imorgon", at(10, 0)), "vad händer imorgon");
    }

    #[test]
    fn resolve_when_from_relative_phrase() {
        assert_eq!(
            resolve_when("imorgon klockan 14", at(10, 0)),
            Some("2025-03-02T14:00".to_string())
        );
        assert_eq!(
            resolve_when("imorgon 14", at(10, 0)),
            Some("2025-03-02T14:00".to_string())
        );
    }

    #[test]
    fn resolve_when_passes_iso_through() {
        assert_eq!(
            resolve_when("2025-06-01T09:00", at(10, 0)),
            Some("2025-06-01T09:00".to_string())
        );
        assert_eq!(
            resolve_when("2025-06-01t09:00", at(10, 0)),
            Some("2025-06-01T09:00".to_string())
        );
    }

    #[test]
    fn resolve_when_rejects_unresolvable() {
        assert_eq!(resolve_when("på fredag kanske", at(10, 0)), None);
    }

    #[test]
    fn time_bucket_floors_to_five_minutes() {
        assert_eq!(time_bucket(at(14, 3)), "2025-03-01T14:00");
        assert_eq!(time_bucket(at(14, 58)), "2025-03-01T14:55");
        // Same bucket → same key component.
        assert_eq!(time_bucket(at(14, 0)), time_bucket(at(14, 4)));
    }
}
