use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

/// Opaque partition key for one calendar day in a tenant's timezone, e.g.
/// `2026-08-23`. Computed once at proposal time and carried through the rate
/// counter; never re-derived inside a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey(pub String);

impl std::fmt::Display for DayKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Day key for `at` under a fixed UTC offset in minutes. An out-of-range
/// offset falls back to UTC.
pub fn day_key(at: DateTime<Utc>, utc_offset_minutes: i32) -> DayKey {
    let date = match utc_offset_minutes.checked_mul(60).and_then(FixedOffset::east_opt) {
        Some(offset) => at.with_timezone(&offset).date_naive(),
        None => at.date_naive(),
    };
    DayKey(date.format("%Y-%m-%d").to_string())
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Utc};

    use super::day_key;

    fn at(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value).expect("valid rfc3339").with_timezone(&Utc)
    }

    #[test]
    fn utc_tenant_uses_utc_calendar_day() {
        assert_eq!(day_key(at("2026-08-23T10:00:00Z"), 0).0, "2026-08-23");
    }

    #[test]
    fn negative_offset_rolls_back_across_midnight() {
        // 01:30 UTC is still the previous evening in UTC-05:00.
        assert_eq!(day_key(at("2026-08-23T01:30:00Z"), -300).0, "2026-08-22");
    }

    #[test]
    fn positive_offset_rolls_forward_across_midnight() {
        // 23:30 UTC is already the next morning in UTC+09:00.
        assert_eq!(day_key(at("2026-08-22T23:30:00Z"), 540).0, "2026-08-23");
    }

    #[test]
    fn out_of_range_offset_falls_back_to_utc() {
        assert_eq!(day_key(at("2026-08-23T10:00:00Z"), 100_000).0, "2026-08-23");
    }

    #[test]
    fn extreme_offset_does_not_overflow() {
        assert_eq!(day_key(at("2026-08-23T10:00:00Z"), i32::MAX).0, "2026-08-23");
        assert_eq!(day_key(at("2026-08-23T10:00:00Z"), i32::MIN).0, "2026-08-23");
    }
}
