use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime};
use std::cmp::Ordering;

/// Date layouts accepted for cruise dates, tried in order.
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%m/%d/%y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
];

/// Parses a numeric cell. Blank, unparsable and non-finite values are missing.
pub fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Parses a date cell in any of the accepted layouts.
/// Returns `None` for anything unrecognized; callers treat that as missing.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(date);
        }
    }

    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.date());
        }
    }

    DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Canonical `YYYY-MM-DD` text for a cruise date, or `None` if unparsable.
pub fn canonical_date_text(raw: &str) -> Option<String> {
    parse_flexible_date(raw).map(|d| d.format("%Y-%m-%d").to_string())
}

/// Rounds half to even, so 2.5 -> 2 and 3.5 -> 4.
pub fn round_half_even(value: f64) -> i32 {
    value.round_ties_even() as i32
}

/// Orders stand identifiers numerically when both parse as numbers,
/// otherwise lexically. Numbers sort before text.
pub fn compare_stand_ids(a: &str, b: &str) -> Ordering {
    match (parse_number(a), parse_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal).then_with(|| a.cmp(b)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => a.cmp(b),
    }
}

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

pub fn current_year() -> i32 {
    today().year()
}

pub fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(" 12.5 "), Some(12.5));
        assert_eq!(parse_number(""), None);
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
        assert_eq!(parse_number("inf"), None);
    }

    #[test]
    fn test_parse_flexible_date() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(parse_flexible_date("2024-03-07"), Some(expected));
        assert_eq!(parse_flexible_date("3/7/2024"), Some(expected));
        assert_eq!(parse_flexible_date("07-Mar-2024"), Some(expected));
        assert_eq!(parse_flexible_date("2024-03-07 10:15:00"), Some(expected));
        assert_eq!(parse_flexible_date("not a date"), None);
        assert_eq!(parse_flexible_date("2024-02-30"), None);
    }

    #[test]
    fn test_canonical_date_text() {
        assert_eq!(canonical_date_text("2024/1/5"), Some("2024-01-05".to_string()));
        assert_eq!(canonical_date_text("??"), None);
    }

    #[test]
    fn test_round_half_even() {
        assert_eq!(round_half_even(2.5), 2);
        assert_eq!(round_half_even(3.5), 4);
        assert_eq!(round_half_even(-0.5), 0);
        assert_eq!(round_half_even(-1.5), -2);
        assert_eq!(round_half_even(4.4), 4);
    }

    #[test]
    fn test_compare_stand_ids() {
        let mut ids = vec!["10", "2", "B", "1", "A"];
        ids.sort_by(|a, b| compare_stand_ids(a, b));
        assert_eq!(ids, vec!["1", "2", "10", "A", "B"]);
    }
}
