/// Published-date normalization for provider result sets.
///
/// News and video results frequently carry relative phrases such as
/// "2 days ago"; these are resolved against the ingest time to absolute UTC.
use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

static RELATIVE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(\d+)\s+(minute|minutes|hour|hours|day|days|week|weeks|month|months|year|years)\s+ago$")
        .expect("valid relative date regex")
});

/// Parse a relative phrase like "2 days ago" against `now`.
///
/// Returns `None` when the text is not a recognized relative phrase.
#[must_use]
pub(crate) fn parse_relative_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let captures = RELATIVE_RE.captures(text.trim())?;
    let quantity: i64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_lowercase();

    let delta = if unit.starts_with("minute") {
        Duration::minutes(quantity)
    } else if unit.starts_with("hour") {
        Duration::hours(quantity)
    } else if unit.starts_with("day") {
        Duration::days(quantity)
    } else if unit.starts_with("week") {
        Duration::weeks(quantity)
    } else if unit.starts_with("month") {
        Duration::days(quantity * 30)
    } else {
        Duration::days(quantity * 365)
    };

    now.checked_sub_signed(delta)
}

/// Parse an absolute or relative published date into UTC.
#[must_use]
pub(crate) fn parse_published_date(text: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some(relative) = parse_relative_date(text, now) {
        return Some(relative);
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    // Common provider formats: "2026-01-02", "Jan 2, 2026"
    for format in ["%Y-%m-%d", "%b %e, %Y", "%B %e, %Y"] {
        if let Ok(date) = chrono::NaiveDate::parse_from_str(text.trim(), format) {
            return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_days_ago() {
        let parsed = parse_relative_date("2 days ago", fixed_now()).expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 13, 12, 0, 0).unwrap());
    }

    #[test]
    fn parses_hours_ago_case_insensitive() {
        let parsed = parse_relative_date("11 Hours Ago", fixed_now()).expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 15, 1, 0, 0).unwrap());
    }

    #[test]
    fn months_approximate_to_thirty_days() {
        let parsed = parse_relative_date("1 month ago", fixed_now()).expect("should parse");
        assert_eq!(parsed, fixed_now() - Duration::days(30));
    }

    #[test]
    fn rejects_non_relative_text() {
        assert!(parse_relative_date("yesterday", fixed_now()).is_none());
        assert!(parse_relative_date("", fixed_now()).is_none());
    }

    #[test]
    fn absolute_rfc3339_passes_through() {
        let parsed =
            parse_published_date("2026-07-01T08:30:00Z", fixed_now()).expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 1, 8, 30, 0).unwrap());
    }

    #[test]
    fn plain_date_parses_to_midnight() {
        let parsed = parse_published_date("2026-07-01", fixed_now()).expect("should parse");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap());
    }
}
