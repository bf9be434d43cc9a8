use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Daily trigger time in UTC.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DailyCadence {
    target: NaiveTime,
}

impl DailyCadence {
    pub(crate) fn new(hour: u32, minute: u32) -> Self {
        let target = NaiveTime::from_hms_opt(hour, minute, 0)
            .unwrap_or_else(|| panic!("invalid time: {hour:02}:{minute:02}"));
        Self { target }
    }

    /// The next trigger instant at or after `now`.
    pub(crate) fn next_run_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let today_target = now
            .date_naive()
            .and_time(self.target)
            .and_utc();

        if now <= today_target {
            today_target
        } else {
            today_target + Duration::days(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DailyCadence;
    use chrono::{DateTime, Utc};

    fn parse_utc(ts: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(ts)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    #[test]
    fn next_run_same_day_when_before_trigger() {
        let cadence = DailyCadence::new(4, 0);
        let next = cadence.next_run_from(parse_utc("2026-07-15T03:30:00Z"));
        assert_eq!(next, parse_utc("2026-07-15T04:00:00Z"));
    }

    #[test]
    fn next_run_next_day_when_past_trigger() {
        let cadence = DailyCadence::new(4, 0);
        let next = cadence.next_run_from(parse_utc("2026-07-15T10:00:00Z"));
        assert_eq!(next, parse_utc("2026-07-16T04:00:00Z"));
    }

    #[test]
    fn next_run_immediate_when_exactly_on_trigger() {
        let cadence = DailyCadence::new(4, 0);
        let now = parse_utc("2026-07-15T04:00:00Z");
        assert_eq!(cadence.next_run_from(now), now);
    }
}
