//! Per-key counters and window expiry.

use chrono::{DateTime, Datelike, Local, TimeZone, Timelike};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);
const DAY: Duration = Duration::from_secs(86400);

/// Wall-clock period for calendar-aligned resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalendarPeriod {
    /// Resets when the hour of day changes
    Hour,
    /// Resets when the day of month changes
    Day,
}

impl CalendarPeriod {
    /// Upper bound on the length of one period.
    pub fn max_span(&self) -> Duration {
        match self {
            CalendarPeriod::Hour => HOUR,
            CalendarPeriod::Day => DAY,
        }
    }

    fn field<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> u32 {
        match self {
            CalendarPeriod::Hour => at.hour(),
            CalendarPeriod::Day => at.day(),
        }
    }
}

impl FromStr for CalendarPeriod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(CalendarPeriod::Hour),
            "day" => Ok(CalendarPeriod::Day),
            _ => Err(()),
        }
    }
}

impl fmt::Display for CalendarPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalendarPeriod::Hour => f.write_str("hour"),
            CalendarPeriod::Day => f.write_str("day"),
        }
    }
}

/// How a counter's window is reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetPolicy {
    /// Fixed elapsed duration since the last reset
    Interval(Duration),
    /// Aligned to wall-clock hour or day boundaries
    Calendar(CalendarPeriod),
}

impl ResetPolicy {
    /// Whether a window that started at `last_reset` is over at `now`.
    ///
    /// Calendar windows expire when the boundary field differs *or* a full
    /// period has elapsed; the second clause catches a field that matches again
    /// after a whole period (same day-of-month one month later, for instance).
    /// An interval window never expires on a clock that went backwards. A
    /// calendar window still does if the step back crosses a boundary, since
    /// the field no longer matches.
    pub fn is_expired<Tz: TimeZone>(&self, last_reset: &DateTime<Tz>, now: &DateTime<Tz>) -> bool {
        let elapsed = (now.clone() - last_reset.clone()).to_std();

        match self {
            ResetPolicy::Interval(interval) => matches!(elapsed, Ok(e) if e >= *interval),
            ResetPolicy::Calendar(period) => {
                period.field(last_reset) != period.field(now)
                    || matches!(elapsed, Ok(e) if e >= period.max_span())
            }
        }
    }
}

impl fmt::Display for ResetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResetPolicy::Interval(interval) => write!(f, "{:?}", interval),
            ResetPolicy::Calendar(period) => write!(f, "calendar@{}", period),
        }
    }
}

/// Request count for one key within its current window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    count: u64,
    last_reset: DateTime<Local>,
}

impl Counter {
    /// Create an empty counter whose window starts at `now`.
    pub fn new(now: DateTime<Local>) -> Self {
        Self {
            count: 0,
            last_reset: now,
        }
    }

    /// Reset the window if it is over, then count one request.
    ///
    /// Returns the count after incrementing.
    pub fn increment(&mut self, policy: &ResetPolicy, now: DateTime<Local>) -> u64 {
        if policy.is_expired(&self.last_reset, &now) {
            self.count = 0;
            self.last_reset = now;
        }

        self.count = self.count.saturating_add(1);
        self.count
    }

    /// Whether the key may proceed at `now`, without touching the counter.
    ///
    /// The boundary is inclusive: `max_count + 1` increments fit in a window
    /// before this turns false.
    pub fn allows(&self, max_count: u64, policy: &ResetPolicy, now: DateTime<Local>) -> bool {
        policy.is_expired(&self.last_reset, &now) || self.count <= max_count
    }

    /// Get the count recorded in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Get the start of the current window.
    pub fn last_reset(&self) -> DateTime<Local> {
        self.last_reset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_calendar_period_parse() {
        assert_eq!("hour".parse::<CalendarPeriod>(), Ok(CalendarPeriod::Hour));
        assert_eq!("day".parse::<CalendarPeriod>(), Ok(CalendarPeriod::Day));
        assert!("week".parse::<CalendarPeriod>().is_err());
        assert!("Hour".parse::<CalendarPeriod>().is_err());
    }

    #[test]
    fn test_interval_expiry() {
        let policy = ResetPolicy::Interval(Duration::from_secs(60));
        let start = utc(2024, 6, 15, 10, 0, 0);

        assert!(!policy.is_expired(&start, &utc(2024, 6, 15, 10, 0, 59)));
        assert!(policy.is_expired(&start, &utc(2024, 6, 15, 10, 1, 0)));
    }

    #[test]
    fn test_hour_boundary_crossed_early() {
        let policy = ResetPolicy::Calendar(CalendarPeriod::Hour);
        let start = utc(2024, 6, 15, 10, 59, 30);

        // Only a minute passed, but the hour field changed
        assert!(policy.is_expired(&start, &utc(2024, 6, 15, 11, 0, 30)));
        assert!(!policy.is_expired(&start, &utc(2024, 6, 15, 10, 59, 59)));
    }

    #[test]
    fn test_hour_same_field_a_day_later() {
        let policy = ResetPolicy::Calendar(CalendarPeriod::Hour);
        let start = utc(2024, 6, 15, 10, 15, 0);

        assert!(policy.is_expired(&start, &utc(2024, 6, 16, 10, 20, 0)));
    }

    #[test]
    fn test_day_same_field_a_month_later() {
        let policy = ResetPolicy::Calendar(CalendarPeriod::Day);
        let start = utc(2024, 1, 31, 23, 0, 0);

        assert!(!policy.is_expired(&start, &utc(2024, 1, 31, 23, 59, 0)));
        assert!(policy.is_expired(&start, &utc(2024, 2, 1, 0, 1, 0)));
        // Day-of-month matches again, elapsed clause catches it
        assert!(policy.is_expired(&start, &utc(2024, 3, 31, 12, 0, 0)));
    }

    #[test]
    fn test_backwards_clock_does_not_expire_interval() {
        let policy = ResetPolicy::Interval(Duration::from_secs(1));
        let start = utc(2024, 6, 15, 10, 0, 10);

        assert!(!policy.is_expired(&start, &utc(2024, 6, 15, 10, 0, 0)));
    }

    #[test]
    fn test_backwards_clock_across_boundary_expires_calendar() {
        let policy = ResetPolicy::Calendar(CalendarPeriod::Hour);
        let start = utc(2024, 6, 15, 10, 0, 10);

        assert!(!policy.is_expired(&start, &utc(2024, 6, 15, 10, 0, 0)));
        assert!(policy.is_expired(&start, &utc(2024, 6, 15, 9, 59, 50)));
    }

    #[test]
    fn test_counter_increment_and_inclusive_boundary() {
        let policy = ResetPolicy::Interval(Duration::from_secs(60));
        let now = Local::now();
        let mut counter = Counter::new(now);

        assert_eq!(counter.increment(&policy, now), 1);
        assert_eq!(counter.increment(&policy, now), 2);
        assert!(counter.allows(2, &policy, now));

        assert_eq!(counter.increment(&policy, now), 3);
        assert!(!counter.allows(2, &policy, now));
    }

    #[test]
    fn test_counter_resets_on_expired_window() {
        let policy = ResetPolicy::Interval(Duration::from_secs(60));
        let start = Local::now();
        let mut counter = Counter::new(start);

        for _ in 0..5 {
            counter.increment(&policy, start);
        }

        let later = start + chrono::Duration::seconds(61);
        assert!(counter.allows(1, &policy, later));
        // Checking does not reset
        assert_eq!(counter.count(), 5);

        assert_eq!(counter.increment(&policy, later), 1);
        assert_eq!(counter.last_reset(), later);
    }

    #[test]
    fn test_reset_policy_display() {
        assert_eq!(ResetPolicy::Calendar(CalendarPeriod::Day).to_string(), "calendar@day");
        assert_eq!(ResetPolicy::Interval(Duration::from_millis(1500)).to_string(), "1.5s");
    }
}
