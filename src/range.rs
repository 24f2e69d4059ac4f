//! Date-range resolution in the device's local calendar.
//!
//! All windows are computed from local wall-clock dates and converted to
//! absolute instants only at the end. Wall times that do not exist (spring
//! forward) resolve to the first instant after the gap; wall times that occur
//! twice (fall back) resolve to the earliest instant.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveDateTime, NaiveTime,
    TimeZone, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::models::TimeFilter;

// ---

/// Longest DST shift we step forward through when resolving a gap.
const MAX_GAP_MINUTES: i64 = 3 * 60;

/// An inclusive `[start, end]` window of absolute instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DateRange {
    /// Build a range, rejecting `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// Build a range from local calendar dates: `[first 00:00, last_exclusive 00:00)`.
    pub fn from_local_dates(tz: &Tz, first: NaiveDate, last_exclusive: NaiveDate) -> Result<Self> {
        // ---
        let start = resolve_local(tz, first.and_time(NaiveTime::MIN)).with_timezone(&Utc);
        let next = resolve_local(tz, last_exclusive.and_time(NaiveTime::MIN)).with_timezone(&Utc);
        Self::new(start, next - Duration::milliseconds(1))
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant <= self.end
    }

    pub fn start_date(&self, tz: &Tz) -> NaiveDate {
        self.start.with_timezone(tz).date_naive()
    }

    pub fn end_date(&self, tz: &Tz) -> NaiveDate {
        self.end.with_timezone(tz).date_naive()
    }
}

/// Map a local wall-clock time onto the timeline.
pub fn resolve_local(tz: &Tz, naive: NaiveDateTime) -> DateTime<Tz> {
    // ---
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let mut candidate = naive;
            for _ in 0..MAX_GAP_MINUTES {
                candidate += Duration::minutes(1);
                if let Some(dt) = tz.from_local_datetime(&candidate).earliest() {
                    return dt;
                }
            }
            // No zone has a gap this long; treat the wall time as UTC.
            tz.from_utc_datetime(&naive)
        }
    }
}

/// The local calendar date of `now` on the device.
pub fn local_date(now: DateTime<Utc>, tz: &Tz) -> NaiveDate {
    now.with_timezone(tz).date_naive()
}

/// Resolve the window a filter covers, relative to `now` in local time.
///
/// - daily: today 00:00:00.000 through 23:59:59.999
/// - weekly: Monday 00:00 through Sunday 23:59:59.999 of the current week
/// - monthly: first through last day of the current month
/// - annually: Jan 1 through Dec 31 of the current year
pub fn resolve_range(filter: TimeFilter, now: DateTime<Utc>, tz: &Tz) -> Result<DateRange> {
    // ---
    let today = local_date(now, tz);

    let (first, last_exclusive) = match filter {
        TimeFilter::Daily => (today, today + Duration::days(1)),
        TimeFilter::Weekly => {
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            (monday, monday + Duration::days(7))
        }
        TimeFilter::Monthly => {
            let first = today - Duration::days(today.day0() as i64);
            (first, add_months(first, 1))
        }
        TimeFilter::Annually => {
            let first = today - Duration::days(today.ordinal0() as i64);
            (first, add_months(first, 12))
        }
    };

    DateRange::from_local_dates(tz, first, last_exclusive)
}

/// Today's window for the live dashboard feed as `[local midnight, next local midnight)`.
pub fn current_day_bounds(now: DateTime<Utc>, tz: &Tz) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    // ---
    let today = local_date(now, tz);
    let start = resolve_local(tz, today.and_time(NaiveTime::MIN)).with_timezone(&Utc);
    let next = resolve_local(tz, (today + Duration::days(1)).and_time(NaiveTime::MIN))
        .with_timezone(&Utc);
    if start >= next {
        return Err(Error::InvalidRange { start, end: next });
    }
    Ok((start, next))
}

fn add_months(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months))
        .unwrap_or(NaiveDate::MAX)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use chrono::Timelike;
    use chrono_tz::America::New_York;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        // ---
        New_York
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn assert_local_end_of_day(range: &DateRange, date: NaiveDate) {
        // ---
        let end = range.end.with_timezone(&New_York);
        assert_eq!(end.date_naive(), date);
        assert_eq!((end.hour(), end.minute(), end.second()), (23, 59, 59));
        assert_eq!(end.timestamp_subsec_millis(), 999);
    }

    #[test]
    fn test_weekly_range_on_wednesday() {
        // ---
        // 2025-01-15 is a Wednesday
        let range = resolve_range(TimeFilter::Weekly, local(2025, 1, 15, 14, 30), &New_York).unwrap();

        let start = range.start.with_timezone(&New_York);
        assert_eq!(start.date_naive(), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(start.time(), NaiveTime::MIN);
        assert_local_end_of_day(&range, NaiveDate::from_ymd_opt(2025, 1, 19).unwrap());
    }

    #[test]
    fn test_weekly_range_on_sunday_starts_previous_monday() {
        // ---
        let range = resolve_range(TimeFilter::Weekly, local(2025, 1, 19, 9, 0), &New_York).unwrap();
        assert_eq!(range.start_date(&New_York), NaiveDate::from_ymd_opt(2025, 1, 13).unwrap());
        assert_eq!(range.end_date(&New_York), NaiveDate::from_ymd_opt(2025, 1, 19).unwrap());
    }

    #[test]
    fn test_monthly_range_in_leap_february() {
        // ---
        let range = resolve_range(TimeFilter::Monthly, local(2024, 2, 10, 12, 0), &New_York).unwrap();
        assert_eq!(range.start_date(&New_York), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_local_end_of_day(&range, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn test_annual_range() {
        // ---
        let range = resolve_range(TimeFilter::Annually, local(2025, 7, 4, 12, 0), &New_York).unwrap();
        assert_eq!(range.start_date(&New_York), NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_local_end_of_day(&range, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }

    #[test]
    fn test_daily_range_uses_local_midnight_not_utc() {
        // ---
        // 22:00 local on Jan 1 is already Jan 2 in UTC
        let now = local(2025, 1, 1, 22, 0);
        let range = resolve_range(TimeFilter::Daily, now, &New_York).unwrap();

        assert_eq!(range.start, Utc.with_ymd_and_hms(2025, 1, 1, 5, 0, 0).unwrap());
        assert_local_end_of_day(&range, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!(range.contains(now));
    }

    #[test]
    fn test_current_day_bounds_on_short_dst_day() {
        // ---
        // 2025-03-09 springs forward in New York: a 23 hour day
        let (start, next) = current_day_bounds(local(2025, 3, 9, 12, 0), &New_York).unwrap();
        assert_eq!(next - start, Duration::hours(23));
        assert_eq!(next, local(2025, 3, 10, 0, 0));
    }

    #[test]
    fn test_resolve_local_inside_gap_moves_past_it() {
        // ---
        let in_gap = NaiveDate::from_ymd_opt(2025, 3, 9)
            .unwrap()
            .and_hms_opt(2, 30, 0)
            .unwrap();
        let resolved = resolve_local(&New_York, in_gap);
        assert_eq!(resolved.hour(), 3);
        assert_eq!(resolved.minute(), 0);
    }

    #[test]
    fn test_inverted_range_is_rejected() {
        // ---
        let t = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(DateRange::new(t, t), Err(Error::InvalidRange { .. })));
        assert!(DateRange::new(t, t + Duration::seconds(1)).is_ok());
    }
}
