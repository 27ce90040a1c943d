//! Calendar alignment of summary windows.
//!
//! Windows are computed in local winter time (UTC plus a fixed offset,
//! daylight saving ignored) and reported in UTC. A "day" ends at the
//! configured day-end hour rather than midnight, and a month is the run of
//! days labelled with that calendar month.

use time::{Date, Duration, PrimitiveDateTime, Time};

/// Summary granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    /// Clock hour.
    Hour,
    /// 24 hours ending at the day-end hour.
    Day,
    /// Calendar month of days.
    Month,
}

/// A half-open span `[start, end)` in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    /// First instant inside the window.
    pub start: PrimitiveDateTime,
    /// First instant after the window.
    pub end: PrimitiveDateTime,
}

impl Window {
    /// Whether `ts` falls inside this window.
    pub fn contains(&self, ts: PrimitiveDateTime) -> bool {
        self.start <= ts && ts < self.end
    }
}

/// Window alignment settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    day_end_hour: u8,
    utc_offset: Duration,
}

impl Default for WindowSpec {
    fn default() -> Self {
        Self::new(9, Duration::ZERO)
    }
}

impl WindowSpec {
    /// Days end at `day_end_hour` local time (24 is midnight), local time
    /// being UTC plus `utc_offset`.
    pub fn new(day_end_hour: u8, utc_offset: Duration) -> Self {
        Self {
            day_end_hour: day_end_hour % 24,
            utc_offset,
        }
    }

    /// Configured day-end hour in `0..24`.
    pub fn day_end_hour(&self) -> u8 {
        self.day_end_hour
    }

    /// The window of `period` containing `ts` (UTC).
    pub fn containing(&self, period: Period, ts: PrimitiveDateTime) -> Window {
        let local = ts + self.utc_offset;
        let (start, end) = match period {
            Period::Hour => {
                let start = PrimitiveDateTime::new(local.date(), Time::MIDNIGHT)
                    + Duration::hours(i64::from(local.hour()));
                (start, start + Duration::HOUR)
            }
            Period::Day => {
                let start = self.day_start(local);
                (start, start + Duration::DAY)
            }
            Period::Month => {
                let first = first_of_month(self.day_label(self.day_start(local)));
                (self.month_start(first), self.month_start(next_month(first)))
            }
        };
        Window {
            start: start - self.utc_offset,
            end: end - self.utc_offset,
        }
    }

    /// The window of `period` immediately after `window`.
    pub fn next(&self, period: Period, window: Window) -> Window {
        self.containing(period, window.end)
    }

    fn day_start(&self, local: PrimitiveDateTime) -> PrimitiveDateTime {
        let start = PrimitiveDateTime::new(local.date(), Time::MIDNIGHT)
            + Duration::hours(i64::from(self.day_end_hour));
        if start > local {
            start - Duration::DAY
        } else {
            start
        }
    }

    // Calendar date a day is named after: the date holding most of it.
    fn day_label(&self, day_start: PrimitiveDateTime) -> Date {
        if self.day_end_hour >= 12 {
            (day_start + Duration::DAY).date()
        } else {
            day_start.date()
        }
    }

    fn month_start(&self, first: Date) -> PrimitiveDateTime {
        let start = PrimitiveDateTime::new(first, Time::MIDNIGHT)
            + Duration::hours(i64::from(self.day_end_hour));
        if self.day_end_hour >= 12 {
            start - Duration::DAY
        } else {
            start
        }
    }
}

fn first_of_month(date: Date) -> Date {
    date - Duration::days(i64::from(date.day()) - 1)
}

fn next_month(first: Date) -> Date {
    first_of_month(first + Duration::days(31))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_hour_windows() {
        let spec = WindowSpec::default();
        let w = spec.containing(Period::Hour, datetime!(2024-05-01 10:59:59));
        assert_eq!(w.start, datetime!(2024-05-01 10:00:00));
        assert_eq!(w.end, datetime!(2024-05-01 11:00:00));
        assert_eq!(
            spec.next(Period::Hour, w).start,
            datetime!(2024-05-01 11:00:00)
        );
    }

    #[test]
    fn test_half_hour_offset_shifts_hours() {
        let spec = WindowSpec::new(0, Duration::minutes(330));
        let w = spec.containing(Period::Hour, datetime!(2024-05-01 10:15:00));
        assert_eq!(w.start, datetime!(2024-05-01 09:30:00));
        assert_eq!(w.end, datetime!(2024-05-01 10:30:00));
    }

    #[test]
    fn test_day_end_hour_nine() {
        let spec = WindowSpec::new(9, Duration::ZERO);
        let early = spec.containing(Period::Day, datetime!(2024-05-02 08:59:00));
        assert_eq!(early.start, datetime!(2024-05-01 09:00:00));
        assert_eq!(early.end, datetime!(2024-05-02 09:00:00));

        let late = spec.containing(Period::Day, datetime!(2024-05-02 09:01:00));
        assert_eq!(late.start, datetime!(2024-05-02 09:00:00));
        assert_eq!(late.end, datetime!(2024-05-03 09:00:00));

        // The boundary itself opens the next day.
        assert!(late.contains(datetime!(2024-05-02 09:00:00)));
        assert!(!early.contains(datetime!(2024-05-02 09:00:00)));
    }

    #[test]
    fn test_day_end_hour_twenty_one() {
        let spec = WindowSpec::new(21, Duration::ZERO);
        let w = spec.containing(Period::Day, datetime!(2024-05-02 22:00:00));
        assert_eq!(w.start, datetime!(2024-05-02 21:00:00));
        assert_eq!(w.end, datetime!(2024-05-03 21:00:00));
    }

    #[test]
    fn test_day_end_hour_twenty_four_is_midnight() {
        let spec = WindowSpec::new(24, Duration::ZERO);
        assert_eq!(spec.day_end_hour(), 0);
        let w = spec.containing(Period::Day, datetime!(2024-05-02 11:00:00));
        assert_eq!(w.start, datetime!(2024-05-02 00:00:00));
        assert_eq!(w.end, datetime!(2024-05-03 00:00:00));
    }

    #[test]
    fn test_local_offset_moves_day_boundary() {
        // Local time is UTC+2, so 09:00 local is 07:00 UTC.
        let spec = WindowSpec::new(9, Duration::hours(2));
        let w = spec.containing(Period::Day, datetime!(2024-05-02 07:30:00));
        assert_eq!(w.start, datetime!(2024-05-02 07:00:00));
        assert_eq!(w.end, datetime!(2024-05-03 07:00:00));
    }

    #[test]
    fn test_month_windows() {
        let spec = WindowSpec::new(9, Duration::ZERO);
        let w = spec.containing(Period::Month, datetime!(2024-02-15 12:00:00));
        assert_eq!(w.start, datetime!(2024-02-01 09:00:00));
        assert_eq!(w.end, datetime!(2024-03-01 09:00:00));

        // Before 09:00 on the 1st still belongs to the previous month.
        let w = spec.containing(Period::Month, datetime!(2024-03-01 08:00:00));
        assert_eq!(w.start, datetime!(2024-02-01 09:00:00));

        let spec = WindowSpec::new(21, Duration::ZERO);
        let w = spec.containing(Period::Month, datetime!(2024-12-31 22:00:00));
        assert_eq!(w.start, datetime!(2024-12-31 21:00:00));
        assert_eq!(w.end, datetime!(2025-01-31 21:00:00));
        assert_eq!(
            spec.next(Period::Month, w).end,
            datetime!(2025-02-28 21:00:00)
        );
    }

    #[test]
    fn test_consecutive_days_tile() {
        let spec = WindowSpec::new(9, Duration::minutes(-300));
        let mut w = spec.containing(Period::Day, datetime!(2024-03-30 00:00:00));
        for _ in 0..10 {
            let next = spec.next(Period::Day, w);
            assert_eq!(next.start, w.end);
            assert_eq!(next.end - next.start, Duration::DAY);
            w = next;
        }
    }
}
