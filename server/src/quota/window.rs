//! Quota Window Arithmetic
//!
//! Windows are fixed-size, non-overlapping, and computed as a pure function
//! of wall-clock time, so the counter key itself rolls over — no reset job.

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// How quota windows are aligned. Chosen by configuration, not hard-coded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPolicy {
    /// Calendar months in UTC (the billing default).
    CalendarMonth,
    /// Fixed-length windows aligned to the Unix epoch.
    Fixed {
        /// Window length in seconds. Must be positive.
        secs: i64,
    },
}

/// A half-open quota window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl WindowPolicy {
    /// Compute the window containing `now`.
    pub fn window_at(&self, now: DateTime<Utc>) -> QuotaWindow {
        match *self {
            Self::CalendarMonth => {
                let start = Utc
                    .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
                    .single()
                    .expect("first day of month is a valid timestamp");
                let (next_year, next_month) = if now.month() == 12 {
                    (now.year() + 1, 1)
                } else {
                    (now.year(), now.month() + 1)
                };
                let end = Utc
                    .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
                    .single()
                    .expect("first day of month is a valid timestamp");
                QuotaWindow { start, end }
            }
            Self::Fixed { secs } => {
                let start_secs = now.timestamp().div_euclid(secs) * secs;
                let start = DateTime::from_timestamp(start_secs, 0)
                    .expect("epoch-aligned window start is in range");
                let end = DateTime::from_timestamp(start_secs + secs, 0)
                    .expect("epoch-aligned window end is in range");
                QuotaWindow { start, end }
            }
        }
    }
}
