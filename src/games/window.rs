use chrono::{DateTime, Duration, NaiveTime, Timelike, Utc};
use chrono_tz::Tz;

use crate::shared::local_instant;

/// Daily open interval `[start, end)` in local wall time.
///
/// The interval may wrap past midnight (`22 → 2`). Equal bounds mean the
/// window never closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl PlayWindow {
    /// Panics on an hour outside `0..24`; windows are static configuration.
    pub fn hours(start_hour: u32, end_hour: u32) -> Self {
        Self {
            start: NaiveTime::from_hms_opt(start_hour, 0, 0).expect("start hour out of range"),
            end: NaiveTime::from_hms_opt(end_hour, 0, 0).expect("end hour out of range"),
        }
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start < self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }

    /// First open instant at or after `after`.
    pub fn next_open(&self, tz: Tz, after: DateTime<Utc>) -> DateTime<Utc> {
        let local = after.with_timezone(&tz);
        if self.contains(local.time()) {
            return after;
        }

        let today_start = local_instant(tz, local.date_naive(), self.start);
        if today_start > after {
            today_start
        } else {
            local_instant(tz, local.date_naive() + Duration::days(1), self.start)
        }
    }

    pub fn start_hour(&self) -> u32 {
        self.start.hour()
    }

    pub fn end_hour(&self) -> u32 {
        self.end.hour()
    }
}
