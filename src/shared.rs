use std::sync::Mutex;

use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use thiserror::Error;

use crate::games::GameError;
use crate::platform::PlatformError;
use crate::storage::StorageError;

/// Top-level error for engine operations that cross component boundaries.
///
/// Components keep their own error enums; this wrapper exists for the
/// command layer and the binary, which deal with all of them.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("game error: {0}")]
    Game(#[from] GameError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Source of the current instant.
///
/// Everything time-sensitive in the engine (cooldowns, windows, daily
/// resets) reads the clock through this trait so tests can pin the time.
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Settable clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().unwrap();
        *guard += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Resolves a wall-clock time in `tz` on `date` to a UTC instant.
///
/// DST gaps roll forward to the next representable instant; ambiguous
/// times take the earlier occurrence.
pub fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
    let mut naive = date.and_time(time);
    loop {
        match tz.from_local_datetime(&naive) {
            LocalResult::Single(dt) => return dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => return earliest.with_timezone(&Utc),
            LocalResult::None => {
                naive += Duration::minutes(30);
            }
        }
    }
}

/// Start of `date` in `tz`, as a UTC instant.
pub fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    local_instant(tz, date, NaiveTime::MIN)
}

/// Formats a duration as `"{H}h {M}m"`, omitting the hours part when zero.
///
/// Negative durations render as `"0m"`.
pub fn format_hm(duration: Duration) -> String {
    let total_minutes = duration.num_minutes().max(0);
    let hours = total_minutes / 60;
    let minutes = total_minutes % 60;
    if hours == 0 {
        format!("{}m", minutes)
    } else {
        format!("{}h {}m", hours, minutes)
    }
}
