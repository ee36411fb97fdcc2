use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::platform::UserId;
use crate::storage::{CheckpointScheduler, JsonStore};

pub const STATS_FILE: &str = "daily_stats.json";

/// One user's counters inside a day bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayActivity {
    pub messages: u64,
    /// Voice presence in seconds.
    pub voice: u64,
}

type DayBuckets = HashMap<NaiveDate, HashMap<UserId, DayActivity>>;

/// Live per-day activity counters, persisted (debounced) to
/// `daily_stats.json`. Sealed dates are removed by the ranking job and never
/// reappear here.
pub struct DailyStats {
    buckets: Mutex<DayBuckets>,
    storage: Arc<JsonStore>,
    checkpoints: CheckpointScheduler,
}

impl DailyStats {
    pub async fn load(storage: Arc<JsonStore>, checkpoint_delay: std::time::Duration) -> Self {
        let buckets: DayBuckets = storage.read(STATS_FILE).await;
        debug!(days = buckets.len(), "daily stats loaded");
        Self {
            buckets: Mutex::new(buckets),
            storage,
            checkpoints: CheckpointScheduler::new(checkpoint_delay),
        }
    }

    pub async fn note_message(&self, date: NaiveDate, user: UserId) {
        let snapshot = {
            let mut buckets = self.buckets.lock().await;
            buckets
                .entry(date)
                .or_default()
                .entry(user)
                .or_default()
                .messages += 1;
            buckets.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn add_voice(&self, date: NaiveDate, user: UserId, seconds: u64) {
        if seconds == 0 {
            return;
        }
        let snapshot = {
            let mut buckets = self.buckets.lock().await;
            buckets
                .entry(date)
                .or_default()
                .entry(user)
                .or_default()
                .voice += seconds;
            buckets.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn activity_on(&self, date: NaiveDate) -> HashMap<UserId, DayActivity> {
        self.buckets
            .lock()
            .await
            .get(&date)
            .cloned()
            .unwrap_or_default()
    }

    /// Dates before `today` still held live, ascending. A non-empty result
    /// means a midnight was missed.
    pub async fn stale_dates(&self, today: NaiveDate) -> Vec<NaiveDate> {
        let buckets = self.buckets.lock().await;
        let mut stale: Vec<NaiveDate> = buckets.keys().copied().filter(|d| *d < today).collect();
        stale.sort();
        stale
    }

    /// Removes the date's bucket and writes the remaining map right away so
    /// a sealed date can never resurrect after a crash.
    pub async fn pop_day(&self, date: NaiveDate) -> HashMap<UserId, DayActivity> {
        let (popped, snapshot) = {
            let mut buckets = self.buckets.lock().await;
            let popped = buckets.remove(&date).unwrap_or_default();
            (popped, buckets.clone())
        };
        self.checkpoints.cancel();
        if let Err(error) = self.storage.write_atomic(STATS_FILE, &snapshot).await {
            warn!(%error, "failed to persist daily stats after sealing");
        }
        popped
    }

    pub async fn flush(&self) {
        let snapshot = self.buckets.lock().await.clone();
        let storage = Arc::clone(&self.storage);
        self.checkpoints
            .flush(move || async move {
                if let Err(error) = storage.write_atomic(STATS_FILE, &snapshot).await {
                    warn!(%error, "failed to flush daily stats");
                }
            })
            .await;
    }

    fn schedule_checkpoint(&self, snapshot: DayBuckets) {
        let storage = Arc::clone(&self.storage);
        self.checkpoints.schedule(move || async move {
            if let Err(error) = storage.write_atomic(STATS_FILE, &snapshot).await {
                warn!(%error, "failed to checkpoint daily stats");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn day(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    async fn fixture() -> (DailyStats, Arc<JsonStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonStore::new(dir.path()));
        storage.ensure_dir().await.unwrap();
        let stats = DailyStats::load(storage.clone(), std::time::Duration::from_millis(5)).await;
        (stats, storage, dir)
    }

    #[tokio::test]
    async fn counters_accumulate_per_user_and_date() {
        let (stats, _storage, _dir) = fixture().await;
        let date = day("2025-03-10");

        stats.note_message(date, 100).await;
        stats.note_message(date, 100).await;
        stats.add_voice(date, 100, 90).await;
        stats.note_message(date, 101).await;

        let activity = stats.activity_on(date).await;
        assert_eq!(activity[&100].messages, 2);
        assert_eq!(activity[&100].voice, 90);
        assert_eq!(activity[&101].messages, 1);
    }

    #[tokio::test]
    async fn pop_day_removes_the_bucket_and_persists() {
        let (stats, storage, _dir) = fixture().await;
        let sealed = day("2025-03-10");
        let open = day("2025-03-11");

        stats.note_message(sealed, 100).await;
        stats.note_message(open, 101).await;

        let popped = stats.pop_day(sealed).await;
        assert_eq!(popped[&100].messages, 1);
        assert!(stats.activity_on(sealed).await.is_empty());

        let on_disk: DayBuckets = storage.read(STATS_FILE).await;
        assert!(!on_disk.contains_key(&sealed));
        assert!(on_disk.contains_key(&open));
    }

    #[tokio::test]
    async fn stale_dates_come_back_ascending() {
        let (stats, _storage, _dir) = fixture().await;

        stats.note_message(day("2025-03-09"), 100).await;
        stats.note_message(day("2025-03-07"), 100).await;
        stats.note_message(day("2025-03-10"), 100).await;

        let stale = stats.stale_dates(day("2025-03-10")).await;
        assert_eq!(stale, vec![day("2025-03-07"), day("2025-03-09")]);
    }
}
