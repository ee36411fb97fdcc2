use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

/// Debounced checkpoint scheduling.
///
/// Components call [`schedule`](Self::schedule) after every mutation; only
/// the last call within the delay window actually runs, so a burst of
/// updates costs one disk write. Each component owns one scheduler per
/// persisted file.
#[derive(Debug)]
pub struct CheckpointScheduler {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl CheckpointScheduler {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedules `task` to run after the configured delay, cancelling any
    /// checkpoint still pending. The task must capture the snapshot it
    /// intends to write.
    pub fn schedule<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_after(self.delay, task);
    }

    /// Same as [`schedule`](Self::schedule) with an explicit delay.
    pub fn schedule_after<F, Fut>(&self, delay: Duration, task: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });

        let mut pending = self.pending.lock().unwrap();
        if let Some(previous) = pending.replace(handle) {
            previous.abort();
        }
    }

    /// Cancels the pending checkpoint (if any) and runs `task` right away.
    pub async fn flush<F, Fut>(&self, task: F)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ()>,
    {
        self.cancel();
        task().await;
    }

    /// Drops the pending checkpoint without running it.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock().unwrap();
        if let Some(handle) = pending.take() {
            handle.abort();
            debug!("pending checkpoint cancelled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn only_last_scheduled_checkpoint_runs() {
        let scheduler = CheckpointScheduler::new(Duration::from_millis(30));
        let runs = Arc::new(AtomicU32::new(0));
        let last = Arc::new(AtomicU32::new(0));

        for i in 1..=5u32 {
            let runs = runs.clone();
            let last = last.clone();
            scheduler.schedule(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
                last.store(i, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(last.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn spaced_checkpoints_all_run() {
        let scheduler = CheckpointScheduler::new(Duration::from_millis(10));
        let runs = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let runs = runs.clone();
            scheduler.schedule(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(40)).await;
        }

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn flush_cancels_pending_and_runs_now() {
        let scheduler = CheckpointScheduler::new(Duration::from_secs(60));
        let runs = Arc::new(AtomicU32::new(0));

        {
            let runs = runs.clone();
            scheduler.schedule(move || async move {
                runs.fetch_add(10, Ordering::SeqCst);
            });
        }

        {
            let runs = runs.clone();
            scheduler
                .flush(move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_discards_pending() {
        let scheduler = CheckpointScheduler::new(Duration::from_millis(20));
        let runs = Arc::new(AtomicU32::new(0));

        {
            let runs = runs.clone();
            scheduler.schedule(move || async move {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }
        scheduler.cancel();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
