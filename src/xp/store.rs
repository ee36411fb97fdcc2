use std::collections::HashMap;
use std::sync::Arc;

use chrono::Duration;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::event::{EventBus, LevelChange};
use crate::platform::{GuildId, UserId};
use crate::shared::Clock;
use crate::storage::{CheckpointScheduler, JsonStore};

use super::models::{level_for_xp, XpRecord, XpTransition};

pub const DATA_FILE: &str = "data.json";

/// Single-writer XP and soft-currency ledger, persisted to `data.json`.
///
/// Every mutation goes through [`add_xp`](Self::add_xp), which serializes on
/// one mutex, keeps `level` consistent with the curve, and emits a
/// [`LevelChange`] on the bus once the guard is dropped.
pub struct XpStore {
    records: Mutex<HashMap<UserId, XpRecord>>,
    storage: Arc<JsonStore>,
    checkpoints: CheckpointScheduler,
    bus: EventBus,
    clock: Arc<dyn Clock>,
}

impl XpStore {
    pub async fn load(
        storage: Arc<JsonStore>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        checkpoint_delay: std::time::Duration,
    ) -> Self {
        let records: HashMap<UserId, XpRecord> = storage.read(DATA_FILE).await;
        debug!(users = records.len(), "xp ledger loaded");
        Self {
            records: Mutex::new(records),
            storage,
            checkpoints: CheckpointScheduler::new(checkpoint_delay),
            bus,
            clock,
        }
    }

    /// Applies `delta` to the user's balance and returns the transition.
    ///
    /// Positive deltas are doubled while a double-XP window is active (an
    /// expired window is cleared instead). Balances clamp at zero. The level
    /// event fires only when the mutation crosses a level boundary.
    #[instrument(skip(self))]
    pub async fn add_xp(
        &self,
        user: UserId,
        delta: i64,
        guild: GuildId,
        source: &str,
    ) -> XpTransition {
        let now = self.clock.now_utc();
        let transition;
        {
            let mut records = self.records.lock().await;
            let record = records.entry(user).or_default();

            let mut applied = delta;
            if let Some(until) = record.double_xp_until {
                if now < until {
                    if applied > 0 {
                        applied *= 2;
                    }
                } else {
                    record.double_xp_until = None;
                }
            }

            let old_xp = record.xp;
            let old_level = record.level;
            record.xp = if applied >= 0 {
                record.xp.saturating_add(applied as u64)
            } else {
                record.xp.saturating_sub(applied.unsigned_abs())
            };
            record.level = level_for_xp(record.xp);

            transition = XpTransition {
                old_xp,
                new_xp: record.xp,
                old_level,
                new_level: record.level,
            };

            self.schedule_checkpoint(&records);
        }

        if transition.level_changed() {
            self.bus.emit(LevelChange {
                user,
                guild,
                source: source.to_string(),
                old_level: transition.old_level,
                new_level: transition.new_level,
                old_xp: transition.old_xp,
                new_xp: transition.new_xp,
            });
        }

        transition
    }

    pub async fn get_balance(&self, user: UserId) -> u64 {
        self.records
            .lock()
            .await
            .get(&user)
            .map(|record| record.xp)
            .unwrap_or(0)
    }

    pub async fn record(&self, user: UserId) -> Option<XpRecord> {
        self.records.lock().await.get(&user).cloned()
    }

    /// Opens (or extends) a double-XP window ending `minutes` from now.
    #[instrument(skip(self))]
    pub async fn grant_double_xp(&self, user: UserId, minutes: i64) {
        let until = self.clock.now_utc() + Duration::minutes(minutes);
        let mut records = self.records.lock().await;
        records.entry(user).or_default().double_xp_until = Some(until);
        self.schedule_checkpoint(&records);
    }

    /// Descending balances, ties broken by user id for a stable order.
    pub async fn top_balances(&self, n: usize) -> Vec<(UserId, u64)> {
        let records = self.records.lock().await;
        let mut balances: Vec<(UserId, u64)> = records
            .iter()
            .map(|(user, record)| (*user, record.xp))
            .collect();
        balances.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        balances.truncate(n);
        balances
    }

    /// Writes a snapshot now, cancelling any pending checkpoint.
    pub async fn flush(&self) {
        let snapshot = self.records.lock().await.clone();
        let storage = Arc::clone(&self.storage);
        self.checkpoints
            .flush(move || async move {
                if let Err(error) = storage.write_atomic(DATA_FILE, &snapshot).await {
                    warn!(%error, "failed to flush xp ledger");
                }
            })
            .await;
    }

    pub async fn close(&self) {
        self.flush().await;
    }

    fn schedule_checkpoint(&self, records: &HashMap<UserId, XpRecord>) {
        let snapshot = records.clone();
        let storage = Arc::clone(&self.storage);
        self.checkpoints.schedule(move || async move {
            if let Err(error) = storage.write_atomic(DATA_FILE, &snapshot).await {
                warn!(%error, "failed to checkpoint xp ledger");
            }
        });
    }
}
