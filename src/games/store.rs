use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::platform::{GuildId, MessageRef, RoleId, UserId};
use crate::storage::{CheckpointScheduler, JsonStore};

/// A temporary jackpot role waiting for its expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleGrant {
    pub guild: GuildId,
    pub role: RoleId,
    pub expires: DateTime<Utc>,
}

/// Everything one variant persists (`<slug>_store.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    #[serde(default)]
    pub claims: HashMap<UserId, NaiveDate>,
    #[serde(default)]
    pub tickets: HashMap<UserId, u32>,
    #[serde(default)]
    pub role_assignments: HashMap<UserId, RoleGrant>,
    #[serde(default)]
    pub poster: Option<MessageRef>,
    #[serde(default)]
    pub state_message: Option<MessageRef>,
    /// Last window state announced; `None` before the first watcher pass.
    #[serde(default)]
    pub last_announced_open: Option<bool>,
}

/// Mutex-guarded owner of one variant's persisted state.
pub struct GameStore {
    file: String,
    state: Mutex<GameState>,
    storage: Arc<JsonStore>,
    checkpoints: CheckpointScheduler,
}

impl GameStore {
    pub async fn load(
        storage: Arc<JsonStore>,
        slug: &str,
        checkpoint_delay: std::time::Duration,
    ) -> Self {
        let file = format!("{slug}_store.json");
        let state: GameState = storage.read(&file).await;
        debug!(file, tickets = state.tickets.len(), "game store loaded");
        Self {
            file,
            state: Mutex::new(state),
            storage,
            checkpoints: CheckpointScheduler::new(checkpoint_delay),
        }
    }

    /// Consumes one ticket if the user has any. Observed-then-removed under
    /// the lock, so two concurrent spins cannot share a ticket.
    pub async fn try_consume_ticket(&self, user: UserId) -> bool {
        let snapshot = {
            let mut state = self.state.lock().await;
            let remaining = state.tickets.get(&user).copied().unwrap_or(0);
            if remaining == 0 {
                return false;
            }
            if remaining == 1 {
                state.tickets.remove(&user);
            } else {
                state.tickets.insert(user, remaining - 1);
            }
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
        true
    }

    pub async fn grant_ticket(&self, user: UserId) {
        let snapshot = {
            let mut state = self.state.lock().await;
            *state.tickets.entry(user).or_insert(0) += 1;
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn ticket_count(&self, user: UserId) -> u32 {
        self.state
            .lock()
            .await
            .tickets
            .get(&user)
            .copied()
            .unwrap_or(0)
    }

    pub async fn has_claimed(&self, user: UserId, today: NaiveDate) -> bool {
        self.state.lock().await.claims.get(&user) == Some(&today)
    }

    /// Marks the daily quota spent and persists right away, before any
    /// reward is drawn.
    pub async fn commit_claim(&self, user: UserId, today: NaiveDate) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.claims.insert(user, today);
            state.clone()
        };
        self.checkpoints.cancel();
        if let Err(error) = self.storage.write_atomic(&self.file, &snapshot).await {
            warn!(%error, "failed to persist spin claim");
        }
    }

    pub async fn record_role_grant(&self, user: UserId, grant: RoleGrant) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.role_assignments.insert(user, grant);
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn expired_role_grants(&self, now: DateTime<Utc>) -> Vec<(UserId, RoleGrant)> {
        self.state
            .lock()
            .await
            .role_assignments
            .iter()
            .filter(|(_, grant)| now >= grant.expires)
            .map(|(user, grant)| (*user, *grant))
            .collect()
    }

    pub async fn clear_role_grant(&self, user: UserId) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.role_assignments.remove(&user);
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn poster(&self) -> Option<MessageRef> {
        self.state.lock().await.poster
    }

    pub async fn set_poster(&self, poster: Option<MessageRef>) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.poster = poster;
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn state_message(&self) -> Option<MessageRef> {
        self.state.lock().await.state_message
    }

    pub async fn set_state_message(&self, message: Option<MessageRef>) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.state_message = message;
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn last_announced_open(&self) -> Option<bool> {
        self.state.lock().await.last_announced_open
    }

    pub async fn set_last_announced_open(&self, open: bool) {
        let snapshot = {
            let mut state = self.state.lock().await;
            state.last_announced_open = Some(open);
            state.clone()
        };
        self.schedule_checkpoint(snapshot);
    }

    pub async fn flush(&self) {
        let snapshot = self.state.lock().await.clone();
        let storage = Arc::clone(&self.storage);
        let file = self.file.clone();
        self.checkpoints
            .flush(move || async move {
                if let Err(error) = storage.write_atomic(&file, &snapshot).await {
                    warn!(%error, "failed to flush game store");
                }
            })
            .await;
    }

    fn schedule_checkpoint(&self, snapshot: GameState) {
        let storage = Arc::clone(&self.storage);
        let file = self.file.clone();
        self.checkpoints.schedule(move || async move {
            if let Err(error) = storage.write_atomic(&file, &snapshot).await {
                warn!(%error, "failed to checkpoint game store");
            }
        });
    }
}
