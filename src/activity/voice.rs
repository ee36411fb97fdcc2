use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::daily::DailyStats;
use crate::platform::{ChannelId, GuildId, UserId};
use crate::shared::Clock;
use crate::storage::{CheckpointScheduler, JsonStore};
use crate::xp::XpStore;

pub const VOICE_TIMES_FILE: &str = "voice_times.json";

const XP_PER_MINUTE: f64 = 3.0;

/// Multiplier earned by joining a scheduled game (1.0 / 1.5 / 2.0). The
/// RSVP system owning that state is outside the engine; this is its seam.
#[async_trait]
pub trait ParticipationBonus: Send + Sync {
    async fn bonus_for(&self, user: UserId) -> f64;
}

/// Provider used when no RSVP system is wired in.
#[derive(Debug, Default)]
pub struct NoBonus;

#[async_trait]
impl ParticipationBonus for NoBonus {
    async fn bonus_for(&self, _user: UserId) -> f64 {
        1.0
    }
}

#[derive(Debug, Clone, Copy)]
struct VoicePresence {
    joined_at: DateTime<Utc>,
    /// `None` right after a restart, when only the join instant survived.
    channel: Option<ChannelId>,
}

/// Tracks voice presence and converts session time into XP.
///
/// Join instants are persisted (`voice_times.json`) on every mutation so a
/// crash mid-session still credits the time on the next transition.
pub struct VoiceTracker {
    xp: Arc<XpStore>,
    stats: Arc<DailyStats>,
    storage: Arc<JsonStore>,
    presences: Mutex<HashMap<UserId, VoicePresence>>,
    checkpoints: CheckpointScheduler,
    buff_active: Arc<AtomicBool>,
    bonus: Arc<dyn ParticipationBonus>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl VoiceTracker {
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        xp: Arc<XpStore>,
        stats: Arc<DailyStats>,
        storage: Arc<JsonStore>,
        buff_active: Arc<AtomicBool>,
        bonus: Arc<dyn ParticipationBonus>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        checkpoint_delay: std::time::Duration,
    ) -> Self {
        let joined: HashMap<UserId, DateTime<Utc>> = storage.read(VOICE_TIMES_FILE).await;
        let presences = joined
            .into_iter()
            .map(|(user, joined_at)| {
                (
                    user,
                    VoicePresence {
                        joined_at,
                        channel: None,
                    },
                )
            })
            .collect();
        Self {
            xp,
            stats,
            storage,
            presences: Mutex::new(presences),
            checkpoints: CheckpointScheduler::new(checkpoint_delay),
            buff_active,
            bonus,
            clock,
            tz,
        }
    }

    /// Feeds one voice-state transition: `channel` is where the user is now,
    /// `None` when they left voice entirely.
    #[instrument(skip(self))]
    pub async fn handle_presence(&self, user: UserId, guild: GuildId, channel: Option<ChannelId>) {
        let now = self.clock.now_utc();
        let (settled, snapshot) = {
            let mut presences = self.presences.lock().await;
            let previous = presences.get(&user).copied();

            let settled = match channel {
                Some(channel) => {
                    if previous.map(|p| p.channel) == Some(Some(channel)) {
                        // same channel (mute, deafen, ...): keep the session
                        None
                    } else {
                        presences.insert(
                            user,
                            VoicePresence {
                                joined_at: now,
                                channel: Some(channel),
                            },
                        );
                        previous.map(|p| p.joined_at)
                    }
                }
                None => presences.remove(&user).map(|p| p.joined_at),
            };

            let snapshot: HashMap<UserId, DateTime<Utc>> = presences
                .iter()
                .map(|(user, presence)| (*user, presence.joined_at))
                .collect();
            (settled, snapshot)
        };

        self.schedule_checkpoint(snapshot);

        if let Some(joined_at) = settled {
            self.settle(user, guild, joined_at, now).await;
        }
    }

    /// Credits one finished session: seconds into the day bucket, XP through
    /// the ledger with the buff and participation multipliers applied.
    async fn settle(&self, user: UserId, guild: GuildId, joined_at: DateTime<Utc>, now: DateTime<Utc>) {
        let seconds = (now - joined_at).num_seconds().max(0) as u64;
        if seconds == 0 {
            return;
        }

        let date = now.with_timezone(&self.tz).date_naive();
        self.stats.add_voice(date, user, seconds).await;

        let mut multiplier = self.bonus.bonus_for(user).await;
        if self.buff_active.load(Ordering::SeqCst) {
            multiplier *= 2.0;
        }
        let xp = (seconds as f64 / 60.0 * XP_PER_MINUTE * multiplier).round() as i64;
        if xp > 0 {
            self.xp.add_xp(user, xp, guild, "voice").await;
        }
        debug!(user, seconds, xp, "voice session settled");
    }

    pub async fn flush(&self) {
        let snapshot: HashMap<UserId, DateTime<Utc>> = {
            let presences = self.presences.lock().await;
            presences
                .iter()
                .map(|(user, presence)| (*user, presence.joined_at))
                .collect()
        };
        let storage = Arc::clone(&self.storage);
        self.checkpoints
            .flush(move || async move {
                if let Err(error) = storage.write_atomic(VOICE_TIMES_FILE, &snapshot).await {
                    warn!(%error, "failed to flush voice join map");
                }
            })
            .await;
    }

    fn schedule_checkpoint(&self, snapshot: HashMap<UserId, DateTime<Utc>>) {
        let storage = Arc::clone(&self.storage);
        self.checkpoints.schedule(move || async move {
            if let Err(error) = storage.write_atomic(VOICE_TIMES_FILE, &snapshot).await {
                warn!(%error, "failed to checkpoint voice join map");
            }
        });
    }
}
