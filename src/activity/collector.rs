use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDate, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::daily::DailyStats;
use crate::platform::{ChannelId, GuildId, UserId};
use crate::shared::Clock;
use crate::storage::JsonStore;
use crate::xp::XpStore;

pub const FIRST_WIN_FILE: &str = "first_win.json";

const MESSAGE_XP: i64 = 8;
const FIRST_OF_DAY_XP: i64 = 400;
const COOLDOWN_SECS: i64 = 60;
/// Local hour after which the first-of-day bounty arms.
const RESET_HOUR: u32 = 8;

/// Message metadata, all the collector ever reads. Content never enters the
/// engine.
#[derive(Debug, Clone, Copy)]
pub struct InboundMessage {
    pub author: UserId,
    pub author_is_bot: bool,
    /// `None` for direct messages.
    pub guild: Option<GuildId>,
    pub channel: ChannelId,
}

/// Persisted bounty record (`first_win.json`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FirstWin {
    pub date: Option<NaiveDate>,
    pub winner_id: Option<UserId>,
    pub claimed_at: Option<DateTime<Utc>>,
}

/// Turns guild messages into XP and day-bucket counters.
pub struct MessageCollector {
    xp: Arc<XpStore>,
    stats: Arc<DailyStats>,
    storage: Arc<JsonStore>,
    first_win: Mutex<FirstWin>,
    cooldowns: Mutex<HashMap<UserId, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl MessageCollector {
    pub async fn load(
        xp: Arc<XpStore>,
        stats: Arc<DailyStats>,
        storage: Arc<JsonStore>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        let first_win: FirstWin = storage.read(FIRST_WIN_FILE).await;
        Self {
            xp,
            stats,
            storage,
            first_win: Mutex::new(first_win),
            cooldowns: Mutex::new(HashMap::new()),
            clock,
            tz,
        }
    }

    /// Bot and direct messages are dropped. Everything else counts toward
    /// the day bucket; XP only lands outside the per-user cooldown.
    #[instrument(skip(self, msg), fields(user = msg.author))]
    pub async fn handle_message(&self, msg: InboundMessage) {
        if msg.author_is_bot {
            return;
        }
        let Some(guild) = msg.guild else {
            return;
        };

        let now = self.clock.now_utc();
        let local = now.with_timezone(&self.tz);
        let date = local.date_naive();

        self.stats.note_message(date, msg.author).await;
        self.try_claim_first_of_day(msg.author, guild, date, local.hour(), now)
            .await;

        if self.cooldown_allows(msg.author, now).await {
            self.xp.add_xp(msg.author, MESSAGE_XP, guild, "message").await;
        }
    }

    /// Awards the bounty to the first message of the day. Armed only after
    /// the local reset hour, claimed exactly once per date under the lock.
    async fn try_claim_first_of_day(
        &self,
        user: UserId,
        guild: GuildId,
        date: NaiveDate,
        local_hour: u32,
        now: DateTime<Utc>,
    ) {
        if local_hour < RESET_HOUR {
            return;
        }

        {
            let mut first_win = self.first_win.lock().await;
            if first_win.date == Some(date) {
                return;
            }
            *first_win = FirstWin {
                date: Some(date),
                winner_id: Some(user),
                claimed_at: Some(now),
            };
            if let Err(error) = self.storage.write_atomic(FIRST_WIN_FILE, &*first_win).await {
                warn!(%error, "failed to persist first-of-day bounty");
            }
        }

        info!(user, %date, "first-of-day bounty claimed");
        self.xp.add_xp(user, FIRST_OF_DAY_XP, guild, "premier").await;
    }

    /// Sliding 60 s window keyed on the last awarded message.
    async fn cooldown_allows(&self, user: UserId, now: DateTime<Utc>) -> bool {
        let mut cooldowns = self.cooldowns.lock().await;
        match cooldowns.get(&user) {
            Some(last) if now - *last < Duration::seconds(COOLDOWN_SECS) => false,
            _ => {
                cooldowns.insert(user, now);
                true
            }
        }
    }
}
