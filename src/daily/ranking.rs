use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use tracing::{info, instrument, warn};

use crate::platform::UserId;
use crate::shared::{local_midnight, Clock};
use crate::storage::JsonStore;

use super::awards::AwardPipeline;
use super::stats::{DailyStats, DayActivity};

pub const RANKING_FILE: &str = "daily_ranking.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEntry {
    pub id: UserId,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceEntry {
    pub id: UserId,
    pub minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MvpEntry {
    pub id: UserId,
    /// Composite `messages + voice/60`.
    pub score: f64,
    pub messages: u64,
    /// Voice presence in seconds.
    pub voice: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopThree {
    pub msg: Vec<MessageEntry>,
    pub vc: Vec<VoiceEntry>,
    pub mvp: Vec<MvpEntry>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Winners {
    pub msg: Option<UserId>,
    pub vc: Option<UserId>,
    pub mvp: Option<UserId>,
}

/// One sealed day, exactly as persisted in `daily_ranking.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRanking {
    pub date: NaiveDate,
    pub top3: TopThree,
    pub winners: Winners,
}

/// Orders one day's activity into the three boards. Users with zero of a
/// metric stay off that board; ties break on user id so reruns are stable.
pub fn compute_ranking(date: NaiveDate, activity: &HashMap<UserId, DayActivity>) -> DailyRanking {
    let mut by_messages: Vec<(UserId, &DayActivity)> = activity
        .iter()
        .filter(|(_, a)| a.messages > 0)
        .map(|(id, a)| (*id, a))
        .collect();
    by_messages.sort_by(|a, b| b.1.messages.cmp(&a.1.messages).then(a.0.cmp(&b.0)));

    let mut by_voice: Vec<(UserId, &DayActivity)> = activity
        .iter()
        .filter(|(_, a)| a.voice > 0)
        .map(|(id, a)| (*id, a))
        .collect();
    by_voice.sort_by(|a, b| b.1.voice.cmp(&a.1.voice).then(a.0.cmp(&b.0)));

    let mut by_score: Vec<(UserId, &DayActivity, f64)> = activity
        .iter()
        .filter(|(_, a)| a.messages > 0 || a.voice > 0)
        .map(|(id, a)| (*id, a, a.messages as f64 + a.voice as f64 / 60.0))
        .collect();
    by_score.sort_by(|a, b| b.2.total_cmp(&a.2).then(a.0.cmp(&b.0)));

    let top3 = TopThree {
        msg: by_messages
            .iter()
            .take(3)
            .map(|(id, a)| MessageEntry {
                id: *id,
                count: a.messages,
            })
            .collect(),
        vc: by_voice
            .iter()
            .take(3)
            .map(|(id, a)| VoiceEntry {
                id: *id,
                minutes: a.voice / 60,
            })
            .collect(),
        mvp: by_score
            .iter()
            .take(3)
            .map(|(id, a, score)| MvpEntry {
                id: *id,
                score: *score,
                messages: a.messages,
                voice: a.voice,
            })
            .collect(),
    };

    let winners = Winners {
        msg: top3.msg.first().map(|e| e.id),
        vc: top3.vc.first().map(|e| e.id),
        mvp: top3.mvp.first().map(|e| e.id),
    };

    DailyRanking {
        date,
        top3,
        winners,
    }
}

/// Seals days into ranking records and serves them to waiters.
pub struct RankingService {
    stats: Arc<DailyStats>,
    storage: Arc<JsonStore>,
    latest: Mutex<Option<DailyRanking>>,
    sealed: Notify,
}

impl RankingService {
    pub async fn load(stats: Arc<DailyStats>, storage: Arc<JsonStore>) -> Self {
        let latest: Option<DailyRanking> = storage.read(RANKING_FILE).await;
        Self {
            stats,
            storage,
            latest: Mutex::new(latest),
            sealed: Notify::new(),
        }
    }

    /// Pops the date's bucket, computes the boards, persists the record and
    /// wakes `wait_for_ranking` waiters. Exactly one record results per date.
    #[instrument(skip(self))]
    pub async fn seal_day(&self, date: NaiveDate) -> DailyRanking {
        let activity = self.stats.pop_day(date).await;
        let ranking = compute_ranking(date, &activity);

        if let Err(error) = self.storage.write_atomic(RANKING_FILE, &ranking).await {
            warn!(%error, "failed to persist daily ranking");
        }

        *self.latest.lock().await = Some(ranking.clone());
        self.sealed.notify_waiters();
        info!(
            participants = activity.len(),
            mvp = ?ranking.winners.mvp,
            "day sealed"
        );
        ranking
    }

    pub async fn get_ranking(&self, date: NaiveDate) -> Option<DailyRanking> {
        self.latest
            .lock()
            .await
            .clone()
            .filter(|ranking| ranking.date == date)
    }

    /// Waits until the date's record exists or the timeout elapses.
    pub async fn wait_for_ranking(&self, date: NaiveDate, timeout: Duration) -> Option<DailyRanking> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.sealed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(ranking) = self.get_ranking(date).await {
                return Some(ranking);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.get_ranking(date).await;
            }
        }
    }

    /// Seals any dates a missed midnight left behind, oldest first, and
    /// returns the most recent one.
    pub async fn catch_up(&self, today: NaiveDate) -> Option<DailyRanking> {
        let stale = self.stats.stale_dates(today).await;
        let mut last = None;
        for date in stale {
            warn!(%date, "sealing day left over from a missed midnight");
            last = Some(self.seal_day(date).await);
        }
        last
    }
}

/// Background loop: at every local midnight, seal the date that just ended
/// and hand the record to the award pipeline when one is configured.
pub async fn run_midnight_loop(
    ranking: Arc<RankingService>,
    awards: Option<Arc<AwardPipeline>>,
    tz: Tz,
    clock: Arc<dyn Clock>,
) {
    loop {
        let now = clock.now_utc();
        let today = now.with_timezone(&tz).date_naive();
        let next = local_midnight(tz, today + chrono::Duration::days(1));
        let wait = (next - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        let sealed = ranking.seal_day(today).await;
        if let Some(awards) = &awards {
            awards.maybe_award(&sealed).await;
        }
    }
}
