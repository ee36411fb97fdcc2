use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::BuffConfig;
use crate::platform::{ChannelId, ChatPort, Embed, OutboundMessage};
use crate::shared::{local_instant, Clock};
use crate::storage::JsonStore;

pub const BUFF_FILE: &str = "double_voice_xp.json";

/// One planned double-XP window. `hm` is the local start time; `end` is
/// stamped when the session actually starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuffSession {
    pub hm: NaiveTime,
    pub started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub ended: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuffPlan {
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub sessions: Vec<BuffSession>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start(usize),
    End(usize),
}

/// Plans and runs the daily double-voice-XP sessions. Owns the only writer
/// of the global voice bonus flag; the voice tracker reads it.
pub struct BuffScheduler {
    storage: Arc<JsonStore>,
    port: Arc<dyn ChatPort>,
    flag: Arc<AtomicBool>,
    plan: Mutex<BuffPlan>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    channel: ChannelId,
    config: BuffConfig,
}

impl BuffScheduler {
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        storage: Arc<JsonStore>,
        port: Arc<dyn ChatPort>,
        flag: Arc<AtomicBool>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        channel: ChannelId,
        config: BuffConfig,
    ) -> Self {
        let plan: BuffPlan = storage.read(BUFF_FILE).await;
        debug!(
            date = ?plan.date,
            sessions = plan.sessions.len(),
            "buff plan loaded"
        );
        Self {
            storage,
            port,
            flag,
            plan: Mutex::new(plan),
            clock,
            tz,
            channel,
            config,
        }
    }

    /// Main loop: replan at the day boundary, then walk the plan one
    /// transition at a time.
    pub async fn run(self: Arc<Self>) {
        info!(
            max_sessions = self.config.max_sessions_per_day,
            duration_secs = self.config.duration.as_secs(),
            "Starting double voice XP scheduler"
        );

        loop {
            let now = self.clock.now_utc();
            let today = now.with_timezone(&self.tz).date_naive();
            self.ensure_plan(today).await;

            match self.reconcile(now).await {
                Some((at, transition)) => {
                    let wait = (at - now).to_std().unwrap_or_default();
                    tokio::time::sleep(wait).await;
                    self.fire(transition).await;
                }
                None => {
                    // nothing left today, wake for tomorrow's draw at 00:01
                    let next_draw = local_instant(
                        self.tz,
                        today + chrono::Duration::days(1),
                        NaiveTime::from_hms_opt(0, 1, 0).expect("00:01 is a valid time"),
                    );
                    let wait = (next_draw - self.clock.now_utc())
                        .to_std()
                        .unwrap_or_default();
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Draws a fresh plan when the stored one belongs to another date.
    async fn ensure_plan(&self, today: NaiveDate) {
        let snapshot = {
            let mut plan = self.plan.lock().await;
            if plan.date == Some(today) {
                return;
            }
            self.flag.store(false, Ordering::SeqCst);
            *plan = BuffPlan {
                date: Some(today),
                sessions: self.draw_sessions(),
            };
            info!(
                date = %today,
                sessions = plan.sessions.len(),
                "double voice XP sessions drawn"
            );
            plan.clone()
        };
        self.persist(&snapshot).await;
    }

    fn draw_sessions(&self) -> Vec<BuffSession> {
        let duration_min = (self.config.duration.as_secs() / 60) as u32;
        let earliest = self.config.window_start_hour * 60;
        let Some(latest) = (self.config.window_end_hour * 60).checked_sub(duration_min) else {
            warn!("buff window shorter than one session, drawing nothing");
            return Vec::new();
        };
        if latest < earliest {
            warn!("buff window shorter than one session, drawing nothing");
            return Vec::new();
        }

        let starts: BTreeSet<u32> = {
            let mut rng = rand::rng();
            let count = rng.random_range(0..=self.config.max_sessions_per_day);
            let mut picked = BTreeSet::new();
            while picked.len() < count as usize {
                picked.insert(rng.random_range(earliest..=latest));
            }
            picked
        };

        starts
            .into_iter()
            .map(|minute| BuffSession {
                hm: NaiveTime::from_hms_opt(minute / 60, minute % 60, 0)
                    .expect("draw range stays within the day"),
                started: false,
                end: None,
                ended: false,
            })
            .collect()
    }

    /// Settles overdue transitions silently and returns the next live one.
    /// Sessions whose start slipped past are skipped; an in-flight session
    /// keeps the flag up until its stored end.
    async fn reconcile(&self, now: DateTime<Utc>) -> Option<(DateTime<Utc>, Transition)> {
        let (snapshot, next) = {
            let mut plan = self.plan.lock().await;
            let date = plan.date?;
            let mut dirty = false;
            let mut next: Option<(DateTime<Utc>, Transition)> = None;

            for (index, session) in plan.sessions.iter_mut().enumerate() {
                if session.ended {
                    continue;
                }
                let start_at = local_instant(self.tz, date, session.hm);
                if session.started {
                    let end_at = session
                        .end
                        .unwrap_or(start_at + chrono::Duration::seconds(self.duration_secs()));
                    if end_at <= now {
                        self.flag.store(false, Ordering::SeqCst);
                        session.ended = true;
                        dirty = true;
                        debug!(%end_at, "buff session already over, closed silently");
                    } else {
                        self.flag.store(true, Ordering::SeqCst);
                        if next.map_or(true, |(at, _)| end_at < at) {
                            next = Some((end_at, Transition::End(index)));
                        }
                    }
                } else if start_at <= now {
                    session.ended = true;
                    dirty = true;
                    debug!(%start_at, "missed buff start skipped");
                } else if next.map_or(true, |(at, _)| start_at < at) {
                    next = Some((start_at, Transition::Start(index)));
                }
            }

            (dirty.then(|| plan.clone()), next)
        };

        if let Some(snapshot) = snapshot {
            self.persist(&snapshot).await;
        }
        next
    }

    async fn fire(&self, transition: Transition) {
        match transition {
            Transition::Start(index) => self.fire_start(index).await,
            Transition::End(index) => self.fire_end(index).await,
        }
    }

    async fn fire_start(&self, index: usize) {
        let (snapshot, end_at) = {
            let mut plan = self.plan.lock().await;
            let Some(date) = plan.date else { return };
            let Some(session) = plan.sessions.get_mut(index) else {
                return;
            };
            if session.started || session.ended {
                return;
            }
            let start_at = local_instant(self.tz, date, session.hm);
            let end_at = start_at + chrono::Duration::seconds(self.duration_secs());
            session.started = true;
            session.end = Some(end_at);
            self.flag.store(true, Ordering::SeqCst);
            (plan.clone(), end_at)
        };
        self.persist(&snapshot).await;
        info!(%end_at, "double voice XP started");
        self.announce(self.start_message(end_at)).await;
    }

    async fn fire_end(&self, index: usize) {
        let snapshot = {
            let mut plan = self.plan.lock().await;
            let Some(session) = plan.sessions.get_mut(index) else {
                return;
            };
            if session.ended {
                return;
            }
            session.ended = true;
            self.flag.store(false, Ordering::SeqCst);
            plan.clone()
        };
        self.persist(&snapshot).await;
        info!("double voice XP ended");
        self.announce(self.end_message()).await;
    }

    fn duration_secs(&self) -> i64 {
        self.config.duration.as_secs() as i64
    }

    async fn persist(&self, snapshot: &BuffPlan) {
        if let Err(error) = self.storage.write_atomic(BUFF_FILE, snapshot).await {
            warn!(%error, "could not persist the buff plan");
        }
    }

    async fn announce(&self, message: OutboundMessage) {
        if let Err(error) = self.port.send_message(self.channel, message).await {
            warn!(%error, "could not announce the buff transition");
        }
    }

    fn start_message(&self, end_at: DateTime<Utc>) -> OutboundMessage {
        let until = end_at.with_timezone(&self.tz).format("%Hh%M");
        OutboundMessage::embed(
            Embed::new("⚡ XP vocal ×2 activé !")
                .color(0xF1C40F)
                .description(format!(
                    "Chaque minute en vocal compte double jusqu'à {until}."
                )),
        )
    }

    fn end_message(&self) -> OutboundMessage {
        OutboundMessage::embed(
            Embed::new("⚡ XP vocal ×2 terminé")
                .color(0x95A5A6)
                .description("Le multiplicateur retombe à ×1."),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::InMemoryChatPort;
    use crate::shared::ManualClock;
    use chrono::TimeZone;
    use chrono_tz::Europe::Paris;
    use tempfile::TempDir;

    const CHANNEL: ChannelId = 40;

    struct Fixture {
        scheduler: BuffScheduler,
        port: Arc<InMemoryChatPort>,
        flag: Arc<AtomicBool>,
        storage: Arc<JsonStore>,
        clock: Arc<ManualClock>,
        _dir: TempDir,
    }

    /// Clock starts at 12:00 Paris. `seed` is written before the load.
    async fn fixture(seed: Option<BuffPlan>) -> Fixture {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(JsonStore::new(dir.path()));
        storage.ensure_dir().await.unwrap();
        if let Some(plan) = &seed {
            storage.write_atomic(BUFF_FILE, plan).await.unwrap();
        }
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap(),
        ));
        let port = Arc::new(InMemoryChatPort::new());
        let flag = Arc::new(AtomicBool::new(false));
        let scheduler = BuffScheduler::load(
            storage.clone(),
            port.clone(),
            flag.clone(),
            clock.clone(),
            Paris,
            CHANNEL,
            BuffConfig::default(),
        )
        .await;
        Fixture {
            scheduler,
            port,
            flag,
            storage,
            clock,
            _dir: dir,
        }
    }

    fn session(hm: &str, started: bool, end: Option<DateTime<Utc>>, ended: bool) -> BuffSession {
        BuffSession {
            hm: hm.parse().unwrap(),
            started,
            end,
            ended,
        }
    }

    #[tokio::test]
    async fn fresh_plan_is_drawn_sorted_and_persisted() {
        let f = fixture(None).await;
        let today = "2025-03-10".parse().unwrap();

        f.scheduler.ensure_plan(today).await;

        let plan = f.scheduler.plan.lock().await.clone();
        assert_eq!(plan.date, Some(today));
        assert!(plan.sessions.len() <= 2);
        let earliest: NaiveTime = "10:00:00".parse().unwrap();
        let latest: NaiveTime = "22:00:00".parse().unwrap();
        for pair in plan.sessions.windows(2) {
            assert!(pair[0].hm < pair[1].hm);
        }
        for session in &plan.sessions {
            assert!(session.hm >= earliest && session.hm <= latest);
            assert!(!session.started && !session.ended);
        }

        let stored: BuffPlan = f.storage.read(BUFF_FILE).await;
        assert_eq!(stored.date, Some(today));
        assert_eq!(stored.sessions.len(), plan.sessions.len());
    }

    #[tokio::test]
    async fn a_new_day_drops_the_stale_plan_and_the_flag() {
        let stale = BuffPlan {
            date: Some("2025-03-09".parse().unwrap()),
            sessions: vec![session("20:00:00", true, None, false)],
        };
        let f = fixture(Some(stale)).await;
        f.flag.store(true, Ordering::SeqCst);

        f.scheduler.ensure_plan("2025-03-10".parse().unwrap()).await;

        assert!(!f.flag.load(Ordering::SeqCst));
        let plan = f.scheduler.plan.lock().await.clone();
        assert_eq!(plan.date, Some("2025-03-10".parse().unwrap()));
    }

    #[tokio::test]
    async fn missed_starts_are_skipped_silently() {
        let plan = BuffPlan {
            date: Some("2025-03-10".parse().unwrap()),
            sessions: vec![session("10:00:00", false, None, false)],
        };
        let f = fixture(Some(plan)).await;

        let next = f.scheduler.reconcile(f.clock.now_utc()).await;

        assert!(next.is_none());
        assert!(f.scheduler.plan.lock().await.sessions[0].ended);
        assert!(f.port.messages_in(CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn resumed_session_keeps_the_flag_until_its_stored_end() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap();
        let end_at = now + chrono::Duration::milliseconds(100);
        let plan = BuffPlan {
            date: Some("2025-03-10".parse().unwrap()),
            sessions: vec![session("11:30:00", true, Some(end_at), false)],
        };
        let f = fixture(Some(plan)).await;

        let next = f.scheduler.reconcile(now).await;

        assert_eq!(next, Some((end_at, Transition::End(0))));
        assert!(f.flag.load(Ordering::SeqCst));
        assert!(f.port.messages_in(CHANNEL).await.is_empty());
    }

    #[tokio::test]
    async fn overdue_session_closes_without_announcing() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap();
        let plan = BuffPlan {
            date: Some("2025-03-10".parse().unwrap()),
            sessions: vec![session(
                "09:30:00",
                true,
                Some(now - chrono::Duration::seconds(1)),
                false,
            )],
        };
        let f = fixture(Some(plan)).await;
        f.flag.store(true, Ordering::SeqCst);

        let next = f.scheduler.reconcile(now).await;

        assert!(next.is_none());
        assert!(!f.flag.load(Ordering::SeqCst));
        assert!(f.port.messages_in(CHANNEL).await.is_empty());
        let stored: BuffPlan = f.storage.read(BUFF_FILE).await;
        assert!(stored.sessions[0].ended);
    }

    #[tokio::test]
    async fn start_transition_raises_the_flag_and_announces_the_end_time() {
        // 13:00 local, session planned for 14:00
        let plan = BuffPlan {
            date: Some("2025-03-10".parse().unwrap()),
            sessions: vec![session("14:00:00", false, None, false)],
        };
        let f = fixture(Some(plan)).await;
        f.clock
            .set(Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap());

        let next = f.scheduler.reconcile(f.clock.now_utc()).await;
        let start_at = Utc.with_ymd_and_hms(2025, 3, 10, 13, 0, 0).unwrap();
        assert_eq!(next, Some((start_at, Transition::Start(0))));

        f.scheduler.fire(Transition::Start(0)).await;

        assert!(f.flag.load(Ordering::SeqCst));
        let session = f.scheduler.plan.lock().await.sessions[0];
        assert!(session.started);
        assert_eq!(session.end, Some(start_at + chrono::Duration::hours(1)));

        let messages = f.port.messages_in(CHANNEL).await;
        assert_eq!(messages.len(), 1);
        let embed = messages[0].message.embed.as_ref().unwrap();
        assert!(embed.title.contains("activé"));
        assert!(embed.description.as_ref().unwrap().contains("15h00"));
    }

    #[tokio::test]
    async fn end_transition_clears_the_flag_and_announces() {
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap();
        let plan = BuffPlan {
            date: Some("2025-03-10".parse().unwrap()),
            sessions: vec![session(
                "11:30:00",
                true,
                Some(now + chrono::Duration::minutes(30)),
                false,
            )],
        };
        let f = fixture(Some(plan)).await;
        f.flag.store(true, Ordering::SeqCst);

        f.scheduler.fire(Transition::End(0)).await;

        assert!(!f.flag.load(Ordering::SeqCst));
        assert!(f.scheduler.plan.lock().await.sessions[0].ended);
        let messages = f.port.messages_in(CHANNEL).await;
        assert_eq!(messages.len(), 1);
        assert!(messages[0]
            .message
            .embed
            .as_ref()
            .unwrap()
            .title
            .contains("terminé"));
    }
}
