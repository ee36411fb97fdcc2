use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

use crate::activity::{MessageCollector, NoBonus, VoiceTracker};
use crate::buffs::BuffScheduler;
use crate::commands::CommandRegistry;
use crate::config::EngineConfig;
use crate::daily::{run_midnight_loop, AwardPipeline, DailyStats, RankingService};
use crate::event::{EventBus, LevelChange};
use crate::games::{
    start_poster_watch_task, start_role_sweep_task, variants, GameTasksConfig, MiniGame,
    DEFAULT_SPIN_DELAY,
};
use crate::levelfeed::{LevelFeedRouter, DEFAULT_COALESCE_WINDOW};
use crate::platform::ChatPort;
use crate::shared::{Clock, EngineError};
use crate::storage::JsonStore;
use crate::xp::XpStore;

/// Timing knobs. Production values by default; tests shrink them so a
/// scenario settles in milliseconds.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    pub checkpoint_delay: Duration,
    pub coalesce_window: Duration,
    pub spin_delay: Duration,
    pub game_tasks: GameTasksConfig,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self {
            checkpoint_delay: Duration::from_secs(2),
            coalesce_window: DEFAULT_COALESCE_WINDOW,
            spin_delay: DEFAULT_SPIN_DELAY,
            game_tasks: GameTasksConfig::default(),
        }
    }
}

/// The assembled engine: every service wired over one storage directory,
/// one chat port and one clock.
pub struct Engine {
    pub config: EngineConfig,
    pub storage: Arc<JsonStore>,
    pub bus: EventBus,
    pub xp: Arc<XpStore>,
    pub stats: Arc<DailyStats>,
    pub ranking: Arc<RankingService>,
    pub awards: Option<Arc<AwardPipeline>>,
    pub collector: Arc<MessageCollector>,
    pub voice: Arc<VoiceTracker>,
    pub router: Arc<LevelFeedRouter>,
    pub games: Vec<Arc<MiniGame>>,
    pub buffs: Arc<BuffScheduler>,
    pub commands: Arc<CommandRegistry>,
    clock: Arc<dyn Clock>,
    tuning: EngineTuning,
    feed_events: Option<broadcast::Receiver<LevelChange>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Engine {
    /// Builds every service. The level-feed subscription is opened here so
    /// no event emitted after bootstrap can be missed.
    pub async fn bootstrap(
        config: EngineConfig,
        tuning: EngineTuning,
        port: Arc<dyn ChatPort>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        let storage = Arc::new(JsonStore::new(&config.data_dir));
        storage.ensure_dir().await?;

        let bus = EventBus::default();
        let feed_events = bus.subscribe();

        let xp = Arc::new(
            XpStore::load(
                storage.clone(),
                bus.clone(),
                clock.clone(),
                tuning.checkpoint_delay,
            )
            .await,
        );
        let stats = Arc::new(DailyStats::load(storage.clone(), tuning.checkpoint_delay).await);
        let ranking = Arc::new(RankingService::load(stats.clone(), storage.clone()).await);
        let awards = if config.awards_enabled {
            Some(Arc::new(
                AwardPipeline::load(
                    port.clone(),
                    storage.clone(),
                    config.guild,
                    config.announce_channel,
                    config.winner_roles,
                )
                .await,
            ))
        } else {
            None
        };

        let collector = Arc::new(
            MessageCollector::load(
                xp.clone(),
                stats.clone(),
                storage.clone(),
                clock.clone(),
                config.timezone,
            )
            .await,
        );

        let buff_flag = Arc::new(AtomicBool::new(false));
        let voice = Arc::new(
            VoiceTracker::load(
                xp.clone(),
                stats.clone(),
                storage.clone(),
                buff_flag.clone(),
                Arc::new(NoBonus),
                clock.clone(),
                config.timezone,
                tuning.checkpoint_delay,
            )
            .await,
        );

        let router = Arc::new(LevelFeedRouter::new(
            port.clone(),
            config.level_feed_channel,
            tuning.coalesce_window,
        ));

        let mut games = Vec::new();
        for spec in [variants::machine_a_sous(config.jackpot_role), variants::pari_xp()] {
            games.push(Arc::new(
                MiniGame::load(
                    spec,
                    storage.clone(),
                    xp.clone(),
                    port.clone(),
                    clock.clone(),
                    config.timezone,
                    config.games_channel,
                    config.announce_channel,
                    config.games_notify_role,
                    tuning.spin_delay,
                    tuning.checkpoint_delay,
                )
                .await,
            ));
        }

        let buffs = Arc::new(
            BuffScheduler::load(
                storage.clone(),
                port.clone(),
                buff_flag,
                clock.clone(),
                config.timezone,
                config.announce_channel,
                config.buffs,
            )
            .await,
        );

        let commands = Arc::new(CommandRegistry::new(
            xp.clone(),
            stats.clone(),
            ranking.clone(),
            games.clone(),
            port.clone(),
            clock.clone(),
            config.timezone,
        ));

        info!(
            data_dir = %config.data_dir.display(),
            timezone = %config.timezone,
            games = games.len(),
            awards = config.awards_enabled,
            "engine assembled"
        );

        Ok(Self {
            config,
            storage,
            bus,
            xp,
            stats,
            ranking,
            awards,
            collector,
            voice,
            router,
            games,
            buffs,
            commands,
            clock,
            tuning,
            feed_events: Some(feed_events),
            tasks: Vec::new(),
        })
    }

    /// Seals any days the engine slept through, then brings the background
    /// loops up. An award goes out only for the day that just ended; older
    /// rankings are sealed quietly.
    pub async fn start(&mut self) {
        let today = self
            .clock
            .now_utc()
            .with_timezone(&self.config.timezone)
            .date_naive();
        if let Some(sealed) = self.ranking.catch_up(today).await {
            match &self.awards {
                Some(awards) if sealed.date == today - chrono::Duration::days(1) => {
                    awards.maybe_award(&sealed).await;
                }
                _ => info!(date = %sealed.date, "stale ranking sealed without an announcement"),
            }
        }

        if let Some(events) = self.feed_events.take() {
            self.tasks.push(tokio::spawn(self.router.clone().run(events)));
        }
        self.tasks.push(tokio::spawn(run_midnight_loop(
            self.ranking.clone(),
            self.awards.clone(),
            self.config.timezone,
            self.clock.clone(),
        )));
        self.tasks.push(tokio::spawn(self.buffs.clone().run()));
        for game in &self.games {
            self.tasks.push(tokio::spawn(start_poster_watch_task(
                game.clone(),
                self.tuning.game_tasks.watch_interval,
            )));
        }
        self.tasks.push(tokio::spawn(start_role_sweep_task(
            self.games.clone(),
            self.tuning.game_tasks.sweep_interval,
        )));

        info!(tasks = self.tasks.len(), "engine started");
    }

    /// Cancels the background loops, then flushes every store.
    pub async fn shutdown(&mut self) {
        info!("engine shutting down");
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.xp.close().await;
        self.stats.flush().await;
        self.voice.flush().await;
        for game in &self.games {
            game.store().flush().await;
        }
        info!("engine stopped");
    }
}
