use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;

use refuge_engine::config::WinnerRoles;
use refuge_engine::engine::{Engine, EngineTuning};
use refuge_engine::games::GameTasksConfig;
use refuge_engine::platform::{InMemoryChatPort, RecordedMessage};
use refuge_engine::shared::ManualClock;
use refuge_engine::EngineConfig;

// ============================================================================
// Test Setup Infrastructure
// ============================================================================

pub const GUILD: u64 = 1;
pub const ANNOUNCE_CHANNEL: u64 = 2;
pub const LEVEL_FEED_CHANNEL: u64 = 3;
pub const GAMES_CHANNEL: u64 = 4;

const COALESCE_WINDOW: Duration = Duration::from_millis(30);

pub struct EngineSetup {
    pub engine: Engine,
    pub port: Arc<InMemoryChatPort>,
    pub clock: Arc<ManualClock>,
    pub _data_dir: TempDir,
}

impl EngineSetup {
    /// Waits out the router's coalescing window plus dispatch slack.
    pub async fn settle(&self) {
        tokio::time::sleep(COALESCE_WINDOW + Duration::from_millis(90)).await;
    }

    pub async fn feed_messages(&self) -> Vec<RecordedMessage> {
        self.port.messages_in(LEVEL_FEED_CHANNEL).await
    }
}

pub struct EngineSetupBuilder {
    start: DateTime<Utc>,
    awards_enabled: bool,
    seed_files: Vec<(String, serde_json::Value)>,
}

impl EngineSetupBuilder {
    /// Defaults to 12:00 Paris on 2025-03-10.
    pub fn new() -> Self {
        Self {
            start: Utc.with_ymd_and_hms(2025, 3, 10, 11, 0, 0).unwrap(),
            awards_enabled: true,
            seed_files: Vec::new(),
        }
    }

    pub fn starting_at(mut self, instant: DateTime<Utc>) -> Self {
        self.start = instant;
        self
    }

    /// Drops a JSON document into the data directory before the engine
    /// boots, as if a previous run had written it.
    pub fn with_seed_file(mut self, name: &str, value: serde_json::Value) -> Self {
        self.seed_files.push((name.to_string(), value));
        self
    }

    #[allow(dead_code)]
    pub fn without_awards(mut self) -> Self {
        self.awards_enabled = false;
        self
    }

    pub async fn build(self) -> EngineSetup {
        let data_dir = TempDir::new().unwrap();
        for (name, value) in &self.seed_files {
            let body = serde_json::to_vec_pretty(value).unwrap();
            std::fs::write(data_dir.path().join(name), body).unwrap();
        }

        let config = EngineConfig {
            data_dir: data_dir.path().to_path_buf(),
            guild: GUILD,
            announce_channel: ANNOUNCE_CHANNEL,
            level_feed_channel: LEVEL_FEED_CHANNEL,
            games_channel: GAMES_CHANNEL,
            games_notify_role: 55,
            jackpot_role: 77,
            winner_roles: WinnerRoles {
                mvp: 61,
                writer: 62,
                voice: 63,
            },
            awards_enabled: self.awards_enabled,
            ..EngineConfig::default()
        };
        let tuning = EngineTuning {
            checkpoint_delay: Duration::from_millis(5),
            coalesce_window: COALESCE_WINDOW,
            spin_delay: Duration::from_millis(5),
            game_tasks: GameTasksConfig::default(),
        };

        let port = Arc::new(InMemoryChatPort::new());
        let clock = Arc::new(ManualClock::new(self.start));
        let mut engine = Engine::bootstrap(config, tuning, port.clone(), clock.clone())
            .await
            .unwrap();
        engine.start().await;

        EngineSetup {
            engine,
            port,
            clock,
            _data_dir: data_dir,
        }
    }
}
