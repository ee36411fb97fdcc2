use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use super::service::MiniGame;

/// Configuration for the games background loops.
#[derive(Debug, Clone)]
pub struct GameTasksConfig {
    /// How often each poster is reconciled against its window.
    pub watch_interval: Duration,
    /// How often expired jackpot roles are swept.
    pub sweep_interval: Duration,
}

impl Default for GameTasksConfig {
    fn default() -> Self {
        Self {
            watch_interval: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(60),
        }
    }
}

/// Keeps one game's poster and open/close announcements in sync with its
/// play window. Recreates the poster when a moderator deletes it.
pub async fn start_poster_watch_task(game: Arc<MiniGame>, watch_interval: Duration) {
    info!(
        game = game.slug(),
        watch_interval_secs = watch_interval.as_secs(),
        "Starting poster watch background task"
    );

    let mut ticker = interval(watch_interval);

    loop {
        ticker.tick().await;
        debug!(game = game.slug(), "Reconciling game presence");
        game.reconcile_presence().await;
    }
}

/// Strips jackpot roles whose grant has run out, across every variant.
pub async fn start_role_sweep_task(games: Vec<Arc<MiniGame>>, sweep_interval: Duration) {
    info!(
        games = games.len(),
        sweep_interval_secs = sweep_interval.as_secs(),
        "Starting jackpot role sweep background task"
    );

    let mut ticker = interval(sweep_interval);

    loop {
        ticker.tick().await;
        for game in &games {
            game.sweep_expired_roles().await;
        }
    }
}
