use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use refuge_engine::engine::{Engine, EngineTuning};
use refuge_engine::platform::InMemoryChatPort;
use refuge_engine::shared::SystemClock;
use refuge_engine::EngineConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refuge_engine=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Refuge engagement engine");

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            warn!(%error, "incomplete environment, running on defaults");
            EngineConfig::default()
        }
    };

    // The production gateway adapter plugs into `ChatPort` here; the
    // in-memory port keeps development runs self-contained.
    let port = Arc::new(InMemoryChatPort::new());
    let clock = Arc::new(SystemClock);

    let mut engine = Engine::bootstrap(config, EngineTuning::default(), port, clock)
        .await
        .expect("engine bootstrap failed");
    engine.start().await;

    tokio::signal::ctrl_c()
        .await
        .expect("failed to listen for ctrl-c");
    engine.shutdown().await;
}
