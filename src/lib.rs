// Library crate for the Refuge engagement engine
// This file exposes the public API for integration tests

pub mod activity;
pub mod buffs;
pub mod commands;
pub mod config;
pub mod daily;
pub mod engine;
pub mod event;
pub mod games;
pub mod levelfeed;
pub mod platform;
pub mod shared;
pub mod storage;
pub mod xp;

// Re-export commonly used types for easier access in tests
pub use commands::{CommandInvocation, CommandRegistry};
pub use config::{BuffConfig, EngineConfig, WinnerRoles};
pub use engine::{Engine, EngineTuning};
pub use event::{EventBus, LevelChange};
pub use platform::{ChatPort, InMemoryChatPort};
pub use shared::{Clock, EngineError, ManualClock, SystemClock};
pub use storage::JsonStore;
pub use xp::XpStore;
