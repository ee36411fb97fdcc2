pub mod models;
pub mod service;
pub mod store;
pub mod tasks;
pub mod variants;
pub mod window;

pub use models::{GameError, GameSpec, Reward, RewardTable, SpinOutcome};
pub use service::{MiniGame, DEFAULT_SPIN_DELAY};
pub use store::GameStore;
pub use tasks::{start_poster_watch_task, start_role_sweep_task, GameTasksConfig};
pub use window::PlayWindow;
