mod models;
mod store;

pub use models::{level_for_xp, XpRecord, XpTransition};
pub use store::{XpStore, DATA_FILE};
