pub mod scheduler;

pub use scheduler::{BuffPlan, BuffScheduler, BuffSession, BUFF_FILE};
