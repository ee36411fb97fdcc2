mod router;
mod templates;

pub use router::{LevelFeedRouter, DEFAULT_COALESCE_WINDOW};
pub use templates::{template_for, Direction, FeedSource, FeedTemplate};
