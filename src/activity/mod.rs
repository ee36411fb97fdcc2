mod collector;
mod voice;

pub use collector::{FirstWin, InboundMessage, MessageCollector, FIRST_WIN_FILE};
pub use voice::{NoBonus, ParticipationBonus, VoiceTracker, VOICE_TIMES_FILE};
