use crate::platform::{GuildId, UserId};

/// Emitted by the XP store whenever a balance mutation crosses a level
/// boundary. Carried on the [`EventBus`](super::EventBus) so downstream
/// consumers never touch the store's lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelChange {
    pub user: UserId,
    pub guild: GuildId,
    /// Feature that caused the mutation, e.g. `"message"` or `"pari_xp"`.
    pub source: String,
    pub old_level: u32,
    pub new_level: u32,
    pub old_xp: u64,
    pub new_xp: u64,
}

impl LevelChange {
    pub fn is_level_up(&self) -> bool {
        self.new_level > self.old_level
    }

    /// XP gained by the mutation; zero for losses.
    pub fn xp_gained(&self) -> u64 {
        self.new_xp.saturating_sub(self.old_xp)
    }

    /// XP lost by the mutation; zero for gains.
    pub fn xp_lost(&self) -> u64 {
        self.old_xp.saturating_sub(self.new_xp)
    }
}
