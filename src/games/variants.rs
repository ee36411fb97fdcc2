use crate::platform::RoleId;

use super::models::{GameSpec, Reward, RewardTable};
use super::window::PlayWindow;

/// Slot machine. No stake, open 10h-22h, the 1000 XP tier is the jackpot.
pub fn machine_a_sous(jackpot_role: RoleId) -> GameSpec {
    GameSpec {
        slug: "machine_a_sous",
        display_name: "Machine à sous",
        icon: "🎰",
        rewards: RewardTable::new(
            vec![
                Reward::Xp(0),
                Reward::Xp(50),
                Reward::Xp(120),
                Reward::Ticket,
                Reward::DoubleXp,
                Reward::SharedXp,
                Reward::Xp(1000),
            ],
            vec![40, 25, 15, 8, 6, 4, 2],
        ),
        window: PlayWindow::hours(10, 22),
        stake: None,
        jackpot_threshold: 1000,
        jackpot_role: Some(jackpot_role),
    }
}

/// Roulette. 100 XP stake on every paid spin, open around the clock.
pub fn pari_xp() -> GameSpec {
    GameSpec {
        slug: "pari_xp",
        display_name: "Pari XP",
        icon: "🎲",
        rewards: RewardTable::new(
            vec![
                Reward::Xp(0),
                Reward::Xp(250),
                Reward::Xp(500),
                Reward::Xp(2500),
                Reward::Xp(5000),
            ],
            vec![45, 25, 15, 10, 5],
        ),
        window: PlayWindow::hours(0, 0),
        stake: Some(100),
        jackpot_threshold: 5000,
        jackpot_role: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_carries_every_reward_kind() {
        let spec = machine_a_sous(77);
        assert_eq!(spec.slug, "machine_a_sous");
        assert_eq!(spec.stake, None);
        assert_eq!(spec.jackpot_role, Some(77));
        assert!(spec.window.contains("12:00:00".parse().unwrap()));
        assert!(!spec.window.contains("23:00:00".parse().unwrap()));
    }

    #[test]
    fn roulette_never_closes() {
        let spec = pari_xp();
        assert_eq!(spec.stake, Some(100));
        assert!(spec.window.contains("03:00:00".parse().unwrap()));
        assert!(spec.window.contains("23:59:00".parse().unwrap()));
    }
}
