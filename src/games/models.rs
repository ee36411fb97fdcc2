use rand::distr::weighted::WeightedIndex;
use rand::distr::Distribution;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform::{RoleId, UserId};

use super::window::PlayWindow;

#[derive(Debug, Error)]
pub enum GameError {
    #[error("closed, opens again at {next_open}")]
    NotOpen {
        next_open: chrono::DateTime<chrono::Utc>,
    },
    #[error("already played today, next spin in {remaining:?}")]
    AlreadyClaimed { remaining: std::time::Duration },
    #[error("balance {balance} cannot cover the {stake} XP stake")]
    InsufficientBalance { balance: u64, stake: i64 },
}

/// One tier of a variant's reward table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Reward {
    /// Plain payout. `Xp(0)` is the losing tier.
    Xp(i64),
    /// A stored re-spin credit.
    Ticket,
    /// Double XP for one hour.
    DoubleXp,
    /// 50 XP to the caller and to one random voice occupant.
    SharedXp,
}

impl Reward {
    pub fn is_noop(&self) -> bool {
        matches!(self, Reward::Xp(0))
    }
}

/// Parallel `payouts ∥ weights` table.
///
/// Panics when the arrays diverge, a weight is zero, or no paying tier
/// exists. Tables are static configuration; a bad one must fail at startup.
#[derive(Debug, Clone)]
pub struct RewardTable {
    payouts: Vec<Reward>,
    weights: Vec<u32>,
}

impl RewardTable {
    pub fn new(payouts: Vec<Reward>, weights: Vec<u32>) -> Self {
        assert_eq!(payouts.len(), weights.len(), "payouts and weights must stay parallel");
        assert!(weights.iter().all(|w| *w > 0), "weights must be positive");
        assert!(
            payouts.iter().any(|p| !p.is_noop()),
            "a table needs at least one paying tier"
        );
        Self { payouts, weights }
    }

    /// Draws one tier, index chosen proportionally to its weight. Free draws
    /// drop the losing tier before normalization.
    pub fn draw(&self, rng: &mut impl Rng, exclude_noop: bool) -> Reward {
        let candidates: Vec<usize> = (0..self.payouts.len())
            .filter(|i| !exclude_noop || !self.payouts[*i].is_noop())
            .collect();
        let weights: Vec<u32> = candidates.iter().map(|i| self.weights[*i]).collect();
        let index = WeightedIndex::new(&weights)
            .expect("constructor guarantees at least one positive weight");
        self.payouts[candidates[index.sample(rng)]]
    }
}

/// Static description of one game variant.
#[derive(Debug, Clone)]
pub struct GameSpec {
    pub slug: &'static str,
    pub display_name: &'static str,
    pub icon: &'static str,
    pub rewards: RewardTable,
    pub window: PlayWindow,
    /// XP debited on every paid spin; `None` for stake-free variants.
    pub stake: Option<i64>,
    /// Payouts at or above this grant the jackpot role.
    pub jackpot_threshold: i64,
    pub jackpot_role: Option<RoleId>,
}

/// What one spin produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinOutcome {
    pub reward: Reward,
    /// Paid with a ticket instead of the daily quota.
    pub free_spin: bool,
    /// Second beneficiary of a shared payout.
    pub shared_with: Option<UserId>,
    pub jackpot: bool,
}
