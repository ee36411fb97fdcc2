use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-user ledger entry, one per user in `data.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct XpRecord {
    pub xp: u64,
    pub level: u32,
    /// Active double-XP window, cleared lazily once expired.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub double_xp_until: Option<DateTime<Utc>>,
}

/// Result of one balance mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XpTransition {
    pub old_xp: u64,
    pub new_xp: u64,
    pub old_level: u32,
    pub new_level: u32,
}

impl XpTransition {
    pub fn level_changed(&self) -> bool {
        self.old_level != self.new_level
    }
}

/// Level curve shared by every reader: `floor(sqrt(xp / 100))`.
pub fn level_for_xp(xp: u64) -> u32 {
    (xp as f64 / 100.0).sqrt().floor() as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, 0)]
    #[case(99, 0)]
    #[case(100, 1)]
    #[case(399, 1)]
    #[case(400, 2)]
    #[case(8_100, 9)]
    #[case(1_000_000, 100)]
    fn level_curve(#[case] xp: u64, #[case] level: u32) {
        assert_eq!(level_for_xp(xp), level);
    }
}
