use strum_macros::{Display, EnumString};

use crate::event::LevelChange;
use crate::platform::{mention, Embed};

/// Sources allowed into the level feed. The ledger tags mutations with more
/// sources than these (`voice`, `premier`, ...); those stay internal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum FeedSource {
    PariXp,
    MachineASous,
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn of(event: &LevelChange) -> Self {
        if event.is_level_up() {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

/// One feed rendering: fixed title and color, description lines with
/// `{placeholder}` slots.
#[derive(Debug)]
pub struct FeedTemplate {
    pub title: &'static str,
    pub color: u32,
    lines: &'static [&'static str],
}

static LEVEL_UP: FeedTemplate = FeedTemplate {
    title: "⬆️ LEVEL UP !",
    color: 0x2ECC71,
    lines: &[
        "🔥 {mention} passe **niveau {new_level}**",
        "+{xp_gain} XP — activité détectée 💬⚡",
        "GG ! Le Refuge te voit 👀",
    ],
};

static LEVEL_DOWN: FeedTemplate = FeedTemplate {
    title: "⬇️ LEVEL DOWN",
    color: 0x95A5A6,
    lines: &[
        "{mention} repasse au **niveau {new_level}**",
        "(—{xp_loss} XP)",
        "Pas grave !…",
    ],
};

/// The closed template map. The slot machine deliberately has no descent
/// entry: a missing template means the event is dropped with a warning.
pub fn template_for(source: FeedSource, direction: Direction) -> Option<&'static FeedTemplate> {
    match (source, direction) {
        (_, Direction::Up) => Some(&LEVEL_UP),
        (FeedSource::PariXp | FeedSource::Message, Direction::Down) => Some(&LEVEL_DOWN),
        (FeedSource::MachineASous, Direction::Down) => None,
    }
}

impl FeedTemplate {
    pub fn render(&self, event: &LevelChange) -> Embed {
        let mut description = self
            .lines
            .iter()
            .map(|line| {
                line.replace("{mention}", &mention(event.user))
                    .replace("{new_level}", &event.new_level.to_string())
                    .replace("{xp_gain}", &event.xp_gained().to_string())
                    .replace("{xp_loss}", &event.xp_lost().to_string())
            })
            .collect::<Vec<_>>()
            .join("\n");
        description.push_str(&format!(
            "\nniv. {} → niv. {}",
            event.old_level, event.new_level
        ));

        Embed::new(self.title)
            .color(self.color)
            .description(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(old_level: u32, new_level: u32, old_xp: u64, new_xp: u64) -> LevelChange {
        LevelChange {
            user: 100,
            guild: 1,
            source: "pari_xp".to_string(),
            old_level,
            new_level,
            old_xp,
            new_xp,
        }
    }

    #[test]
    fn source_round_trips_through_snake_case() {
        assert_eq!("pari_xp".parse::<FeedSource>().unwrap(), FeedSource::PariXp);
        assert_eq!(
            "machine_a_sous".parse::<FeedSource>().unwrap(),
            FeedSource::MachineASous
        );
        assert_eq!(FeedSource::PariXp.to_string(), "pari_xp");
        assert!("voice".parse::<FeedSource>().is_err());
    }

    #[test]
    fn up_template_renders_gain_and_transition() {
        let embed = template_for(FeedSource::Message, Direction::Up)
            .unwrap()
            .render(&event(12, 13, 14_400, 16_900));

        assert!(embed.title.starts_with("⬆️ LEVEL UP"));
        let description = embed.description.unwrap();
        assert!(description.contains("<@100> passe **niveau 13**"));
        assert!(description.contains("+2500 XP"));
        assert!(description.contains("niv. 12 → niv. 13"));
    }

    #[test]
    fn down_template_renders_loss() {
        let embed = template_for(FeedSource::PariXp, Direction::Down)
            .unwrap()
            .render(&event(13, 12, 16_900, 14_400));

        assert!(embed.title.starts_with("⬇️ LEVEL DOWN"));
        let description = embed.description.unwrap();
        assert!(description.contains("repasse au **niveau 12**"));
        assert!(description.contains("(—2500 XP)"));
    }

    #[test]
    fn slot_machine_has_no_descent_template() {
        assert!(template_for(FeedSource::MachineASous, Direction::Down).is_none());
        assert!(template_for(FeedSource::MachineASous, Direction::Up).is_some());
    }
}
