use std::collections::HashMap;
use std::sync::Arc;

use chrono::NaiveDate;
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::daily::{compute_ranking, DailyRanking, DailyStats, RankingService};
use crate::games::{GameError, MiniGame};
use crate::platform::{mention, ChannelId, ChatPort, Embed, GuildId, OutboundMessage, UserId};
use crate::shared::{format_hm, Clock};
use crate::xp::XpStore;

const NO_WINNER: &str = "Aucun gagnant";

/// Who may invoke an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Everyone,
    Moderator,
}

#[derive(Debug, Clone, Copy)]
enum Handler {
    Balance,
    Ranking,
    Spin,
}

/// One row of the registry table. For `Spin` rows the name doubles as the
/// game slug.
pub struct CommandEntry {
    pub name: &'static str,
    handler: Handler,
    pub permission: Permission,
    pub cooldown: std::time::Duration,
}

/// A slash-command invocation as the gateway hands it over.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub name: String,
    pub args: Vec<String>,
    pub user: UserId,
    pub guild: GuildId,
    pub channel: ChannelId,
    pub moderator: bool,
}

/// Table-driven command front. Every reply goes out ephemerally to the
/// invoking user; game refusals are translated into short French notices.
pub struct CommandRegistry {
    entries: Vec<CommandEntry>,
    xp: Arc<XpStore>,
    stats: Arc<DailyStats>,
    ranking: Arc<RankingService>,
    games: Vec<Arc<MiniGame>>,
    port: Arc<dyn ChatPort>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    last_use: Mutex<HashMap<(UserId, &'static str), chrono::DateTime<chrono::Utc>>>,
}

impl CommandRegistry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        xp: Arc<XpStore>,
        stats: Arc<DailyStats>,
        ranking: Arc<RankingService>,
        games: Vec<Arc<MiniGame>>,
        port: Arc<dyn ChatPort>,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        let mut entries = vec![
            CommandEntry {
                name: "solde",
                handler: Handler::Balance,
                permission: Permission::Everyone,
                cooldown: std::time::Duration::from_secs(5),
            },
            CommandEntry {
                name: "classement",
                handler: Handler::Ranking,
                permission: Permission::Everyone,
                cooldown: std::time::Duration::from_secs(10),
            },
        ];
        for game in &games {
            entries.push(CommandEntry {
                name: game.slug(),
                handler: Handler::Spin,
                permission: Permission::Everyone,
                cooldown: std::time::Duration::from_secs(3),
            });
        }
        Self {
            entries,
            xp,
            stats,
            ranking,
            games,
            port,
            clock,
            tz,
            last_use: Mutex::new(HashMap::new()),
        }
    }

    /// Registration table, in declaration order.
    pub fn entries(&self) -> &[CommandEntry] {
        &self.entries
    }

    #[instrument(skip(self, invocation), fields(command = %invocation.name, user = invocation.user))]
    pub async fn dispatch(&self, invocation: CommandInvocation) {
        let Some(entry) = self.entries.iter().find(|e| e.name == invocation.name) else {
            debug!("unknown command");
            return;
        };

        if entry.permission == Permission::Moderator && !invocation.moderator {
            self.reply(
                &invocation,
                OutboundMessage::text("⛔ Réservé à la modération."),
            )
            .await;
            return;
        }

        if let Some(remaining) = self.cooldown_remaining(entry, invocation.user).await {
            self.reply(
                &invocation,
                OutboundMessage::text(format!(
                    "⏳ Doucement ! Réessaie dans {}s.",
                    remaining.as_secs().max(1)
                )),
            )
            .await;
            return;
        }

        match entry.handler {
            Handler::Balance => self.handle_balance(&invocation).await,
            Handler::Ranking => self.handle_ranking(&invocation).await,
            Handler::Spin => self.handle_spin(entry.name, &invocation).await,
        }
    }

    /// Stamps the use when the entry is allowed through.
    async fn cooldown_remaining(
        &self,
        entry: &CommandEntry,
        user: UserId,
    ) -> Option<std::time::Duration> {
        let now = self.clock.now_utc();
        let mut last_use = self.last_use.lock().await;
        if let Some(last) = last_use.get(&(user, entry.name)) {
            let elapsed = (now - *last).to_std().unwrap_or_default();
            if elapsed < entry.cooldown {
                return Some(entry.cooldown - elapsed);
            }
        }
        last_use.insert((user, entry.name), now);
        None
    }

    async fn handle_balance(&self, invocation: &CommandInvocation) {
        let record = self.xp.record(invocation.user).await.unwrap_or_default();
        let top = self.xp.top_balances(5).await;
        let lines: Vec<String> = top
            .iter()
            .enumerate()
            .map(|(rank, (user, xp))| format!("{}. {} — {} XP", rank + 1, mention(*user), xp))
            .collect();
        let board = if lines.is_empty() {
            "Personne n'a encore d'XP.".to_string()
        } else {
            lines.join("\n")
        };
        let embed = Embed::new("💰 Solde")
            .color(0x3498DB)
            .description(format!(
                "{} : **{} XP** (niveau {})",
                mention(invocation.user),
                record.xp,
                record.level
            ))
            .field("Top 5", board);
        self.reply(invocation, OutboundMessage::embed(embed)).await;
    }

    async fn handle_ranking(&self, invocation: &CommandInvocation) {
        match invocation.args.first().map(|raw| raw.parse::<NaiveDate>()) {
            Some(Ok(date)) => match self.ranking.get_ranking(date).await {
                Some(sealed) => {
                    let title = format!("📊 Classement du {}", date.format("%d/%m/%Y"));
                    self.reply(
                        invocation,
                        OutboundMessage::embed(ranking_embed(title, &sealed)),
                    )
                    .await;
                }
                None => {
                    self.reply(
                        invocation,
                        OutboundMessage::text("Pas de classement archivé pour cette date."),
                    )
                    .await;
                }
            },
            Some(Err(_)) => {
                self.reply(
                    invocation,
                    OutboundMessage::text("Date invalide, format attendu : AAAA-MM-JJ."),
                )
                .await;
            }
            None => {
                let today = self.clock.now_utc().with_timezone(&self.tz).date_naive();
                let activity = self.stats.activity_on(today).await;
                let provisional = compute_ranking(today, &activity);
                self.reply(
                    invocation,
                    OutboundMessage::embed(ranking_embed(
                        "📊 Classement du jour (provisoire)",
                        &provisional,
                    )),
                )
                .await;
            }
        }
    }

    async fn handle_spin(&self, slug: &str, invocation: &CommandInvocation) {
        let Some(game) = self.games.iter().find(|g| g.slug() == slug) else {
            debug!(slug, "no game registered under this entry");
            return;
        };
        match game
            .spin_with_presentation(invocation.user, invocation.guild)
            .await
        {
            Ok(outcome) => debug!(reward = ?outcome.reward, "spin resolved"),
            Err(error) => {
                self.reply(invocation, OutboundMessage::text(self.refusal_text(&error)))
                    .await;
            }
        }
    }

    fn refusal_text(&self, error: &GameError) -> String {
        match error {
            GameError::NotOpen { next_open } => format!(
                "🔒 C'est fermé ! Réouverture le {}.",
                next_open.with_timezone(&self.tz).format("%d/%m à %Hh%M")
            ),
            GameError::AlreadyClaimed { remaining } => {
                let remaining = chrono::Duration::from_std(*remaining)
                    .unwrap_or_else(|_| chrono::Duration::zero());
                format!(
                    "⏳ Déjà joué aujourd'hui ! Reviens dans {}.",
                    format_hm(remaining)
                )
            }
            GameError::InsufficientBalance { balance, stake } => {
                format!("💸 Il te faut {stake} XP pour miser, il t'en reste {balance}.")
            }
        }
    }

    async fn reply(&self, invocation: &CommandInvocation, message: OutboundMessage) {
        if let Err(error) = self
            .port
            .send_ephemeral(invocation.channel, invocation.user, message)
            .await
        {
            debug!(%error, "could not reply to the command");
        }
    }
}

fn ranking_embed(title: impl Into<String>, ranking: &DailyRanking) -> Embed {
    let mvp = if ranking.top3.mvp.is_empty() {
        NO_WINNER.to_string()
    } else {
        ranking
            .top3
            .mvp
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                format!("{}. {} — score {:.1}", rank + 1, mention(entry.id), entry.score)
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let writers = if ranking.top3.msg.is_empty() {
        NO_WINNER.to_string()
    } else {
        ranking
            .top3
            .msg
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                format!(
                    "{}. {} — {} messages",
                    rank + 1,
                    mention(entry.id),
                    entry.count
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    let voices = if ranking.top3.vc.is_empty() {
        NO_WINNER.to_string()
    } else {
        ranking
            .top3
            .vc
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                format!(
                    "{}. {} — {}",
                    rank + 1,
                    mention(entry.id),
                    format_hm(chrono::Duration::minutes(entry.minutes as i64))
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    Embed::new(title)
        .color(0x3498DB)
        .field("MVP", mvp)
        .field("Écrivain", writers)
        .field("Voix", voices)
}
