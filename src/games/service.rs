use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::seq::IndexedRandom;
use tracing::{debug, info, instrument, warn};

use crate::platform::{
    mention, mention_role, ChannelId, ChatPort, Embed, GuildId, MessageRef, OutboundMessage,
    RoleId, UserId,
};
use crate::shared::{local_midnight, Clock};
use crate::storage::JsonStore;
use crate::xp::XpStore;

use super::models::{GameError, GameSpec, Reward, SpinOutcome};
use super::store::{GameStore, RoleGrant};

pub const DEFAULT_SPIN_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

const SHARED_XP: i64 = 50;
const DOUBLE_XP_MINUTES: i64 = 60;
const JACKPOT_ROLE_HOURS: i64 = 24;

/// One playable variant: the gate chain, the draw, and its presence in the
/// games channel.
pub struct MiniGame {
    spec: GameSpec,
    store: GameStore,
    xp: Arc<XpStore>,
    port: Arc<dyn ChatPort>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    games_channel: ChannelId,
    announce_channel: ChannelId,
    notify_role: RoleId,
    spin_delay: std::time::Duration,
}

impl MiniGame {
    #[allow(clippy::too_many_arguments)]
    pub async fn load(
        spec: GameSpec,
        storage: Arc<JsonStore>,
        xp: Arc<XpStore>,
        port: Arc<dyn ChatPort>,
        clock: Arc<dyn Clock>,
        tz: Tz,
        games_channel: ChannelId,
        announce_channel: ChannelId,
        notify_role: RoleId,
        spin_delay: std::time::Duration,
        checkpoint_delay: std::time::Duration,
    ) -> Self {
        let store = GameStore::load(storage, spec.slug, checkpoint_delay).await;
        Self {
            spec,
            store,
            xp,
            port,
            clock,
            tz,
            games_channel,
            announce_channel,
            notify_role,
            spin_delay,
        }
    }

    pub fn slug(&self) -> &'static str {
        self.spec.slug
    }

    pub fn store(&self) -> &GameStore {
        &self.store
    }

    /// Runs the gate chain and, if all gates pass, draws and applies one
    /// reward.
    ///
    /// Gate order is fixed: window, ticket, daily quota, stake. A consumed
    /// ticket makes the spin free: no quota, no stake. The quota is
    /// committed before the RNG runs, so a double-click cannot double-spend.
    #[instrument(skip(self), fields(game = self.spec.slug))]
    pub async fn spin(&self, user: UserId, guild: GuildId) -> Result<SpinOutcome, GameError> {
        let now = self.clock.now_utc();
        let local = now.with_timezone(&self.tz);

        if !self.spec.window.contains(local.time()) {
            return Err(GameError::NotOpen {
                next_open: self.spec.window.next_open(self.tz, now),
            });
        }

        let today = local.date_naive();
        let free_spin = self.store.try_consume_ticket(user).await;

        if !free_spin {
            if self.store.has_claimed(user, today).await {
                let midnight = local_midnight(self.tz, today + Duration::days(1));
                return Err(GameError::AlreadyClaimed {
                    remaining: (midnight - now).to_std().unwrap_or_default(),
                });
            }

            if let Some(stake) = self.spec.stake {
                let balance = self.xp.get_balance(user).await;
                if balance < stake as u64 {
                    return Err(GameError::InsufficientBalance { balance, stake });
                }
            }

            self.store.commit_claim(user, today).await;

            if let Some(stake) = self.spec.stake {
                self.xp.add_xp(user, -stake, guild, self.spec.slug).await;
            }
        }

        let reward = {
            let mut rng = rand::rng();
            self.spec.rewards.draw(&mut rng, free_spin)
        };
        let outcome = self.apply_reward(user, guild, reward, free_spin, now).await;
        info!(user, ?outcome.reward, free = outcome.free_spin, "spin resolved");
        Ok(outcome)
    }

    /// Full user-facing flow: spin, show the ephemeral animation, then edit
    /// the result in. Gate errors surface to the caller untouched.
    pub async fn spin_with_presentation(
        &self,
        user: UserId,
        guild: GuildId,
    ) -> Result<SpinOutcome, GameError> {
        let outcome = self.spin(user, guild).await?;

        match self
            .port
            .send_ephemeral(self.games_channel, user, self.spinner_message())
            .await
        {
            Ok(message) => {
                tokio::time::sleep(self.spin_delay).await;
                if let Err(error) = self
                    .port
                    .edit_message(self.games_channel, message, self.result_message(&outcome))
                    .await
                {
                    debug!(%error, "could not replace the spinner");
                }
            }
            Err(error) => debug!(%error, "could not show the spinner"),
        }

        Ok(outcome)
    }

    async fn apply_reward(
        &self,
        user: UserId,
        guild: GuildId,
        reward: Reward,
        free_spin: bool,
        now: DateTime<Utc>,
    ) -> SpinOutcome {
        let mut shared_with = None;
        let mut jackpot = false;

        match reward {
            Reward::Xp(amount) => {
                if amount != 0 {
                    self.xp.add_xp(user, amount, guild, self.spec.slug).await;
                }
                if amount > 0 && amount >= self.spec.jackpot_threshold {
                    jackpot = true;
                    self.grant_jackpot_role(user, guild, now).await;
                }
            }
            Reward::Ticket => self.store.grant_ticket(user).await,
            Reward::DoubleXp => self.xp.grant_double_xp(user, DOUBLE_XP_MINUTES).await,
            Reward::SharedXp => {
                self.xp.add_xp(user, SHARED_XP, guild, self.spec.slug).await;
                shared_with = self.pick_voice_companion(user, guild).await;
                if let Some(companion) = shared_with {
                    self.xp
                        .add_xp(companion, SHARED_XP, guild, "partage_xp")
                        .await;
                }
            }
        }

        SpinOutcome {
            reward,
            free_spin,
            shared_with,
            jackpot,
        }
    }

    async fn grant_jackpot_role(&self, user: UserId, guild: GuildId, now: DateTime<Utc>) {
        let Some(role) = self.spec.jackpot_role else {
            return;
        };
        if let Err(error) = self.port.add_role(guild, user, role).await {
            warn!(user, %error, "could not grant the jackpot role");
            return;
        }
        self.store
            .record_role_grant(
                user,
                RoleGrant {
                    guild,
                    role,
                    expires: now + Duration::hours(JACKPOT_ROLE_HOURS),
                },
            )
            .await;
        info!(user, "jackpot role granted");
    }

    /// One random non-bot voice occupant, never the caller.
    async fn pick_voice_companion(&self, caller: UserId, guild: GuildId) -> Option<UserId> {
        let members = match self.port.voice_members(guild).await {
            Ok(members) => members,
            Err(error) => {
                debug!(%error, "voice roster unavailable");
                return None;
            }
        };
        let candidates: Vec<UserId> = members
            .iter()
            .filter(|member| !member.bot && member.id != caller)
            .map(|member| member.id)
            .collect();
        let mut rng = rand::rng();
        candidates.choose(&mut rng).copied()
    }

    /// Removes jackpot roles whose grant has expired. A failed removal keeps
    /// the grant so the next sweep retries it.
    pub async fn sweep_expired_roles(&self) {
        let now = self.clock.now_utc();
        for (user, grant) in self.store.expired_role_grants(now).await {
            match self.port.remove_role(grant.guild, user, grant.role).await {
                Ok(()) => {
                    self.store.clear_role_grant(user).await;
                    info!(user, game = self.spec.slug, "jackpot role expired");
                }
                Err(error) => {
                    warn!(user, %error, "could not remove the expired jackpot role")
                }
            }
        }
    }

    /// One watcher pass: keep the poster alive and matching the window, and
    /// announce open/close transitions exactly once.
    pub async fn reconcile_presence(&self) {
        let local = self.clock.now_utc().with_timezone(&self.tz);
        let open = self.spec.window.contains(local.time());
        let flipped = self.store.last_announced_open().await != Some(open);

        self.refresh_poster(open, flipped).await;
        if flipped {
            self.announce_transition(open).await;
        }
    }

    async fn refresh_poster(&self, open: bool, flipped: bool) {
        if let Some(poster) = self.store.poster().await {
            let exists = self
                .port
                .message_exists(poster.channel, poster.message)
                .await
                .unwrap_or(false);
            if exists {
                if !flipped {
                    return;
                }
                if self
                    .port
                    .edit_message(poster.channel, poster.message, self.poster_message(open))
                    .await
                    .is_ok()
                {
                    return;
                }
            }
        }

        match self
            .port
            .send_message(self.games_channel, self.poster_message(open))
            .await
        {
            Ok(message) => {
                self.store
                    .set_poster(Some(MessageRef {
                        channel: self.games_channel,
                        message,
                    }))
                    .await;
                debug!(game = self.spec.slug, open, "poster replaced");
            }
            Err(error) => debug!(%error, "could not refresh the poster"),
        }
    }

    async fn announce_transition(&self, open: bool) {
        match self
            .port
            .send_message(self.announce_channel, self.transition_message(open))
            .await
        {
            Ok(message) => {
                if let Some(previous) = self.store.state_message().await {
                    if let Err(error) = self
                        .port
                        .delete_message(previous.channel, previous.message)
                        .await
                    {
                        debug!(%error, "could not delete the previous state message");
                    }
                }
                self.store
                    .set_state_message(Some(MessageRef {
                        channel: self.announce_channel,
                        message,
                    }))
                    .await;
                self.store.set_last_announced_open(open).await;
                info!(game = self.spec.slug, open, "window change announced");
            }
            Err(error) => debug!(%error, "could not announce the window change"),
        }
    }

    fn spinner_message(&self) -> OutboundMessage {
        OutboundMessage::embed(
            Embed::new(format!("{} {}", self.spec.icon, self.spec.display_name))
                .description("Ça tourne…"),
        )
    }

    fn result_message(&self, outcome: &SpinOutcome) -> OutboundMessage {
        let description = match outcome.reward {
            Reward::Xp(0) => "Perdu ! Retente ta chance demain.".to_string(),
            Reward::Xp(amount) if outcome.jackpot => format!("💎 JACKPOT ! +{amount} XP"),
            Reward::Xp(amount) => format!("+{amount} XP !"),
            Reward::Ticket => "🎟️ Un ticket ! Rejoue tout de suite.".to_string(),
            Reward::DoubleXp => "⚡ XP doublé pendant 1h !".to_string(),
            Reward::SharedXp => match outcome.shared_with {
                Some(other) => format!("🤝 +{SHARED_XP} XP pour toi et {}", mention(other)),
                None => format!("🤝 +{SHARED_XP} XP (personne en vocal pour partager)"),
            },
        };
        OutboundMessage::embed(
            Embed::new(format!("{} {}", self.spec.icon, self.spec.display_name))
                .description(description),
        )
    }

    fn poster_message(&self, open: bool) -> OutboundMessage {
        let title = format!("{} {}", self.spec.icon, self.spec.display_name);
        let embed = if open {
            Embed::new(title).color(0x2ECC71).description(format!(
                "La salle est ouverte ! Lance `/{}` pour jouer.\nOuvert de {}h à {}h.",
                self.spec.slug,
                self.spec.window.start_hour(),
                self.spec.window.end_hour(),
            ))
        } else {
            Embed::new(title).color(0x992D22).description(format!(
                "Fermé. Réouverture à {}h00.",
                self.spec.window.start_hour(),
            ))
        };
        OutboundMessage::embed(embed)
    }

    fn transition_message(&self, open: bool) -> OutboundMessage {
        let embed = if open {
            Embed::new(format!("{} {} est ouvert !", self.spec.icon, self.spec.display_name))
                .color(0x2ECC71)
                .description(format!("Tente ta chance avec `/{}` !", self.spec.slug))
        } else {
            Embed::new(format!("{} {} est fermé", self.spec.icon, self.spec.display_name))
                .color(0x992D22)
                .description(format!(
                    "Réouverture à {}h00.",
                    self.spec.window.start_hour()
                ))
        };
        OutboundMessage::embed(embed).with_content(mention_role(self.notify_role))
    }
}
