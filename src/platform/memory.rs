use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::port::{ChatPort, PlatformError};
use super::types::{ChannelId, GuildId, Member, MessageId, OutboundMessage, RoleId, UserId};

/// A message as recorded by the in-memory port.
#[derive(Debug, Clone)]
pub struct RecordedMessage {
    pub id: MessageId,
    pub message: OutboundMessage,
    /// Set when the message was sent as an ephemeral response.
    pub ephemeral_to: Option<UserId>,
    pub edits: u32,
}

/// In-memory [`ChatPort`] for development runs and tests.
///
/// Records every outbound call and lets tests inspect channels, shape the
/// voice roster, and inject the platform failures the engine must survive.
#[derive(Debug, Default)]
pub struct InMemoryChatPort {
    next_id: AtomicU64,
    channels: RwLock<HashMap<ChannelId, Vec<RecordedMessage>>>,
    roles: RwLock<HashMap<(GuildId, RoleId), BTreeSet<UserId>>>,
    voice: RwLock<HashMap<GuildId, Vec<Member>>>,
    unavailable_channels: RwLock<HashSet<ChannelId>>,
    role_denied_users: RwLock<HashSet<UserId>>,
}

impl InMemoryChatPort {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    // ---- test shaping ------------------------------------------------

    pub async fn set_voice_members(&self, guild: GuildId, members: Vec<Member>) {
        self.voice.write().await.insert(guild, members);
    }

    pub async fn mark_channel_unavailable(&self, channel: ChannelId) {
        self.unavailable_channels.write().await.insert(channel);
    }

    pub async fn deny_role_changes_for(&self, user: UserId) {
        self.role_denied_users.write().await.insert(user);
    }

    pub async fn grant_role(&self, guild: GuildId, user: UserId, role: RoleId) {
        self.roles
            .write()
            .await
            .entry((guild, role))
            .or_default()
            .insert(user);
    }

    /// Simulates a message deleted out from under the engine.
    pub async fn remove_message(&self, channel: ChannelId, message: MessageId) {
        if let Some(messages) = self.channels.write().await.get_mut(&channel) {
            messages.retain(|m| m.id != message);
        }
    }

    // ---- inspection --------------------------------------------------

    pub async fn messages_in(&self, channel: ChannelId) -> Vec<RecordedMessage> {
        self.channels
            .read()
            .await
            .get(&channel)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn last_message_in(&self, channel: ChannelId) -> Option<RecordedMessage> {
        self.messages_in(channel).await.into_iter().last()
    }

    pub async fn holders(&self, guild: GuildId, role: RoleId) -> Vec<UserId> {
        self.roles
            .read()
            .await
            .get(&(guild, role))
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    // ---- internals ---------------------------------------------------

    async fn push_message(
        &self,
        channel: ChannelId,
        message: OutboundMessage,
        ephemeral_to: Option<UserId>,
    ) -> Result<MessageId, PlatformError> {
        if self.unavailable_channels.read().await.contains(&channel) {
            return Err(PlatformError::ChannelUnavailable(channel));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.channels
            .write()
            .await
            .entry(channel)
            .or_default()
            .push(RecordedMessage {
                id,
                message,
                ephemeral_to,
                edits: 0,
            });

        debug!(channel, id, "recorded outbound message");
        Ok(id)
    }
}

#[async_trait]
impl ChatPort for InMemoryChatPort {
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutboundMessage,
    ) -> Result<MessageId, PlatformError> {
        self.push_message(channel, message, None).await
    }

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        update: OutboundMessage,
    ) -> Result<(), PlatformError> {
        if self.unavailable_channels.read().await.contains(&channel) {
            return Err(PlatformError::ChannelUnavailable(channel));
        }

        let mut channels = self.channels.write().await;
        let stored = channels
            .get_mut(&channel)
            .and_then(|messages| messages.iter_mut().find(|m| m.id == message))
            .ok_or(PlatformError::NotFound)?;

        stored.message = update;
        stored.edits += 1;
        Ok(())
    }

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError> {
        let mut channels = self.channels.write().await;
        let messages = channels
            .get_mut(&channel)
            .ok_or(PlatformError::ChannelUnavailable(channel))?;
        let before = messages.len();
        messages.retain(|m| m.id != message);
        if messages.len() == before {
            return Err(PlatformError::NotFound);
        }
        Ok(())
    }

    async fn message_exists(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<bool, PlatformError> {
        if self.unavailable_channels.read().await.contains(&channel) {
            return Err(PlatformError::ChannelUnavailable(channel));
        }

        Ok(self
            .channels
            .read()
            .await
            .get(&channel)
            .map(|messages| messages.iter().any(|m| m.id == message))
            .unwrap_or(false))
    }

    async fn send_ephemeral(
        &self,
        channel: ChannelId,
        user: UserId,
        message: OutboundMessage,
    ) -> Result<MessageId, PlatformError> {
        self.push_message(channel, message, Some(user)).await
    }

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), PlatformError> {
        if self.role_denied_users.read().await.contains(&user) {
            return Err(PlatformError::PermissionDenied(format!(
                "cannot manage roles of {}",
                user
            )));
        }
        self.grant_role(guild, user, role).await;
        Ok(())
    }

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), PlatformError> {
        if self.role_denied_users.read().await.contains(&user) {
            return Err(PlatformError::PermissionDenied(format!(
                "cannot manage roles of {}",
                user
            )));
        }
        if let Some(set) = self.roles.write().await.get_mut(&(guild, role)) {
            set.remove(&user);
        }
        Ok(())
    }

    async fn role_holders(
        &self,
        guild: GuildId,
        role: RoleId,
    ) -> Result<Vec<UserId>, PlatformError> {
        Ok(self.holders(guild, role).await)
    }

    async fn voice_members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError> {
        Ok(self
            .voice
            .read()
            .await
            .get(&guild)
            .cloned()
            .unwrap_or_default())
    }
}
