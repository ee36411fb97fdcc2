use async_trait::async_trait;
use thiserror::Error;

use super::types::{ChannelId, GuildId, Member, MessageId, OutboundMessage, RoleId, UserId};

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("channel {0} unavailable")]
    ChannelUnavailable(ChannelId),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("message not found")]
    NotFound,

    #[error("transient platform failure: {0}")]
    Transient(String),
}

/// Outbound operations against the chat platform.
///
/// Retries and rate-limit backoff belong to the adapter behind this trait;
/// the engine calls once and awaits. Implementations must be safe to share
/// across tasks.
#[async_trait]
pub trait ChatPort: Send + Sync {
    async fn send_message(
        &self,
        channel: ChannelId,
        message: OutboundMessage,
    ) -> Result<MessageId, PlatformError>;

    async fn edit_message(
        &self,
        channel: ChannelId,
        message: MessageId,
        update: OutboundMessage,
    ) -> Result<(), PlatformError>;

    async fn delete_message(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<(), PlatformError>;

    /// Whether a previously posted message is still present in the channel.
    async fn message_exists(
        &self,
        channel: ChannelId,
        message: MessageId,
    ) -> Result<bool, PlatformError>;

    /// Sends a message only `user` can see (interaction responses).
    async fn send_ephemeral(
        &self,
        channel: ChannelId,
        user: UserId,
        message: OutboundMessage,
    ) -> Result<MessageId, PlatformError>;

    async fn add_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), PlatformError>;

    async fn remove_role(
        &self,
        guild: GuildId,
        user: UserId,
        role: RoleId,
    ) -> Result<(), PlatformError>;

    /// Every member currently holding `role`.
    async fn role_holders(
        &self,
        guild: GuildId,
        role: RoleId,
    ) -> Result<Vec<UserId>, PlatformError>;

    /// Members currently connected to any voice channel of the guild.
    async fn voice_members(&self, guild: GuildId) -> Result<Vec<Member>, PlatformError>;
}
