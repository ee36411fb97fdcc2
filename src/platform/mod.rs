// Narrow seam to the hosted chat platform.
//
// The engine never talks to a platform SDK directly: everything outbound
// goes through the `ChatPort` trait. Production adapters live outside this
// crate; `InMemoryChatPort` backs development runs and every test.

pub use memory::{InMemoryChatPort, RecordedMessage};
pub use port::{ChatPort, PlatformError};
pub use types::{
    mention, mention_role, ChannelId, Embed, EmbedField, GuildId, Member, MessageId, MessageRef,
    OutboundMessage, RoleId, UserId,
};

mod memory;
mod port;
mod types;
