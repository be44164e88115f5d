//! The chat platform as seen by the coordinator.
//!
//! A concrete SDK binding implements [`PlatformConnector`] and
//! [`PlatformClient`]; the coordinator only ever talks to these traits.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    switchboard_common::types::{
        ChannelInfo, GuildRef, Member, Message, Reaction, Role, VoiceState,
    },
    tokio::sync::mpsc,
};

use crate::{Result, voice::VoiceLink};

/// Inbound platform events, delivered in order per connection.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    MessageCreate(Message),
    MemberAdd {
        member: Member,
        guild: GuildRef,
    },
    MemberRemove {
        member: Member,
        guild: GuildRef,
    },
    MemberUpdate {
        old: Option<Member>,
        new: Member,
        guild: GuildRef,
    },
    RoleCreate(Role),
    RoleDelete(Role),
    RoleUpdate {
        old: Role,
        new: Role,
    },
    ReactionAdd(Reaction),
    ReactionRemove(Reaction),
    VoiceStateUpdate {
        old: VoiceState,
        new: VoiceState,
    },
    /// Non-fatal client error reported by the SDK.
    Error(String),
}

impl PlatformEvent {
    /// Push message name used when this event is routed to a trigger.
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageCreate(_) => "messageCreate",
            Self::MemberAdd { .. } => "guildMemberAdd",
            Self::MemberRemove { .. } => "guildMemberRemove",
            Self::MemberUpdate { .. } => "guildMemberUpdate",
            Self::RoleCreate(_) => "roleCreate",
            Self::RoleDelete(_) => "roleDelete",
            Self::RoleUpdate { .. } => "roleUpdate",
            Self::ReactionAdd(_) => "messageReactionAdd",
            Self::ReactionRemove(_) => "messageReactionRemove",
            Self::VoiceStateUpdate { .. } => "voiceStateUpdate",
            Self::Error(_) => "error",
        }
    }
}

/// Content of an outbound message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    /// Attachment URLs.
    pub files: Vec<String>,
}

impl OutboundMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files: Vec::new(),
        }
    }
}

/// A yes/no prompt with two buttons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationPrompt {
    pub message: OutboundMessage,
    pub yes_label: String,
    pub no_label: String,
}

#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Id of the bot account this client is logged in as.
    fn user_id(&self) -> &str;

    async fn fetch_message(&self, channel_id: &str, message_id: &str) -> Result<Message>;
    async fn send_message(&self, channel_id: &str, message: OutboundMessage) -> Result<Message>;
    /// Reply to `to` in its channel.
    async fn reply(&self, to: &Message, content: &str) -> Result<Message>;
    /// Most recent messages, newest first.
    async fn fetch_messages(&self, channel_id: &str, limit: u32) -> Result<Vec<Message>>;
    /// Delete up to `count` recent messages. Returns how many were deleted.
    async fn bulk_delete(&self, channel_id: &str, count: u32) -> Result<u32>;

    async fn member(&self, guild_id: &str, user_id: &str) -> Result<Member>;
    async fn add_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()>;
    async fn remove_member_role(&self, guild_id: &str, user_id: &str, role_id: &str) -> Result<()>;

    /// Post a prompt and wait for a button press. `None` when nobody answered
    /// within `timeout`.
    async fn confirm(
        &self,
        channel_id: &str,
        prompt: ConfirmationPrompt,
        timeout: Duration,
    ) -> Result<Option<bool>>;

    async fn guilds(&self) -> Result<Vec<GuildRef>>;
    /// All channels of a guild, categories and voice channels included.
    async fn channels(&self, guild_id: &str) -> Result<Vec<ChannelInfo>>;
    async fn channel(&self, channel_id: &str) -> Result<ChannelInfo>;
    async fn roles(&self, guild_id: &str) -> Result<Vec<Role>>;
    /// Members currently connected to a voice channel.
    async fn voice_channel_members(&self, guild_id: &str, channel_id: &str) -> Result<Vec<Member>>;

    async fn join_voice(&self, guild_id: &str, channel_id: &str) -> Result<VoiceLink>;

    /// Log out and stop delivering events.
    async fn shutdown(&self);
}

/// A logged-in client plus the stream of its events.
pub struct PlatformConnection {
    pub client: Arc<dyn PlatformClient>,
    pub events: mpsc::Receiver<PlatformEvent>,
}

#[async_trait]
pub trait PlatformConnector: Send + Sync {
    /// Log in with a bot token.
    async fn connect(&self, token: &str, client_id: &str) -> Result<PlatformConnection>;
}
