//! Push payloads sent from the coordinator to the connection owning a trigger.
//!
//! Every payload carries the `nodeId` of the trigger it was routed for.

use {
    serde::{Deserialize, Serialize},
    switchboard_common::types::{
        Attachment, ChannelRef, GuildRef, Member, Message, MessageReference, Reaction, Role,
        RoleRef, User, VoiceState,
    },
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageCreatePayload {
    pub message: Message,
    /// The message this one replies to, when it could be resolved.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_author: Option<User>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<GuildRef>,
    pub author: User,
    pub member_roles: Vec<RoleRef>,
    pub attachments: Vec<Attachment>,
    pub node_id: String,
}

impl MessageCreatePayload {
    pub fn new(message: Message, reference: Option<Message>, node_id: impl Into<String>) -> Self {
        Self {
            reference_author: reference.as_ref().map(|m| m.author.clone()),
            guild: message.guild.clone(),
            author: message.author.clone(),
            member_roles: message.member_roles(),
            attachments: message.attachments.clone(),
            message_reference: reference,
            message,
            node_id: node_id.into(),
        }
    }
}

/// `guildMemberAdd` / `guildMemberRemove`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberPayload {
    pub guild_member: Member,
    pub guild: GuildRef,
    pub user: User,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberUpdatePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_member: Option<Member>,
    pub new_member: Member,
    pub guild: GuildRef,
    pub node_id: String,
}

/// `roleCreate` / `roleDelete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolePayload {
    pub role: Role,
    pub guild: GuildRef,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleUpdatePayload {
    pub old_role: Role,
    pub new_role: Role,
    pub guild: GuildRef,
    pub node_id: String,
}

/// `messageReactionAdd` / `messageReactionRemove`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionPayload {
    pub message_reaction: Reaction,
    pub message: Message,
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild: Option<GuildRef>,
    pub node_id: String,
}

/// Flattened view of one side of a voice state transition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<ChannelRef>,
    pub self_mute: bool,
    pub self_deaf: bool,
    pub server_mute: bool,
    pub server_deaf: bool,
    pub streaming: bool,
    pub self_video: bool,
}

impl From<&VoiceState> for VoiceStateSnapshot {
    fn from(state: &VoiceState) -> Self {
        Self {
            channel_id: state.channel_id().map(str::to_string),
            channel: state.channel.clone(),
            self_mute: state.self_mute,
            self_deaf: state.self_deaf,
            server_mute: state.server_mute,
            server_deaf: state.server_deaf,
            streaming: state.streaming,
            self_video: state.self_video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceStateUpdatePayload {
    pub old_state: VoiceStateSnapshot,
    pub new_state: VoiceStateSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Member>,
    pub guild: GuildRef,
    pub node_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoiceActivityAction {
    Join,
    Leave,
    Move,
}

impl VoiceActivityAction {
    /// Classify a transition by the channel ids on either side.
    ///
    /// Returns `None` when the member stayed in the same channel (mute,
    /// deafen, stream toggles).
    pub fn classify(old: Option<&str>, new: Option<&str>) -> Option<Self> {
        match (old, new) {
            (None, Some(_)) => Some(Self::Join),
            (Some(_), None) => Some(Self::Leave),
            (Some(a), Some(b)) if a != b => Some(Self::Move),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceActivityPayload {
    pub action: VoiceActivityAction,
    pub user: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_channel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_channel_id: Option<String>,
    pub guild: GuildRef,
    pub node_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recording {
    /// Base64 encoded audio.
    pub buffer: String,
    /// Milliseconds.
    pub duration: u64,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceRecordingPayload {
    pub recording: Recording,
    pub user: User,
    pub channel: ChannelRef,
    pub guild: GuildRef,
    pub node_id: String,
    pub transcription: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceErrorDetail {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceErrorPayload {
    pub error: VoiceErrorDetail,
    pub node_id: String,
}

impl VoiceErrorPayload {
    pub fn new(message: impl Into<String>, node_id: impl Into<String>) -> Self {
        Self {
            error: VoiceErrorDetail {
                message: message.into(),
            },
            node_id: node_id.into(),
        }
    }
}

/// Reference to a message inside a push payload, used by outbound handlers
/// that only need the ids.
pub fn reference_of(message: &Message) -> MessageReference {
    MessageReference {
        channel_id: message.channel_id.clone(),
        message_id: message.id.clone(),
    }
}
