//! Per-trigger filters applied to inbound platform events.
//!
//! Filters run in a fixed order and the first failing one decides the skip
//! reason. Empty allow-lists admit everything.

use {
    switchboard_channels::gating,
    switchboard_common::types::{Message, Reaction, User},
    switchboard_protocol::{TriggerParameters, TriggerType},
};

/// Why a trigger did not fire for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    WrongType,
    ChannelDisabled,
    BotAuthor,
    OwnEvent,
    Guild,
    Role,
    Category,
    Channel,
    MessageId,
    ReferenceRequired,
    ReferenceUnavailable,
    Pattern,
    AttachmentsRequired,
    InvalidPattern,
}

impl SkipReason {
    /// Metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WrongType => "wrong_type",
            Self::ChannelDisabled => "channel_disabled",
            Self::BotAuthor => "bot_author",
            Self::OwnEvent => "own_event",
            Self::Guild => "guild",
            Self::Role => "role",
            Self::Category => "category",
            Self::Channel => "channel",
            Self::MessageId => "message_id",
            Self::ReferenceRequired => "reference_required",
            Self::ReferenceUnavailable => "reference_unavailable",
            Self::Pattern => "pattern",
            Self::AttachmentsRequired => "attachments_required",
            Self::InvalidPattern => "invalid_pattern",
        }
    }
}

pub type Check = Result<(), SkipReason>;

fn require(condition: bool, reason: SkipReason) -> Check {
    if condition { Ok(()) } else { Err(reason) }
}

/// Bot-author policy. Our own account never triggers. Other bot and system
/// accounts only trigger with `externalBotTrigger`.
pub fn author_policy(params: &TriggerParameters, author: &User, own_user_id: &str) -> Check {
    require(author.id != own_user_id, SkipReason::OwnEvent)?;
    require(
        params.additional_fields.external_bot_trigger || !author.is_automated(),
        SkipReason::BotAuthor,
    )
}

/// Guild allow-list. Events without a guild pass.
pub fn guild(params: &TriggerParameters, guild_id: Option<&str>) -> Check {
    require(
        guild_id.is_none_or(|id| gating::is_allowed(id, &params.guild_ids)),
        SkipReason::Guild,
    )
}

/// Category allow-list. A channel outside any category fails a non-empty list.
pub fn category(params: &TriggerParameters, parent_id: Option<&str>) -> Check {
    require(
        gating::is_allowed_opt(parent_id, &params.category_ids),
        SkipReason::Category,
    )
}

pub fn channel(params: &TriggerParameters, channel_id: &str) -> Check {
    require(
        gating::is_allowed(channel_id, &params.channel_ids),
        SkipReason::Channel,
    )
}

pub fn roles<'a>(params: &TriggerParameters, role_ids: impl Iterator<Item = &'a str>) -> Check {
    require(
        gating::any_allowed(role_ids, &params.role_ids),
        SkipReason::Role,
    )
}

/// Filters of a message trigger that need nothing but the message itself.
///
/// Guild-scoped filters and the disabled-channel check do not apply to
/// direct messages.
pub fn message(
    params: &TriggerParameters,
    message: &Message,
    own_user_id: &str,
    channel_disabled: bool,
) -> Check {
    let direct = message.is_direct();
    match params.kind {
        TriggerType::Message => require(!direct, SkipReason::WrongType)?,
        TriggerType::DirectMessage => require(direct, SkipReason::WrongType)?,
        _ => return Err(SkipReason::WrongType),
    }
    require(direct || !channel_disabled, SkipReason::ChannelDisabled)?;
    author_policy(params, &message.author, own_user_id)?;
    if !direct {
        guild(params, message.guild_id())?;
        let member_roles = message.member_roles();
        roles(params, member_roles.iter().map(|r| r.id.as_str()))?;
        category(params, message.parent_id.as_deref())?;
        channel(params, &message.channel_id)?;
    }
    require(
        !params.message_reference_required || message.reference.is_some(),
        SkipReason::ReferenceRequired,
    )
}

pub fn attachments(params: &TriggerParameters, message: &Message) -> Check {
    require(
        !params.additional_fields.attachments_required || !message.attachments.is_empty(),
        SkipReason::AttachmentsRequired,
    )
}

/// Filters of a reaction trigger that only need the reaction.
pub fn reaction_early(params: &TriggerParameters, reaction: &Reaction, own_user_id: &str) -> Check {
    author_policy(params, &reaction.user, own_user_id)?;
    guild(params, reaction.guild_id.as_deref())?;
    require(
        gating::is_allowed(&reaction.message_id, &params.message_ids),
        SkipReason::MessageId,
    )
}

/// Filters of a reaction trigger that need the reacted-to message. Roles
/// are those of the reacting member.
pub fn reaction_late(params: &TriggerParameters, reaction: &Reaction, message: &Message) -> Check {
    category(params, message.parent_id.as_deref())?;
    channel(params, &message.channel_id)?;
    let reactor_roles = reaction.member.as_ref().map(|m| m.roles.as_slice()).unwrap_or_default();
    roles(params, reactor_roles.iter().map(|r| r.id.as_str()))
}
