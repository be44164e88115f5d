//! Declarative trigger parameters as supplied by a workflow node.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriggerType {
    #[default]
    Message,
    DirectMessage,
    UserJoin,
    UserLeave,
    UserUpdate,
    RoleCreate,
    RoleDelete,
    RoleUpdate,
    MessageReactionAdd,
    MessageReactionRemove,
}

impl TriggerType {
    /// Types that go through the pattern matcher and debounce state machine.
    pub fn is_message(self) -> bool {
        matches!(self, Self::Message | Self::DirectMessage)
    }

    pub fn is_reaction(self) -> bool {
        matches!(self, Self::MessageReactionAdd | Self::MessageReactionRemove)
    }
}

/// How the trigger value is matched against message content.
///
/// Unknown or absent modes fall back to an exact, anchored match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PatternMode {
    BotMention,
    Start,
    End,
    Contain,
    Regex,
    Every,
    #[default]
    #[serde(other)]
    Exact,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdditionalFields {
    /// Allow events authored by other bots (never our own account).
    pub external_bot_trigger: bool,
    pub attachments_required: bool,
    pub debounce_seconds: f64,
    pub cooldown_seconds: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TriggerParameters {
    #[serde(rename = "type")]
    pub kind: TriggerType,
    pub pattern: PatternMode,
    pub value: String,
    pub case_sensitive: bool,
    pub guild_ids: Vec<String>,
    pub channel_ids: Vec<String>,
    pub category_ids: Vec<String>,
    pub role_ids: Vec<String>,
    /// Reaction triggers only: restrict to reactions on these messages.
    pub message_ids: Vec<String>,
    pub message_reference_required: bool,
    pub additional_fields: AdditionalFields,
}

impl TriggerParameters {
    pub fn debounce_seconds(&self) -> f64 {
        non_negative(self.additional_fields.debounce_seconds)
    }

    pub fn cooldown_seconds(&self) -> f64 {
        non_negative(self.additional_fields.cooldown_seconds)
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 {
        value
    } else {
        0.0
    }
}
