//! Client → coordinator message catalogue and the replies it produces.

use serde::{Deserialize, Serialize};

use crate::{
    Envelope, FrameError,
    actions::{ActionParameters, ConfirmationParameters, SendMessageParameters},
    names,
    trigger::TriggerParameters,
    voice::VoiceTriggerParameters,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credentials {
    pub token: String,
    pub client_id: String,
}

impl Credentials {
    pub fn is_complete(&self) -> bool {
        !self.token.is_empty() && !self.client_id.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRegistration {
    pub node_id: String,
    pub token: String,
    #[serde(default)]
    pub parameters: TriggerParameters,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceTriggerRegistration {
    pub node_id: String,
    pub token: String,
    #[serde(default)]
    pub parameters: VoiceTriggerParameters,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    pub node_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListRequest {
    pub token: String,
    pub guild_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest<P> {
    pub token: String,
    pub node_parameters: P,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Close,
    Open,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleChannel {
    pub channel_id: String,
    pub action: ToggleAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusQuery {
    pub channel_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientMessage {
    #[serde(rename = "credentials")]
    Credentials(Credentials),
    #[serde(rename = "triggerNodeRegistered")]
    TriggerNodeRegistered(TriggerRegistration),
    #[serde(rename = "triggerNodeRemoved")]
    TriggerNodeRemoved(NodeRef),
    #[serde(rename = "voiceTriggerNodeRegistered")]
    VoiceTriggerNodeRegistered(VoiceTriggerRegistration),
    #[serde(rename = "voiceTriggerNodeRemoved")]
    VoiceTriggerNodeRemoved(NodeRef),
    #[serde(rename = "list:guilds")]
    ListGuilds(ListRequest),
    #[serde(rename = "list:channels")]
    ListChannels(ListRequest),
    #[serde(rename = "list:categories")]
    ListCategories(ListRequest),
    #[serde(rename = "list:roles")]
    ListRoles(ListRequest),
    #[serde(rename = "list:voiceChannels")]
    ListVoiceChannels(ListRequest),
    #[serde(rename = "send:message")]
    SendMessage(SendRequest<SendMessageParameters>),
    #[serde(rename = "send:action")]
    SendAction(SendRequest<ActionParameters>),
    #[serde(rename = "send:confirmation")]
    SendConfirmation(SendRequest<ConfirmationParameters>),
    #[serde(rename = "support:toggle-channel")]
    ToggleChannel(ToggleChannel),
    #[serde(rename = "support:check-channel-status")]
    CheckChannelStatus(ChannelStatusQuery),
}

impl ClientMessage {
    /// Name of the reply frame, `None` for fire-and-forget messages.
    pub fn reply_name(&self) -> Option<&'static str> {
        match self {
            Self::Credentials(_) => Some(names::CREDENTIALS),
            Self::TriggerNodeRegistered(_)
            | Self::TriggerNodeRemoved(_)
            | Self::VoiceTriggerNodeRegistered(_)
            | Self::VoiceTriggerNodeRemoved(_) => None,
            Self::ListGuilds(_) => Some(names::LIST_GUILDS),
            Self::ListChannels(_) => Some(names::LIST_CHANNELS),
            Self::ListCategories(_) => Some(names::LIST_CATEGORIES),
            Self::ListRoles(_) => Some(names::LIST_ROLES),
            Self::ListVoiceChannels(_) => Some(names::LIST_VOICE_CHANNELS),
            Self::SendMessage(_) => Some(names::CALLBACK_SEND_MESSAGE),
            Self::SendAction(_) => Some(names::CALLBACK_SEND_ACTION),
            Self::SendConfirmation(_) => Some(names::CALLBACK_SEND_CONFIRMATION),
            Self::ToggleChannel(_) => Some(names::CALLBACK_TOGGLE_CHANNEL),
            Self::CheckChannelStatus(_) => Some(names::CALLBACK_CHECK_CHANNEL_STATUS),
        }
    }

    pub fn to_envelope(&self) -> Result<Envelope, FrameError> {
        Ok(serde_json::from_value(serde_json::to_value(self)?)?)
    }

    pub fn from_envelope(envelope: &Envelope) -> Result<Self, FrameError> {
        let data = if envelope.data.is_null() {
            serde_json::json!({})
        } else {
            envelope.data.clone()
        };
        let value = serde_json::json!({ "type": envelope.kind, "data": data });
        Ok(serde_json::from_value(value)?)
    }
}

/// Reply to `credentials`.
///
/// Clients written against older coordinators may also check for a
/// `different` status; it is never produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialStatus {
    /// Login finished for this request.
    Ready,
    /// A connection for the token already exists.
    Already,
    /// A login for the token is in flight.
    Login,
    /// Token or client id missing.
    Missing,
    Error,
}

impl CredentialStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Already)
    }

    /// Human readable explanation shown in node option lists.
    pub fn describe(self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Already => "already",
            Self::Login => "Already logging in",
            Self::Missing => "Token or clientId missing",
            Self::Error => "Invalid credentials",
        }
    }
}

/// One entry of a `list:*` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOption {
    pub name: String,
    pub value: String,
}

impl ListOption {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToggleReply {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ToggleAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStatusReply {
    pub channel_id: String,
    pub is_disabled: bool,
    pub is_enabled: bool,
}

impl ChannelStatusReply {
    pub fn new(channel_id: impl Into<String>, is_disabled: bool) -> Self {
        Self {
            channel_id: channel_id.into(),
            is_disabled,
            is_enabled: !is_disabled,
        }
    }
}
