//! Messaging channel protocol between workflow processes and the coordinator.
//!
//! Every frame is one JSON object per line: `{"type": <name>, "data": <payload>}`.
//!
//! Message patterns:
//! - registration: client → coordinator, never answered
//! - request/response: the coordinator answers with a single frame whose
//!   `type` is the reply name of the request (see [`ClientMessage::reply_name`])
//! - push events: coordinator → the connection owning the matching trigger

pub mod actions;
pub mod events;
pub mod messages;
pub mod trigger;
pub mod voice;

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use {
    messages::{
        ChannelStatusQuery, ChannelStatusReply, ClientMessage, CredentialStatus, Credentials,
        ListOption, ListRequest, NodeRef, SendRequest, ToggleAction, ToggleChannel, ToggleReply,
        TriggerRegistration, VoiceTriggerRegistration,
    },
    trigger::{AdditionalFields, PatternMode, TriggerParameters, TriggerType},
    voice::{
        AdditionalOptions, RecordingOptions, Transcription, UserFilters, VoiceMode,
        VoiceTriggerParameters,
    },
};

// ── Constants ────────────────────────────────────────────────────────────────

/// How long a client waits for a reply before giving up.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);
/// Frames longer than this are rejected by both ends.
pub const MAX_FRAME_BYTES: usize = 8 * 1024 * 1024;

// ── Message names ────────────────────────────────────────────────────────────

pub mod names {
    pub const CREDENTIALS: &str = "credentials";
    pub const TRIGGER_REGISTERED: &str = "triggerNodeRegistered";
    pub const TRIGGER_REMOVED: &str = "triggerNodeRemoved";
    pub const VOICE_TRIGGER_REGISTERED: &str = "voiceTriggerNodeRegistered";
    pub const VOICE_TRIGGER_REMOVED: &str = "voiceTriggerNodeRemoved";

    pub const LIST_GUILDS: &str = "list:guilds";
    pub const LIST_CHANNELS: &str = "list:channels";
    pub const LIST_CATEGORIES: &str = "list:categories";
    pub const LIST_ROLES: &str = "list:roles";
    pub const LIST_VOICE_CHANNELS: &str = "list:voiceChannels";

    pub const SEND_MESSAGE: &str = "send:message";
    pub const SEND_ACTION: &str = "send:action";
    pub const SEND_CONFIRMATION: &str = "send:confirmation";

    pub const SUPPORT_TOGGLE_CHANNEL: &str = "support:toggle-channel";
    pub const SUPPORT_CHECK_CHANNEL_STATUS: &str = "support:check-channel-status";

    pub const CALLBACK_SEND_MESSAGE: &str = "callback:send:message";
    pub const CALLBACK_SEND_ACTION: &str = "callback:send:action";
    pub const CALLBACK_SEND_CONFIRMATION: &str = "callback:send:confirmation";
    pub const CALLBACK_TOGGLE_CHANNEL: &str = "callback:support:toggle-channel";
    pub const CALLBACK_CHECK_CHANNEL_STATUS: &str = "callback:support:check-channel-status";

    pub const MESSAGE_CREATE: &str = "messageCreate";
    pub const GUILD_MEMBER_ADD: &str = "guildMemberAdd";
    pub const GUILD_MEMBER_REMOVE: &str = "guildMemberRemove";
    pub const GUILD_MEMBER_UPDATE: &str = "guildMemberUpdate";
    pub const ROLE_CREATE: &str = "roleCreate";
    pub const ROLE_DELETE: &str = "roleDelete";
    pub const ROLE_UPDATE: &str = "roleUpdate";
    pub const MESSAGE_REACTION_ADD: &str = "messageReactionAdd";
    pub const MESSAGE_REACTION_REMOVE: &str = "messageReactionRemove";
    pub const VOICE_STATE_UPDATE: &str = "voiceStateUpdate";
    pub const VOICE_RECORDING: &str = "voiceRecording";
    pub const VOICE_ACTIVITY: &str = "voiceActivity";
    pub const VOICE_ERROR: &str = "voiceError";
}

// ── Envelope ─────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeds {MAX_FRAME_BYTES} bytes")]
    TooLarge,
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// One line on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            kind: kind.into(),
            data,
        }
    }

    pub fn from_payload<T: Serialize>(
        kind: impl Into<String>,
        payload: &T,
    ) -> Result<Self, FrameError> {
        Ok(Self::new(kind, serde_json::to_value(payload)?))
    }

    /// Encode as a single newline-terminated line.
    pub fn encode(&self) -> Result<String, FrameError> {
        let mut line = serde_json::to_string(self)?;
        if line.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge);
        }
        line.push('\n');
        Ok(line)
    }

    pub fn decode(line: &str) -> Result<Self, FrameError> {
        if line.len() > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge);
        }
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> Result<T, FrameError> {
        Ok(serde_json::from_value(self.data.clone())?)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn encode_is_single_line() {
        let env = Envelope::new(names::CREDENTIALS, serde_json::json!("ready"));
        let line = env.encode().unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(line, "{\"type\":\"credentials\",\"data\":\"ready\"}\n");
    }

    #[test]
    fn decode_defaults_missing_data_to_null() {
        let env = Envelope::decode(r#"{"type":"list:guilds"}"#).unwrap();
        assert_eq!(env.kind, names::LIST_GUILDS);
        assert!(env.data.is_null());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(matches!(
            Envelope::decode("not json"),
            Err(FrameError::Json(_))
        ));
    }
}
