//! Voice connection seam.

use std::{sync::Arc, time::Duration};

use {bytes::Bytes, tokio::sync::mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceStatus {
    Signalling,
    Connecting,
    Ready,
    Disconnected,
    Destroyed,
}

impl VoiceStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Destroyed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceLinkEvent {
    Status(VoiceStatus),
    SpeakingStarted { user_id: String },
    Error { message: String },
}

pub trait VoiceConnection: Send + Sync {
    /// Subscribe to one speaker's decoded audio. The stream ends after
    /// `end_after_silence` without packets.
    fn subscribe(&self, user_id: &str, end_after_silence: Duration) -> mpsc::Receiver<Bytes>;

    /// Leave the channel. Idempotent.
    fn destroy(&self);
}

/// A joined voice channel: the connection plus its status/speaking events.
pub struct VoiceLink {
    pub connection: Arc<dyn VoiceConnection>,
    pub events: mpsc::Receiver<VoiceLinkEvent>,
}
