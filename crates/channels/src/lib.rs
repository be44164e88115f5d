//! Chat platform seam.
//!
//! The coordinator drives a platform account through [`PlatformConnector`]
//! and [`PlatformClient`]. [`memory`] provides a scriptable implementation
//! used by tests and by the `memory` platform of the CLI.

pub mod error;
pub mod gating;
pub mod memory;
pub mod platform;
pub mod voice;

pub use {
    error::{Error, Result},
    memory::{MemoryConnector, MemoryPlatform, MemoryVoiceConnection, SentRecord},
    platform::{
        ConfirmationPrompt, OutboundMessage, PlatformClient, PlatformConnection,
        PlatformConnector, PlatformEvent,
    },
    voice::{VoiceConnection, VoiceLink, VoiceLinkEvent, VoiceStatus},
};
