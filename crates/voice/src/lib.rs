//! Voice session manager.
//!
//! One [`VoiceManager`] per platform client joins monitored voice channels,
//! records each speaker, and leaves once only bots remain.

pub mod capture;
pub mod error;
pub mod filters;
pub mod manager;
pub mod session;
pub mod transcribe;

pub use {
    error::{Error, Result},
    filters::user_passes,
    manager::{VoiceManager, VoiceSettings},
    session::{RecordingTarget, SessionId, SessionKey, VoiceEvent},
    transcribe::{NoopTranscriber, TranscribeRequest, Transcriber},
};
