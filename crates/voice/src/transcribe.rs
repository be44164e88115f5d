//! Speech-to-text hook for finished recordings.

use {async_trait::async_trait, bytes::Bytes};

use crate::error::Result;

/// A finished capture handed to a [`Transcriber`].
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub audio: Bytes,
    /// Container format, e.g. `ogg`.
    pub format: String,
    /// Language hint (ISO 639-1).
    pub language: Option<String>,
    /// Provider requested by the trigger.
    pub provider: Option<String>,
}

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &'static str;

    /// Turn audio into text. `None` when the provider produced nothing.
    async fn transcribe(&self, request: TranscribeRequest) -> Result<Option<String>>;
}

/// Transcriber that never produces text.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTranscriber;

#[async_trait]
impl Transcriber for NoopTranscriber {
    fn id(&self) -> &'static str {
        "noop"
    }

    async fn transcribe(&self, _request: TranscribeRequest) -> Result<Option<String>> {
        Ok(None)
    }
}
