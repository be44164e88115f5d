pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Platform(#[from] switchboard_channels::Error),

    #[error("failed to save recording to {path}: {source}")]
    Save {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("transcription failed: {message}")]
    Transcription { message: String },
}

impl Error {
    #[must_use]
    pub fn transcription(message: impl std::fmt::Display) -> Self {
        Self::Transcription {
            message: message.to_string(),
        }
    }
}
