use switchboard_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Platform(#[from] switchboard_channels::Error),

    #[error(transparent)]
    Ipc(#[from] switchboard_ipc::Error),

    #[error(transparent)]
    Lock(#[from] switchboard_lock::Error),

    #[error("invalid trigger pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

switchboard_common::impl_context!();
