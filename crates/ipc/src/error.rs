use switchboard_protocol::FrameError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("no reply to {kind} within the request timeout")]
    Timeout { kind: String },

    #[error("{kind} does not expect a reply")]
    NoReply { kind: String },

    #[error("connection to the coordinator closed")]
    Disconnected,
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Frame(FrameError::Json(err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
