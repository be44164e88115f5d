use std::error::Error as StdError;

/// Crate-wide result type for platform operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed platform errors shared across the client traits.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid platform input: {message}")]
    InvalidInput { message: String },

    /// The referenced object does not exist or is not visible to the bot.
    #[error("unknown {kind}: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Login was rejected.
    #[error("login failed: {message}")]
    Login { message: String },

    /// Operation is currently unavailable (client shut down, missing permission).
    #[error("platform operation unavailable: {message}")]
    Unavailable { message: String },

    /// Wrapped source error from the platform SDK.
    #[error("platform operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn login(message: impl std::fmt::Display) -> Self {
        Self::Login {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unavailable(message: impl std::fmt::Display) -> Self {
        Self::Unavailable {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
