use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unsupported model architecture: {0}")]
    UnsupportedArchitecture(String),

    #[error("Missing required weight: {0}")]
    MissingWeight(String),

    #[error("Invalid quantized weight {name}: {reason}")]
    InvalidQuantization { name: String, reason: String },

    #[error("Malformed embeddings file: {0}")]
    MalformedEmbeddings(String),

    #[error("Input mismatch: {0}")]
    InputMismatch(String),

    #[error("Operation failed: {0}")]
    Operation(String),

    /// Work superseded by a newer query. Never shown to users.
    #[error("Cancelled")]
    Cancelled,
}

impl Error {
    /// Load-time errors that a retry cannot fix.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_)
                | Self::NotFound(_)
                | Self::UnsupportedArchitecture(_)
                | Self::MissingWeight(_)
                | Self::InvalidQuantization { .. }
                | Self::MalformedEmbeddings(_)
        )
    }
}

/// True when `err` (or anything in its chain) is [`Error::Cancelled`].
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|cause| matches!(cause.downcast_ref::<Error>(), Some(Error::Cancelled)))
}

pub type Result<T> = std::result::Result<T, Error>;
