use thiserror::Error;

/// Errors produced by the tally protocol layer.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("codec error: {0}")]
    Codec(String),

    #[error("invalid message: {0}")]
    InvalidMessage(String),

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session limit reached: {0}")]
    SessionLimit(usize),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ciborium::de::Error<std::io::Error>> for TallyError {
    fn from(e: ciborium::de::Error<std::io::Error>) -> Self {
        TallyError::Codec(e.to_string())
    }
}

impl From<ciborium::ser::Error<std::io::Error>> for TallyError {
    fn from(e: ciborium::ser::Error<std::io::Error>) -> Self {
        TallyError::Codec(e.to_string())
    }
}

pub type TallyResult<T> = Result<T, TallyError>;

/// A recoverable, per-line problem reported on a session's error stream.
///
/// The `Display` output is exactly the diagnostic text sent to the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    /// The line is not a base-10 integer, or does not fit in an `i64`.
    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    /// Input grew past the configured maximum line length before a newline.
    #[error("Line too long: exceeded {0} bytes")]
    TooLong(usize),
}
