use model::stream::CodecError;
use thiserror::Error;

/// Errors produced while planning or running an extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The saved position is no longer covered by the source's log
    /// retention window. Recovery requires a full resync.
    #[error("Saved position `{position}` for `{stream}` is outside the retained log window")]
    StaleCheckpoint { stream: String, position: String },

    #[error("Transient source failure: {0}")]
    Transient(String),

    #[error("Cancelled while waiting on the source")]
    Cancelled,

    #[error("Failed to parse saved state: {0}")]
    StateParse(String),

    #[error("State store failure: {0}")]
    Store(String),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

/// What the caller should do with a failed partition read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Safe to retry from the last persisted checkpoint.
    Retry,
    /// Retrying cannot help; surface the error.
    Fail,
}

impl ExtractError {
    pub fn retry_disposition(&self) -> RetryDisposition {
        match self {
            ExtractError::Transient(_) => RetryDisposition::Retry,
            _ => RetryDisposition::Fail,
        }
    }
}

impl From<sled::Error> for ExtractError {
    fn from(err: sled::Error) -> Self {
        ExtractError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(err: serde_json::Error) -> Self {
        ExtractError::StateParse(err.to_string())
    }
}

impl From<CodecError> for ExtractError {
    fn from(err: CodecError) -> Self {
        ExtractError::StateParse(err.to_string())
    }
}
