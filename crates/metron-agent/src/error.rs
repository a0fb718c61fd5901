use metron_common::PayloadError;
use metron_storage::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Some collectors or store writes failed; the rest were applied.
    #[error("Agent: partial sampling, {} failure(s): {}", .failures.len(), .failures.join("; "))]
    PartialSampling { failures: Vec<String> },

    #[error("Agent: {0}")]
    Storage(#[from] StorageError),

    #[error("Agent: {0}")]
    Payload(#[from] PayloadError),

    #[error("Agent: transport error: {0}")]
    Transport(String),

    #[error("Agent: collector responded with status {0}")]
    Status(u16),

    #[error("Agent: {0} timed out")]
    Timeout(&'static str),

    #[error("Agent: invalid state: {0}")]
    InvalidState(String),
}

pub type Result<T> = std::result::Result<T, AgentError>;
