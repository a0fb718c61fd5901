use thiserror::Error;

/// Failure converting a transport record into a [`crate::MetricRecord`].
#[derive(Debug, Error)]
pub enum WireError {
    #[error("unknown metric kind '{0}'")]
    UnknownKind(String),

    #[error("malformed metric: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Payload: io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload: json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Payload: crypto error: {0}")]
    Crypto(String),

    #[error("Payload: key error: {0}")]
    Key(String),

    #[error("Payload: signature mismatch")]
    Signature,
}

impl From<rsa::Error> for PayloadError {
    fn from(e: rsa::Error) -> Self {
        PayloadError::Crypto(e.to_string())
    }
}
