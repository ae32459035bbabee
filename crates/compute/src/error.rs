use thiserror::Error;

/// Errors from the detection capability.
#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid detection request: {0}")]
    InvalidRequest(String),

    #[error("detection failed: {0}")]
    Failed(String),
}

/// Errors from the data-fetch capability.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("data source returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl SourceError {
    /// Whether a later retry could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Request(e) => e.is_timeout() || e.is_connect(),
            SourceError::Status { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
