use thiserror::Error;

/// Errors surfaced by the CAOS API client.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx response. The message carries the response body when the
    /// server sent one, otherwise the canonical reason phrase.
    #[error("{status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),
}

impl ApiError {
    /// HTTP status code for [`ApiError::Status`] errors, `None` otherwise.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}
