use error_types::ErrorResponse;

pub type ClientResult<T> = Result<T, ClientError>;

/// Failures a chat client can observe.
///
/// Everything except `Transient` is terminal: the caller surfaces it and does
/// not retry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("not signed in")]
    Unauthorized,

    #[error("not allowed: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("temporarily unavailable: {0}")]
    Transient(String),

    #[error("session closed")]
    Closed,
}

impl ClientError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ClientError::Transient(_))
    }

    /// Maps a non-success response to the client taxonomy. `body` is the
    /// service's error envelope when it could be decoded.
    pub fn from_status(status: u16, body: Option<ErrorResponse>) -> Self {
        let message = body
            .map(|b| b.message)
            .unwrap_or_else(|| format!("HTTP {status}"));
        match status {
            401 => ClientError::Unauthorized,
            403 => ClientError::Forbidden(message),
            404 => ClientError::NotFound(message),
            400 | 422 => ClientError::Validation(message),
            _ => ClientError::Transient(message),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ClientError::Transient(format!("unexpected response body: {e}"))
        } else {
            ClientError::Transient(e.to_string())
        }
    }
}
