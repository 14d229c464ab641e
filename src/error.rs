use thiserror::Error;

/// Errors surfaced at the session boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Wrong payload kind or shape, or an operation out of order. Rescan and retry.
    #[error("validation error: {0}")]
    Validation(String),
    /// Corrupt QR or URL payload. Rescan.
    #[error("decode error: {0}")]
    Decode(String),
    /// The transport could not be created or refused a description.
    #[error("negotiation error: {0}")]
    Negotiation(String),
    /// Channel closed or failed after connecting. Start a new session.
    #[error("channel error: {0}")]
    Channel(String),
}

impl SessionError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SessionError::Validation(_) | SessionError::Decode(_))
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
