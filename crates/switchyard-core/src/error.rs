//! Errors raised by platform calls.

use thiserror::Error;

/// Result type for API calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Error type for API calls.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The bot is not connected.
    #[error("bot is not connected")]
    NotConnected,
    /// The call timed out.
    #[error("API call timed out")]
    Timeout,
    /// The caller's cancellation token fired before the call finished.
    #[error("API call was cancelled")]
    Cancelled,
    /// The platform rejected the call.
    #[error("API error ({code}): {message}")]
    Rejected { code: i32, message: String },
    /// Failed to serialize or deserialize.
    #[error("serialization error: {0}")]
    Serialization(String),
    /// The event does not carry the conversation the call needs.
    #[error("missing session info: {0}")]
    MissingSession(String),
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::Serialization(err.to_string())
    }
}
