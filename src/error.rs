use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LookupError {
    /// Taxonomy bucket used by batch items and history.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LookupError::Validation(_) | LookupError::Config(_) => ErrorKind::Validation,
            LookupError::Network(_) => ErrorKind::Network,
            LookupError::Server(_) => ErrorKind::Server,
            LookupError::Unauthorized(_) => ErrorKind::Unauthorized,
            LookupError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LookupError::Network(_))
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(e: serde_json::Error) -> Self {
        LookupError::Server(format!("malformed payload: {}", e))
    }
}

/// Outcome classification for a single lookup.
///
/// `NotFound` never appears as a `LookupError`: a well-formed query with no
/// match is data (`found = false`), so it only shows up here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Network,
    Server,
    Unauthorized,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Validation => write!(f, "ValidationError"),
            ErrorKind::NotFound => write!(f, "NotFoundError"),
            ErrorKind::Network => write!(f, "NetworkError"),
            ErrorKind::Server => write!(f, "ServerError"),
            ErrorKind::Unauthorized => write!(f, "UnauthorizedError"),
            ErrorKind::Cancelled => write!(f, "Cancelled"),
        }
    }
}

pub type Result<T> = std::result::Result<T, LookupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_retryable() {
        assert!(LookupError::Network("reset".into()).is_retryable());
        assert!(!LookupError::Server("500".into()).is_retryable());
        assert!(!LookupError::Unauthorized("expired".into()).is_retryable());
        assert!(!LookupError::Validation("bad".into()).is_retryable());
    }

    #[test]
    fn test_json_error_is_server_error() {
        let err: LookupError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), ErrorKind::Server);
    }
}
