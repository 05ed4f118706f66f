use std::time::Duration;
use thiserror::Error;

/// Failure reported by a [`Transport`](super::Transport).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("Rate limited (429 Too Many Requests)")]
    RateLimited { retry_after: Option<Duration> },
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Unauthorized: {status} - {message}")]
    Unauthorized { status: u16, message: String },
    #[error("Invalid request: {status} - {message}")]
    InvalidRequest { status: u16, message: String },
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    pub fn status(&self) -> Option<u16> {
        match self {
            TransportError::RateLimited { .. } => Some(429),
            TransportError::Server { status, .. }
            | TransportError::Unauthorized { status, .. }
            | TransportError::InvalidRequest { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            TransportError::Timeout(error.to_string())
        } else if error.is_connect() || error.is_request() {
            TransportError::Network(error.to_string())
        } else {
            TransportError::Other(error.to_string())
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(error: serde_json::Error) -> Self {
        TransportError::Serialization(error.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(error: std::io::Error) -> Self {
        TransportError::Serialization(error.to_string())
    }
}
