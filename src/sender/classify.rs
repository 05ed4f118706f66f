//! Failure classification shared by the coordinator and the retry engine.

use super::error::TransportError;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    NetworkError,
    Timeout,
    RateLimit,
    ServerError,
    AuthenticationError,
    Unknown,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NetworkError => "network_error",
            FailureReason::Timeout => "timeout",
            FailureReason::RateLimit => "rate_limit",
            FailureReason::ServerError => "server_error",
            FailureReason::AuthenticationError => "authentication_error",
            FailureReason::Unknown => "unknown",
        }
    }

    /// Factor applied to the exponential backoff delay.
    pub fn backoff_multiplier(&self) -> f64 {
        match self {
            FailureReason::RateLimit => 3.0,
            FailureReason::ServerError => 1.5,
            FailureReason::AuthenticationError => 2.0,
            FailureReason::NetworkError | FailureReason::Timeout | FailureReason::Unknown => 1.0,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the pipeline should do with a failed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retry,
    /// Retry, but the failure needs operator action (credentials) to clear.
    RetryNeedsAttention,
    /// The request is malformed. Resending the same batch cannot succeed.
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub reason: FailureReason,
    pub disposition: Disposition,
}

impl Classification {
    pub fn is_retryable(&self) -> bool {
        self.disposition != Disposition::Drop
    }
}

/// Classify a typed transport error.
pub fn classify(error: &TransportError) -> Classification {
    let (reason, disposition) = match error {
        TransportError::Network(_) => (FailureReason::NetworkError, Disposition::Retry),
        TransportError::Timeout(_) => (FailureReason::Timeout, Disposition::Retry),
        TransportError::RateLimited { .. } => (FailureReason::RateLimit, Disposition::Retry),
        TransportError::Server { .. } => (FailureReason::ServerError, Disposition::Retry),
        TransportError::Unauthorized { .. } => (
            FailureReason::AuthenticationError,
            Disposition::RetryNeedsAttention,
        ),
        TransportError::InvalidRequest { .. } | TransportError::Serialization(_) => {
            (FailureReason::Unknown, Disposition::Drop)
        }
        TransportError::Other(message) => return classify_message(message),
    };
    Classification {
        reason,
        disposition,
    }
}

/// Classify a free-form error message by keyword.
///
/// Buckets are checked in a fixed order and the first hit wins, so a message
/// mentioning both "connection" and "503" is a network error.
pub fn classify_message(message: &str) -> Classification {
    const BUCKETS: &[(FailureReason, &[&str])] = &[
        (
            FailureReason::NetworkError,
            &["network", "connection", "connect", "resolve"],
        ),
        (FailureReason::Timeout, &["timeout", "timed out"]),
        (
            FailureReason::RateLimit,
            &["rate limit", "too many requests", "429"],
        ),
        (
            FailureReason::ServerError,
            &["500", "502", "503", "504", "server error"],
        ),
        (
            FailureReason::AuthenticationError,
            &["auth", "unauthorized", "credentials", "401", "403", "forbidden"],
        ),
    ];
    const INVALID_REQUEST: &[&str] = &["400", "404", "413", "422", "bad request"];

    let message = message.to_lowercase();
    let matches = |keywords: &[&str]| keywords.iter().any(|k| message.contains(k));

    if let Some((reason, _)) = BUCKETS.iter().find(|(_, keywords)| matches(keywords)) {
        let disposition = if *reason == FailureReason::AuthenticationError {
            Disposition::RetryNeedsAttention
        } else {
            Disposition::Retry
        };
        return Classification {
            reason: *reason,
            disposition,
        };
    }

    let disposition = if matches(INVALID_REQUEST) {
        Disposition::Drop
    } else {
        Disposition::Retry
    };
    Classification {
        reason: FailureReason::Unknown,
        disposition,
    }
}
