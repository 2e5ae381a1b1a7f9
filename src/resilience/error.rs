use serde::Serialize;
use thiserror::Error;

/// Closed taxonomy of infrastructure failures, produced by adapters at the
/// network boundary. Retry and breaker decisions pattern-match on
/// [`ErrorKind`] instead of inspecting error messages.
#[derive(Debug, Clone, Error)]
pub enum TransientError {
    #[error("operation timed out: {0}")]
    Timeout(String),
    #[error("connection refused: {0}")]
    ConnectionRefused(String),
    #[error("rate limited by dependency: {0}")]
    RateLimited(String),
    #[error("dependency server fault: {0}")]
    ServerFault(String),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ConnectionRefused,
    RateLimited,
    ServerFault,
    Other,
}

impl TransientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransientError::Timeout(_) => ErrorKind::Timeout,
            TransientError::ConnectionRefused(_) => ErrorKind::ConnectionRefused,
            TransientError::RateLimited(_) => ErrorKind::RateLimited,
            TransientError::ServerFault(_) => ErrorKind::ServerFault,
            TransientError::Other(_) => ErrorKind::Other,
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

impl ErrorKind {
    /// Kinds retried when a policy does not name its own set.
    pub const RETRYABLE_DEFAULT: [ErrorKind; 4] = [
        ErrorKind::Timeout,
        ErrorKind::ConnectionRefused,
        ErrorKind::RateLimited,
        ErrorKind::ServerFault,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ServerFault => "server_fault",
            ErrorKind::Other => "other",
        }
    }
}
