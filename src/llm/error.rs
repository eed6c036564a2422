//! Reasoning service error types with retry classification.
//!
//! Distinguishes between transient errors (retry) and permanent errors (surface immediately).

use std::time::Duration;

/// Error from reasoning service calls.
#[derive(Debug, Clone)]
pub struct ReasoningError {
    pub kind: ReasoningErrorKind,
    /// HTTP status code, if applicable
    pub status_code: Option<u16>,
    pub message: String,
    /// Suggested retry delay (from Retry-After header)
    pub retry_after: Option<Duration>,
}

impl ReasoningError {
    fn new(kind: ReasoningErrorKind, status_code: Option<u16>, message: String) -> Self {
        Self {
            kind,
            status_code,
            message,
            retry_after: None,
        }
    }

    pub fn rate_limited(message: String, retry_after: Option<Duration>) -> Self {
        Self {
            retry_after,
            ..Self::new(ReasoningErrorKind::RateLimited, Some(429), message)
        }
    }

    pub fn server_error(status_code: u16, message: String) -> Self {
        Self::new(ReasoningErrorKind::ServerError, Some(status_code), message)
    }

    pub fn client_error(status_code: u16, message: String) -> Self {
        Self::new(ReasoningErrorKind::ClientError, Some(status_code), message)
    }

    pub fn network_error(message: String) -> Self {
        Self::new(ReasoningErrorKind::NetworkError, None, message)
    }

    pub fn parse_error(message: String) -> Self {
        Self::new(ReasoningErrorKind::ParseError, None, message)
    }

    /// The gateway answered but produced nothing usable (no choices, empty content).
    pub fn empty_response(message: String) -> Self {
        Self::new(ReasoningErrorKind::EmptyResponse, None, message)
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Delay before the next attempt: `retry_after` when the gateway sent one,
    /// otherwise exponential backoff from a per-kind base, capped at 30 seconds.
    pub fn suggested_delay(&self, attempt: u32) -> Duration {
        if let Some(retry_after) = self.retry_after {
            return retry_after;
        }

        let base_secs: u64 = match self.kind {
            ReasoningErrorKind::RateLimited => 4,
            ReasoningErrorKind::ServerError => 2,
            _ => 1,
        };

        let delay_secs = base_secs.saturating_mul(2u64.saturating_pow(attempt));
        Duration::from_secs(delay_secs.min(30))
    }
}

impl std::fmt::Display for ReasoningError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for ReasoningError {}

/// Classification of reasoning service errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReasoningErrorKind {
    /// Rate limited (429)
    RateLimited,
    /// Server error (5xx)
    ServerError,
    /// Client error (4xx other than 429)
    ClientError,
    /// Connection failed or timed out
    NetworkError,
    /// Response body was not the expected shape
    ParseError,
    /// No choices or empty content
    EmptyResponse,
}

impl ReasoningErrorKind {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReasoningErrorKind::RateLimited
                | ReasoningErrorKind::ServerError
                | ReasoningErrorKind::NetworkError
        )
    }
}

impl std::fmt::Display for ReasoningErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReasoningErrorKind::RateLimited => write!(f, "Rate limited"),
            ReasoningErrorKind::ServerError => write!(f, "Server error"),
            ReasoningErrorKind::ClientError => write!(f, "Client error"),
            ReasoningErrorKind::NetworkError => write!(f, "Network error"),
            ReasoningErrorKind::ParseError => write!(f, "Parse error"),
            ReasoningErrorKind::EmptyResponse => write!(f, "Empty response"),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Maximum total time to spend on one logical call, retries included
    pub max_retry_duration: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            max_retry_duration: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            max_retry_duration: Duration::ZERO,
        }
    }

    pub fn should_retry(&self, error: &ReasoningError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_retries
    }
}

/// Map an HTTP status code to an error kind.
pub fn classify_http_status(status: u16) -> ReasoningErrorKind {
    match status {
        429 => ReasoningErrorKind::RateLimited,
        400..=499 => ReasoningErrorKind::ClientError,
        _ => ReasoningErrorKind::ServerError,
    }
}
