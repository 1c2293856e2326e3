//! Error types for the threadwatch system
//!
//! This module defines all error types used throughout the crate, and the
//! transient/terminal split the engine uses to decide whether to retry.

use std::time::Duration;
use thiserror::Error;

/// Result type alias for threadwatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the threadwatch system
#[derive(Error, Debug)]
pub enum Error {
    /// Page fetch failed (transport error or non-2xx status)
    #[error("Fetch error: {0}")]
    Fetch(String),

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Local I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transport-level HTTP errors and 5xx responses
    #[error("HTTP error: {0}")]
    Http(String),

    /// A remote call did not finish within its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Rate limiting errors
    #[error("Rate limited: {message}")]
    RateLimited {
        /// Error message
        message: String,
        /// Server-provided wait hint
        retry_after: Option<Duration>,
    },

    /// The remote side refused the request permanently (4xx other than 429)
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Sink-specific error
    #[error("Sink error ({sink}): {message}")]
    Sink {
        /// Sink name
        sink: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a fetch error
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>, retry_after: Option<Duration>) -> Self {
        Self::RateLimited {
            message: msg.into(),
            retry_after,
        }
    }

    /// Create a permanent rejection error
    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a sink-specific error
    pub fn sink(sink: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sink {
            sink: sink.into(),
            message: message.into(),
        }
    }

    /// Whether the failure is transient and worth another attempt
    ///
    /// Transport errors, timeouts, 5xx-class responses and rate limiting are
    /// retriable. Rejections, malformed input and local configuration or
    /// serialization problems are not.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Error::Fetch(_)
                | Error::Io(_)
                | Error::Http(_)
                | Error::Timeout(_)
                | Error::RateLimited { .. }
        )
    }

    /// Server-provided delay before the next attempt, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_are_retriable() {
        assert!(Error::http("502 Bad Gateway").is_retriable());
        assert!(Error::timeout("send_text").is_retriable());
        assert!(Error::fetch("connection reset").is_retriable());
        assert!(Error::rate_limited("slow down", None).is_retriable());
    }

    #[test]
    fn terminal_errors_are_not_retriable() {
        assert!(!Error::rejected("wrong file identifier").is_retriable());
        assert!(!Error::invalid_input("empty text").is_retriable());
        assert!(!Error::config("missing token").is_retriable());
        assert!(!Error::sink("telegram", "bad chat id").is_retriable());
    }

    #[test]
    fn retry_after_only_on_rate_limit() {
        let err = Error::rate_limited("slow down", Some(Duration::from_secs(7)));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(Error::http("503").retry_after(), None);
    }
}
