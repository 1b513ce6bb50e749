//! Error types for proxy-scout
//!
//! Every fallible operation in the crate returns [`Result`], wrapping the
//! closed [`Error`] enum. Callers that need to branch on the failure class
//! use [`Error::kind`]; callers that need machine-readable context use
//! [`Error::details`].

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Discriminator for the closed set of failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Network,
    Timeout,
    Http,
    RateLimit,
    Authentication,
    NotFound,
    Parse,
    Validation,
    InvalidArgument,
}

impl ErrorKind {
    /// Stable string form, used in summaries and structured logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Http => "http",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Authentication => "authentication",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::InvalidArgument => "invalid_argument",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for proxy-scout operations
#[derive(Error, Debug)]
pub enum Error {
    /// Connection-level failure (DNS, refused, reset)
    #[error("network error: {message}")]
    Network {
        message: String,
        url: Option<String>,
    },

    /// Operation exceeded its deadline
    #[error("timeout after {timeout_ms}ms")]
    Timeout {
        url: Option<String>,
        timeout_ms: u64,
    },

    /// Non-success HTTP status that is neither auth, not-found nor rate-limit
    #[error("HTTP {status} from {url}")]
    Http { status: u16, url: String },

    /// Remote quota exhausted
    #[error("rate limit exceeded")]
    RateLimit {
        limit: Option<u64>,
        remaining: Option<u64>,
        reset_at: Option<DateTime<Utc>>,
        /// Server-provided Retry-After hint in seconds, if any
        retry_after: Option<u64>,
    },

    /// Rejected credential. Deliberately carries no token material.
    #[error("authentication rejected by remote")]
    Authentication,

    /// Requested remote resource does not exist
    #[error("not found: {resource}")]
    NotFound { resource: String },

    /// Malformed payload content
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Malformed descriptor or URL
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Caller misuse (e.g. zero concurrency limit)
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Network { .. } => ErrorKind::Network,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Http { .. } => ErrorKind::Http,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Authentication => ErrorKind::Authentication,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
        }
    }

    /// Whether a retry with backoff may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Network { .. } | Error::Timeout { .. } | Error::RateLimit { .. } => true,
            Error::Http { status, .. } => *status >= 500,
            Error::Authentication
            | Error::NotFound { .. }
            | Error::Parse { .. }
            | Error::Validation { .. }
            | Error::InvalidArgument { .. } => false,
        }
    }

    /// Structured context for logging and summaries
    pub fn details(&self) -> serde_json::Value {
        match self {
            Error::Network { url, .. } => serde_json::json!({ "url": url }),
            Error::Timeout { url, timeout_ms } => {
                serde_json::json!({ "url": url, "timeout_ms": timeout_ms })
            }
            Error::Http { status, url } => serde_json::json!({ "status": status, "url": url }),
            Error::RateLimit {
                limit,
                remaining,
                reset_at,
                retry_after,
            } => serde_json::json!({
                "limit": limit,
                "remaining": remaining,
                "reset_at": reset_at.map(|t| t.to_rfc3339()),
                "retry_after": retry_after,
            }),
            Error::Authentication => serde_json::json!({}),
            Error::NotFound { resource } => serde_json::json!({ "resource": resource }),
            Error::Parse { message } => serde_json::json!({ "message": message }),
            Error::Validation { message } => serde_json::json!({ "message": message }),
            Error::InvalidArgument { message } => serde_json::json!({ "message": message }),
        }
    }

    /// Create a network error with a source URL
    pub fn network(message: impl Into<String>, url: impl Into<String>) -> Self {
        Error::Network {
            message: message.into(),
            url: Some(url.into()),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation {
            message: message.into(),
        }
    }

    /// Create an invalid-argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument {
            message: message.into(),
        }
    }

    /// Build a rate-limit error from response headers
    ///
    /// Understands both the standard `Retry-After` hint and the
    /// `X-RateLimit-*` family used by the GitHub API. Malformed header
    /// values are ignored rather than failing the classification.
    pub fn rate_limit_from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
            headers.get(name)?.to_str().ok()?.trim().parse().ok()
        }

        let reset_at = header_u64(headers, "x-ratelimit-reset")
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0));

        Error::RateLimit {
            limit: header_u64(headers, "x-ratelimit-limit"),
            remaining: header_u64(headers, "x-ratelimit-remaining"),
            reset_at,
            retry_after: header_u64(headers, "retry-after"),
        }
    }

    /// Map a transport-level reqwest failure onto the taxonomy
    pub fn from_reqwest(url: &str, err: reqwest::Error, timeout: std::time::Duration) -> Self {
        if err.is_timeout() {
            Error::Timeout {
                url: Some(url.to_string()),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            Error::Network {
                message: err.to_string(),
                url: Some(url.to_string()),
            }
        }
    }
}
