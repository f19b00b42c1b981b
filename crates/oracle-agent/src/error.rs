//! Agent error types.
//!
//! Two layers of errors live here:
//!
//! - [`ProviderError`] is what a single model backend can fail with.  It is
//!   never propagated past the orchestrator; it is captured into a
//!   [`crate::tools::ToolResult`] instead.
//! - [`AgentError`] is what the orchestration agent itself can fail with
//!   (synthesis, configuration, serialization).

use std::fmt;

// ---------------------------------------------------------------------------
// Provider errors
// ---------------------------------------------------------------------------

/// Classification of a failed provider call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The credential is missing or was rejected by the provider.
    AuthFailure,
    /// The provider throttled the request.
    RateLimited,
    /// The call did not complete within its deadline.
    Timeout,
    /// The provider returned an error status or the transport failed.
    Upstream,
    /// The provider answered with something we could not parse.
    Malformed,
}

impl ErrorKind {
    /// Whether a failed call of this kind may succeed if attempted again.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Upstream)
    }

    /// Short machine-readable label, used in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AuthFailure => "auth_failure",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::Upstream => "upstream",
            Self::Malformed => "malformed",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::AuthFailure => "authentication failure",
            Self::RateLimited => "rate limited",
            Self::Timeout => "timed out",
            Self::Upstream => "upstream error",
            Self::Malformed => "malformed response",
        };
        f.write_str(s)
    }
}

/// A failed call to a single model provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    /// What went wrong, coarsely.
    pub kind: ErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthFailure, message)
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Upstream, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Malformed, message)
    }

    /// Classify a non-success HTTP status returned by a provider.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let message = format!("API returned {status}: {}", truncate(body, 512));
        match status.as_u16() {
            401 | 403 => Self::auth(message),
            429 => Self::rate_limited(message),
            408 | 504 => Self::timeout(message),
            _ => Self::upstream(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout(err.to_string())
        } else if err.is_decode() {
            Self::malformed(err.to_string())
        } else {
            Self::upstream(err.to_string())
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

// ---------------------------------------------------------------------------
// Agent errors
// ---------------------------------------------------------------------------

/// Unified error type for the orchestration agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    /// The synthesis call failed before or while streaming its answer.
    #[error("synthesis failed: {reason}")]
    SynthesisFailed { reason: String },

    /// Two tools were registered under the same name.
    #[error("duplicate tool name: {name}")]
    DuplicateTool { name: String },

    /// Configuration validation or loading failed.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// A provider failure that escaped outside of a tool result.
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for unexpected internal errors.  Prefer a typed variant
    /// whenever possible.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
