//! Error taxonomy for the scope client
//!
//! Four families, matching how callers are expected to react:
//! - Configuration errors: bad input, fail synchronously
//! - Session errors: fatal to the token manager and to the client until `connect()`
//! - Transport/HTTP errors: network failures pass through, non-2xx is normalized
//! - Usage errors: caller bugs (no route, not streamable), never retried
//!
//! `ScopeError` is `Clone` because the fatal session error is stored once and
//! handed to every deferred and future operation.

use std::sync::Arc;

use serde_json::Value;

/// Result alias used across the workspace
pub type Result<T, E = ScopeError> = std::result::Result<T, E>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ScopeError {
    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------
    #[error("Missing `scope`: where is the scope service running?")]
    MissingScope,

    #[error("Missing `seed`: which deployment should the scope service attach to?")]
    MissingSeed,

    #[error("Invalid scope URL `{url}`: {reason}")]
    InvalidScope { url: String, reason: String },

    #[error("Invalid namespace `{0}`: expected `database.collection`")]
    InvalidNamespace(String),

    #[error("pipeline must be an array")]
    InvalidPipeline,

    #[error("Unknown analytics group `{0}`")]
    UnknownAnalyticsGroup(String),

    #[error("scope is readonly, `{0}` sync is not available")]
    ReadOnlyAdapter(String),

    #[error("A resource url must be specified")]
    MissingResourceUrl,

    #[error("Client context has no instance")]
    NoInstance,

    #[error("Invalid route pattern `{pattern}`: {reason}")]
    InvalidRoute { pattern: String, reason: String },

    // ------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------
    #[error("Malformed session response: {0}")]
    MalformedSession(String),

    #[error("Session expires in {remaining_secs}s, less than the required {min_secs}s")]
    ExpiryTooSoon { remaining_secs: i64, min_secs: i64 },

    #[error("No active session")]
    NoSession,

    // ------------------------------------------------------------------
    // Transport / HTTP
    // ------------------------------------------------------------------
    #[error("Transport error: {0}")]
    Transport(Arc<reqwest::Error>),

    #[error("{message} (status {status} on {method} {path})")]
    Http {
        status: u16,
        message: String,
        code: Option<Value>,
        method: String,
        path: String,
    },

    #[error("Failed to decode response: {0}")]
    Decode(String),

    #[error("Streaming transport error: {0}")]
    Stream(Arc<tokio_tungstenite::tungstenite::Error>),

    #[error("Streaming transport is not connected")]
    StreamUnavailable,

    #[error("Stream `{channel}` failed: {message}")]
    StreamMessage { channel: String, message: String },

    // ------------------------------------------------------------------
    // Protocol usage
    // ------------------------------------------------------------------
    #[error("No route found for: {0}")]
    NoRoute(String),

    #[error("`{0}` is not streamable")]
    NotStreamable(String),

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------
    #[error("Client is closed")]
    Closed,
}

impl ScopeError {
    /// Session failures that kill the token manager
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MalformedSession(_) | Self::ExpiryTooSoon { .. }
        )
    }

    /// Caller bugs rather than environmental failures
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::NoRoute(_)
                | Self::NotStreamable(_)
                | Self::InvalidNamespace(_)
                | Self::InvalidPipeline
                | Self::UnknownAnalyticsGroup(_)
                | Self::ReadOnlyAdapter(_)
                | Self::MissingResourceUrl
        )
    }

    /// HTTP status for normalized server errors
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Build a normalized HTTP error from a non-2xx response body.
    ///
    /// The server sends `{message, code?}`; anything else falls back to the
    /// raw body text, then to the canonical reason phrase.
    pub fn from_http_body(status: u16, reason: Option<&str>, body: &str, method: &str, path: &str) -> Self {
        let parsed = serde_json::from_str::<Value>(body).ok();
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                let trimmed = body.trim();
                (!trimmed.is_empty() && parsed.is_none()).then(|| trimmed.to_string())
            })
            .unwrap_or_else(|| reason.unwrap_or("Request failed").to_string());
        let code = parsed.as_ref().and_then(|v| v.get("code")).cloned();

        Self::Http {
            status,
            message,
            code,
            method: method.to_string(),
            path: path.to_string(),
        }
    }
}

impl From<reqwest::Error> for ScopeError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(Arc::new(err))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ScopeError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Stream(Arc::new(err))
    }
}

impl From<serde_json::Error> for ScopeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
