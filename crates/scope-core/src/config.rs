//! Client configuration
//!
//! `ScopeConfig` names the scope service and the deployment it should attach
//! to. Only `seed` changes after construction (through `connect`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ScopeError};

/// Scope service used when nothing is configured
pub const DEFAULT_SCOPE: &str = "http://localhost:29017";

/// Deployment seed used when nothing is configured
pub const DEFAULT_SEED: &str = "mongodb://localhost:27017";

/// Environment variable overriding the scope URL
pub const SCOPE_URL_ENV: &str = "SCOPE_URL";

/// Environment variable overriding the seed
pub const SCOPE_SEED_ENV: &str = "SCOPE_SEED";

/// Identifies this client to the scope service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverInfo {
    pub name: String,
    pub version: String,
    pub lang: String,
}

impl Default for DriverInfo {
    fn default() -> Self {
        Self {
            name: "scope-client".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            lang: "rust".to_string(),
        }
    }
}

impl DriverInfo {
    /// Value sent as the `User-Agent` header
    pub fn user_agent(&self) -> String {
        format!("{}/{} ({})", self.name, self.version, self.lang)
    }
}

/// Scope service endpoint plus target deployment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeConfig {
    /// Base URL of the scope proxy service
    pub scope: String,
    /// Connection descriptor of the target deployment
    pub seed: String,
    #[serde(default)]
    pub driver: DriverInfo,
}

impl ScopeConfig {
    /// Validate and normalize a scope/seed pair.
    ///
    /// Fails fast on empty values. A public scope without an explicit port
    /// is pinned to port 80.
    pub fn new(scope: impl Into<String>, seed: impl Into<String>) -> Result<Self> {
        let scope = scope.into();
        let seed = seed.into();

        if scope.trim().is_empty() {
            return Err(ScopeError::MissingScope);
        }
        if seed.trim().is_empty() {
            return Err(ScopeError::MissingSeed);
        }

        Ok(Self {
            scope: normalize_scope(&scope)?,
            seed,
            driver: DriverInfo::default(),
        })
    }

    /// Build from `SCOPE_URL` / `SCOPE_SEED`, falling back to the local defaults
    pub fn from_env() -> Result<Self> {
        let scope = std::env::var(SCOPE_URL_ENV).unwrap_or_else(|_| DEFAULT_SCOPE.to_string());
        let seed = std::env::var(SCOPE_SEED_ENV).unwrap_or_else(|_| DEFAULT_SEED.to_string());
        Self::new(scope, seed)
    }

    pub fn with_driver(mut self, driver: DriverInfo) -> Self {
        self.driver = driver;
        self
    }

    /// `{scope}/api/v1{path}`
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/api/v1{}", self.scope, path)
    }

    /// WebSocket URL for the streaming transport (`http→ws`, `https→wss`)
    pub fn stream_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.scope).map_err(|e| ScopeError::InvalidScope {
            url: self.scope.clone(),
            reason: e.to_string(),
        })?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme).map_err(|_| ScopeError::InvalidScope {
            url: self.scope.clone(),
            reason: format!("cannot use scheme `{}` for streaming", scheme),
        })?;
        Ok(url)
    }
}

fn normalize_scope(raw: &str) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ScopeError::InvalidScope {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    let host = url.host_str().ok_or_else(|| ScopeError::InvalidScope {
        url: raw.to_string(),
        reason: "missing host".to_string(),
    })?;

    // Url drops default ports, so look at the authority in the raw string
    let authority = trimmed
        .split("://")
        .nth(1)
        .unwrap_or(trimmed)
        .split('/')
        .next()
        .unwrap_or_default();
    let has_port = authority.rsplit_once(':').is_some_and(|(_, p)| p.parse::<u16>().is_ok());

    if host != "localhost" && !has_port && url.scheme() == "http" {
        return Ok(format!("{}:80", trimmed));
    }
    Ok(trimmed.to_string())
}

/// Runtime tuning for the client and its token manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    /// Refresh this long before the session expires
    pub red_line: Duration,
    /// Sessions closer than this to expiry are rejected at acquisition
    pub min_session_ttl: Duration,
    /// Open the streaming transport once the session is ready
    pub open_stream: bool,
    /// Upper bound on the streaming handshake
    pub stream_connect_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            red_line: Duration::from_millis(15_000),
            min_session_ttl: Duration::from_secs(60),
            open_stream: true,
            stream_connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_red_line(mut self, red_line: Duration) -> Self {
        self.red_line = red_line;
        self
    }

    pub fn with_min_session_ttl(mut self, ttl: Duration) -> Self {
        self.min_session_ttl = ttl;
        self
    }

    pub fn with_open_stream(mut self, open: bool) -> Self {
        self.open_stream = open;
        self
    }

    pub fn with_stream_connect_timeout(mut self, timeout: Duration) -> Self {
        self.stream_connect_timeout = timeout;
        self
    }
}
