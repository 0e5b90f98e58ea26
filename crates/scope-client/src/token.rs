//! Token Manager - bearer session lifecycle
//!
//! Obtains and keeps a valid session for one `(scope, seed)` pair without
//! caller involvement:
//! - acquisition starts as soon as the manager is spawned
//! - a one-shot timer refreshes the session `red_line` before it expires
//! - refresh failure is reported once and never retried
//! - `close()` cancels the timer and revokes the token server-side
//!
//! State machine:
//!
//! ```text
//!   Acquiring ──ok──► Readable ──timer──► Refreshing ──ok──► Readable
//!       │                                     │
//!       └────────────err──────► Dead ◄───err──┘
//!   (any) ──close()──► Closed
//! ```
//!
//! Requests that captured the token just before a rotation may still use the
//! old one; the red line leaves the server a grace window for them.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use scope_core::session::refresh_delay;
use scope_core::{ClientOptions, Result, ScopeConfig, ScopeError, Session};
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Capacity of the token event channel
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Acquiring,
    Readable,
    Refreshing,
    Closed,
    Dead,
}

impl TokenState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Dead)
    }
}

/// Notifications from the token manager to its owner
#[derive(Debug, Clone)]
pub enum TokenEvent {
    /// First session acquired
    Ready(Session),
    /// Session replaced by a scheduled refresh
    Refreshed(Session),
    /// Acquisition or refresh failed, the manager is dead
    Error(ScopeError),
}

/// Handle to a running token manager. Cheap to clone.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    config: ScopeConfig,
    http: reqwest::Client,
    red_line: Duration,
    min_ttl: Duration,
    session: RwLock<Option<Session>>,
    state: RwLock<TokenState>,
    events: broadcast::Sender<TokenEvent>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TokenInner {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
    }
}

impl TokenManager {
    /// Start a manager and begin acquisition in the background.
    ///
    /// The receiver is created before acquisition starts, so the owner never
    /// misses the first `Ready`/`Error`.
    pub fn spawn(
        config: ScopeConfig,
        http: reqwest::Client,
        options: &ClientOptions,
    ) -> (Self, broadcast::Receiver<TokenEvent>) {
        let (events, rx) = broadcast::channel(EVENT_CAPACITY);
        let manager = Self {
            inner: Arc::new(TokenInner {
                config,
                http,
                red_line: options.red_line,
                min_ttl: options.min_session_ttl,
                session: RwLock::new(None),
                state: RwLock::new(TokenState::Acquiring),
                events,
                timer: Mutex::new(None),
            }),
        };

        let acquiring = manager.clone();
        tokio::spawn(async move {
            acquiring.acquire().await;
        });

        (manager, rx)
    }

    /// Subscribe to later token events
    pub fn subscribe(&self) -> broadcast::Receiver<TokenEvent> {
        self.inner.events.subscribe()
    }

    pub fn state(&self) -> TokenState {
        *self.inner.state.read()
    }

    /// Current bearer token, if a session is held
    pub fn token(&self) -> Option<String> {
        self.inner.session.read().as_ref().map(|s| s.token.clone())
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.session.read().clone()
    }

    pub fn seed(&self) -> &str {
        &self.inner.config.seed
    }

    /// Initial acquisition
    async fn acquire(&self) {
        debug!(seed = %self.inner.config.seed, "[TokenManager] Acquiring session");
        let result = self.bake().await;
        self.settle(result, TokenState::Acquiring);
    }

    /// Re-run acquisition and replace the session.
    ///
    /// Failure emits `TokenEvent::Error` and leaves the manager dead; nothing
    /// is retried.
    pub async fn refresh(&self) {
        {
            let mut state = self.inner.state.write();
            if state.is_terminal() {
                debug!(state = ?*state, "[TokenManager] Skipping refresh");
                return;
            }
            *state = TokenState::Refreshing;
        }

        debug!("[TokenManager] Refreshing session");
        let result = self.bake().await;
        self.settle(result, TokenState::Refreshing);
    }

    /// Apply the outcome of a bake. A manager closed while the request was in
    /// flight stays closed.
    fn settle(&self, result: Result<Session>, from: TokenState) {
        let mut state = self.inner.state.write();
        if *state == TokenState::Closed {
            debug!("[TokenManager] Closed while baking, dropping result");
            return;
        }

        match result {
            Ok(session) => {
                info!(
                    token = %session.redacted_token(),
                    expires_at = %session.expires_at,
                    "[TokenManager] Session {}",
                    if from == TokenState::Acquiring { "acquired" } else { "refreshed" }
                );
                *self.inner.session.write() = Some(session.clone());
                *state = TokenState::Readable;
                drop(state);

                self.schedule();
                let event = if from == TokenState::Acquiring {
                    TokenEvent::Ready(session)
                } else {
                    TokenEvent::Refreshed(session)
                };
                let _ = self.inner.events.send(event);
            }
            Err(err) => {
                error!(error = %err, "[TokenManager] Session bake failed");
                *state = TokenState::Dead;
                drop(state);

                let _ = self.inner.events.send(TokenEvent::Error(err));
            }
        }
    }

    /// Arm the refresh timer for the current session.
    ///
    /// A red line already behind us fires immediately.
    pub fn schedule(&self) {
        let Some(expires_at) = self.inner.session.read().as_ref().map(|s| s.expires_at) else {
            return;
        };
        let delay = refresh_delay(expires_at, Utc::now(), self.inner.red_line);
        debug!(
            delay_ms = delay.as_millis() as u64,
            "[TokenManager] Token red line in {:.1} minutes",
            delay.as_secs_f64() / 60.0
        );

        let weak: Weak<TokenInner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                TokenManager { inner }.refresh().await;
            }
        });

        let previous = self.inner.timer.lock().replace(timer);
        if let Some(previous) = previous {
            // The running refresh reschedules from inside its own timer task
            if tokio::task::try_id() != Some(previous.id()) {
                previous.abort();
            }
        }
    }

    /// Cancel the timer and revoke the token. Revoke failures are logged only.
    pub async fn close(&self) {
        {
            let mut state = self.inner.state.write();
            if *state == TokenState::Closed {
                return;
            }
            *state = TokenState::Closed;
        }

        if let Some(timer) = self.inner.timer.lock().take() {
            timer.abort();
        }

        let Some(token) = self.token() else {
            debug!("[TokenManager] Closed without a session");
            return;
        };

        let url = self.inner.config.api_url("/token");
        match self.inner.http.delete(&url).bearer_auth(&token).send().await {
            Ok(response) if response.status().is_success() => {
                info!("[TokenManager] Token revoked");
            }
            Ok(response) => {
                warn!(status = %response.status(), "[TokenManager] Token revoke rejected");
            }
            Err(e) => {
                warn!(error = %e, "[TokenManager] Token revoke failed");
            }
        }
    }

    /// `POST {scope}/api/v1/token` and validate the session
    async fn bake(&self) -> Result<Session> {
        let url = self.inner.config.api_url("/token");
        let response = self
            .inner
            .http
            .post(&url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&json!({ "seed": self.inner.config.seed }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(ScopeError::from_http_body(
                status.as_u16(),
                status.canonical_reason(),
                &text,
                "POST",
                "/api/v1/token",
            ));
        }

        let body: Value = serde_json::from_str(&text)
            .map_err(|e| ScopeError::MalformedSession(format!("invalid JSON: {}", e)))?;
        Session::from_response(body, Utc::now(), self.inner.min_ttl)
    }
}
