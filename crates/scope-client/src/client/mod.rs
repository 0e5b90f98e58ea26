//! Scope Client
//!
//! Single entry point to a scope service. Owns:
//! - configuration (scope, seed, driver info)
//! - the instance [`Context`]
//! - the readiness gate every operation passes through
//! - the token manager and the connection driver reacting to it
//! - the streaming transport for live subscriptions
//! - the [`EventBus`] carrying readable/change/error/close notifications
//!
//! ```text
//!   TokenManager ──TokenEvent──► driver ──► Context::set
//!                                  │    ──► gate open / fail
//!                                  │    ──► StreamingTransport::connect
//!                                  └────► EventBus (Readable | Reconnected | Error)
//! ```
//!
//! Operations issued before readiness queue on the gate in FIFO order and
//! re-enter once the driver releases it. If the token manager dies, every
//! queued and future operation fails with the stored error until `connect()`.

mod dispatch;
mod operations;

pub use dispatch::ResourceStream;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use reqwest::Method;
use scope_core::{
    ClientEvent, ClientOptions, Context, EventBus, EventReceiver, Result, ScopeConfig, ScopeError,
    Session,
};
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::gate::{GateHold, GateState, ReadinessGate};
use crate::logging::{RequestSpan, TraceContext};
use crate::router::{default_routes, ApiMethod, Router};
use crate::token::{TokenEvent, TokenManager, TokenState};
use crate::transport::StreamingTransport;

/// Status and decoded body of a successful request
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

/// Handle to a scope client. Cheap to clone; all clones share one session.
#[derive(Clone)]
pub struct ScopeClient {
    inner: Arc<ClientInner>,
}

pub(crate) struct ClientInner {
    config: RwLock<ScopeConfig>,
    options: ClientOptions,
    http: reqwest::Client,
    context: Context,
    bus: EventBus,
    gate: ReadinessGate,
    token: RwLock<Option<TokenManager>>,
    stream: RwLock<Option<Arc<StreamingTransport>>>,
    /// Serializes stream opens
    stream_lock: tokio::sync::Mutex<()>,
    /// Cancels the driver of the current session
    driver: Mutex<Option<CancellationToken>>,
    /// Serializes `connect` and `close`
    lifecycle: tokio::sync::Mutex<()>,
    closed: AtomicBool,
    router: Router<ApiMethod>,
}

impl ScopeClient {
    /// Create a client with default options and start acquiring a session.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: ScopeConfig) -> Result<Self> {
        Self::with_options(config, ClientOptions::default())
    }

    /// Client for `SCOPE_URL` / `SCOPE_SEED`
    pub fn from_env() -> Result<Self> {
        Self::new(ScopeConfig::from_env()?)
    }

    pub fn with_options(config: ScopeConfig, options: ClientOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(config.driver.user_agent())
            .build()?;
        let router = Router::compile(default_routes())?;

        let bus = EventBus::new();
        let context = Context::new(bus.sender());
        let (gate, hold) = ReadinessGate::held();

        info!(
            scope = %config.scope,
            seed = %config.seed,
            "[ScopeClient] Connecting"
        );

        let inner = Arc::new(ClientInner {
            config: RwLock::new(config),
            options,
            http,
            context,
            bus,
            gate,
            token: RwLock::new(None),
            stream: RwLock::new(None),
            stream_lock: tokio::sync::Mutex::new(()),
            driver: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            closed: AtomicBool::new(false),
            router,
        });
        inner.start_session(hold, false);

        Ok(Self { inner })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Wait until the session is ready. Fails with the stored fatal error if
    /// acquisition failed, or `Closed` after `close()`.
    pub async fn ready(&self) -> Result<()> {
        self.inner.gate.enter().await
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.gate.peek(), Some(GateState::Open))
    }

    /// Subscribe to client notifications emitted from now on
    pub fn events(&self) -> EventReceiver {
        self.inner.bus.subscribe()
    }

    /// Point the client at another deployment.
    ///
    /// No-op for the current seed. Otherwise the current session is closed,
    /// the context is marked as reused, and a new session is acquired; its
    /// readiness is announced as `Reconnected` rather than `Readable`.
    pub async fn connect(&self, seed: impl Into<String>) -> Result<()> {
        let seed = seed.into();
        if seed.trim().is_empty() {
            return Err(ScopeError::MissingSeed);
        }

        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(ScopeError::Closed);
        }
        if self.inner.config.read().seed == seed {
            debug!(seed = %seed, "[ScopeClient] Already connected to seed");
            return Ok(());
        }

        info!(seed = %seed, "[ScopeClient] Reconnecting");
        self.inner.stop_session().await;

        let mut hold = self.inner.gate.hold().await;
        hold.reset();
        self.inner.config.write().seed = seed;
        self.inner.context.mark_reused();
        self.inner.start_session(hold, true);
        Ok(())
    }

    /// Close the stream and the token manager, then emit `Close`. Idempotent.
    pub async fn close(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        info!("[ScopeClient] Closing");
        self.inner.stop_session().await;
        self.inner.gate.hold().await.close();
        self.inner.bus.sender().emit(ClientEvent::Close);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    pub fn config(&self) -> ScopeConfig {
        self.inner.config.read().clone()
    }

    pub fn seed(&self) -> String {
        self.inner.config.read().seed.clone()
    }

    pub fn options(&self) -> &ClientOptions {
        &self.inner.options
    }

    pub fn token_state(&self) -> Option<TokenState> {
        self.inner.token.read().as_ref().map(TokenManager::state)
    }

    pub fn session(&self) -> Option<Session> {
        self.inner.token.read().as_ref().and_then(TokenManager::session)
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.current_stream().is_some()
    }

    pub(crate) fn router(&self) -> &Router<ApiMethod> {
        &self.inner.router
    }

    // ========================================================================
    // Authorized request primitive
    // ========================================================================

    /// `GET` a resource path. See [`ScopeClient::request`] for path handling.
    pub async fn read(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        self.request(Method::GET, path, query, None)
            .await
            .map(|response| response.body)
    }

    /// `POST`/`PUT`/`DELETE` a resource path with an optional JSON body
    pub async fn crud(&self, method: Method, path: &str, body: Option<&Value>) -> Result<ApiResponse> {
        self.request(method, path, &[], body).await
    }

    /// Send an authorized request once the session is ready.
    ///
    /// Paths are relative to the current instance: `/` is the instance
    /// itself, `/x` is `/{instance_id}/x`, and `../x` is the meta route `/x`
    /// with no instance prefix. Statuses >= 400 become `ScopeError::Http`
    /// carrying the server's message.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> Result<ApiResponse> {
        self.inner.gate.enter().await?;

        let token = self
            .inner
            .token
            .read()
            .as_ref()
            .and_then(TokenManager::token)
            .ok_or(ScopeError::NoSession)?;
        let instance_id = self.inner.context.instance_id();
        let full_path = resolve_path(path, instance_id.as_deref())?;
        let url = self.inner.config.read().api_url(&full_path);

        let trace = TraceContext::new(method.as_str(), path).with_instance(instance_id);
        let span = RequestSpan::enter(&trace);

        async {
            RequestSpan::log_entry(&trace);

            let mut builder = self
                .inner
                .http
                .request(method.clone(), &url)
                .header(reqwest::header::ACCEPT, "application/json")
                .bearer_auth(&token);
            if !query.is_empty() {
                builder = builder.query(query);
            }
            if let Some(body) = body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let text = response.text().await?;
            RequestSpan::log_exit(&trace, status.as_u16());

            if status.as_u16() >= 400 {
                return Err(ScopeError::from_http_body(
                    status.as_u16(),
                    status.canonical_reason(),
                    &text,
                    method.as_str(),
                    &full_path,
                ));
            }

            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text)?
            };
            Ok(ApiResponse {
                status: status.as_u16(),
                body,
            })
        }
        .instrument(span)
        .await
    }
}

/// Map a client path onto the API path for `instance_id`
pub(crate) fn resolve_path(path: &str, instance_id: Option<&str>) -> Result<String> {
    if let Some(meta) = path.strip_prefix("../") {
        return Ok(format!("/{}", meta));
    }

    let instance_id = instance_id.ok_or(ScopeError::NoInstance)?;
    if path == "/" || path.is_empty() {
        Ok(format!("/{}", instance_id))
    } else if path.starts_with('/') {
        Ok(format!("/{}{}", instance_id, path))
    } else {
        Ok(format!("/{}/{}", instance_id, path))
    }
}

// ============================================================================
// Session driver
// ============================================================================

impl ClientInner {
    /// Spawn a token manager for the current seed and the driver that
    /// releases `hold` once it settles.
    fn start_session(self: &Arc<Self>, hold: GateHold, reconnect: bool) {
        let config = self.config.read().clone();
        let (manager, token_events) = TokenManager::spawn(config.clone(), self.http.clone(), &self.options);
        *self.token.write() = Some(manager);

        let cancel = CancellationToken::new();
        if let Some(previous) = self.driver.lock().replace(cancel.clone()) {
            previous.cancel();
        }

        tokio::spawn(drive_session(
            Arc::downgrade(self),
            token_events,
            hold,
            reconnect,
            cancel,
            config.seed,
        ));
    }

    /// Cancel the driver, close the stream and close the token manager
    async fn stop_session(&self) {
        if let Some(cancel) = self.driver.lock().take() {
            cancel.cancel();
        }

        {
            let _stream_lock = self.stream_lock.lock().await;
            if let Some(stream) = self.stream.write().take() {
                stream.close();
            }
        }

        let manager = self.token.write().take();
        if let Some(manager) = manager {
            manager.close().await;
        }
    }

    fn current_stream(&self) -> Option<Arc<StreamingTransport>> {
        self.stream.read().as_ref().filter(|s| s.is_connected()).cloned()
    }

    /// Connected streaming transport, opening one if needed
    pub(crate) async fn ensure_stream(&self) -> Result<Arc<StreamingTransport>> {
        if let Some(stream) = self.current_stream() {
            return Ok(stream);
        }

        let _stream_lock = self.stream_lock.lock().await;
        // close() flags the client before it takes the stream under this lock
        if self.closed.load(Ordering::SeqCst) {
            return Err(ScopeError::Closed);
        }
        if let Some(stream) = self.current_stream() {
            return Ok(stream);
        }

        let url = self.config.read().stream_url()?;
        let transport = Arc::new(StreamingTransport::connect(url, self.options.stream_connect_timeout).await?);
        if self.closed.load(Ordering::SeqCst) {
            transport.close();
            return Err(ScopeError::Closed);
        }
        *self.stream.write() = Some(Arc::clone(&transport));
        Ok(transport)
    }

    fn apply_session(&self, session: &Session) {
        self.context.set(session.context_fields());
    }
}

/// Dropping the last handle of an open client closes it: the stream is shut,
/// `Close` is emitted and, inside a tokio runtime, the token is revoked in the
/// background. Call `close()` to wait for the revoke.
impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(cancel) = self.driver.lock().take() {
            cancel.cancel();
        }
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(stream) = self.stream.get_mut().take() {
            stream.close();
        }
        if let Some(manager) = self.token.get_mut().take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move { manager.close().await });
                }
                Err(_) => warn!("[ScopeClient] Dropped outside a runtime, token not revoked"),
            }
        }
        debug!("[ScopeClient] Dropped without close");
        self.bus.sender().emit(ClientEvent::Close);
    }
}

async fn drive_session(
    inner: Weak<ClientInner>,
    mut token_events: broadcast::Receiver<TokenEvent>,
    hold: GateHold,
    reconnect: bool,
    cancel: CancellationToken,
    seed: String,
) {
    let mut hold = Some(hold);

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = token_events.recv() => event,
        };
        let Some(inner) = inner.upgrade() else { break };

        match event {
            Ok(TokenEvent::Ready(session)) => {
                inner.apply_session(&session);

                if let Some(hold) = hold.take() {
                    hold.open();
                }
                info!(
                    seed = %seed,
                    instance_id = ?inner.context.instance_id(),
                    "[ScopeClient] Readable"
                );
                if reconnect {
                    inner.bus.sender().emit(ClientEvent::Reconnected { seed: seed.clone() });
                } else {
                    inner.bus.sender().emit(ClientEvent::Readable);
                }

                if inner.options.open_stream {
                    let opener = Arc::clone(&inner);
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = cancel.cancelled() => {}
                            opened = opener.ensure_stream() => {
                                if let Err(e) = opened {
                                    warn!(error = %e, "[ScopeClient] Streaming transport unavailable");
                                }
                            }
                        }
                    });
                }
            }
            Ok(TokenEvent::Refreshed(session)) => {
                debug!("[ScopeClient] Session refreshed");
                inner.apply_session(&session);
            }
            Ok(TokenEvent::Error(err)) => {
                error!(error = %err, "[ScopeClient] Session failed, client is dead");
                let hold = match hold.take() {
                    Some(hold) => hold,
                    None => inner.gate.hold().await,
                };
                hold.fail(err.clone());
                inner.bus.sender().emit(ClientEvent::Error(err));
                break;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "[ScopeClient] Token events lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }

    debug!(seed = %seed, "[ScopeClient] Session driver stopped");
}
