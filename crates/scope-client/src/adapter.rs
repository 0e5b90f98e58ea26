//! Model adapter capabilities
//!
//! Lets UI-binding layers fetch and live-bind resources by URL without
//! knowing the typed client API. A resource supplies a `url` (literal or
//! computed) and optionally an `all` flag and an endpoint override; the
//! [`Adapter`] picks the client and performs the read.
//!
//! Capabilities are small traits composed by delegation:
//! - [`Syncable`]: read-only fetch, optionally draining every page
//! - [`Subscribable`]: a [`LiveBinding`] that follows client reconnects

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::{Stream, StreamExt as _};
use scope_core::{ClientEvent, Namespace, Result, ScopeConfig, ScopeError};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::client::ScopeClient;
use crate::registry::ClientRegistry;

/// Page size used when draining a resource
pub const DRAIN_PAGE_SIZE: u32 = 200;

/// Where a resource lives, relative to the client's instance
#[derive(Clone)]
pub enum ResourceUrl {
    Literal(String),
    Computed(Arc<dyn Fn() -> String + Send + Sync>),
}

impl ResourceUrl {
    pub fn computed(f: impl Fn() -> String + Send + Sync + 'static) -> Self {
        Self::Computed(Arc::new(f))
    }

    pub fn resolve(&self) -> String {
        match self {
            Self::Literal(url) => url.clone(),
            Self::Computed(f) => f(),
        }
    }
}

impl From<&str> for ResourceUrl {
    fn from(url: &str) -> Self {
        Self::Literal(url.to_string())
    }
}

impl From<String> for ResourceUrl {
    fn from(url: String) -> Self {
        Self::Literal(url)
    }
}

impl fmt::Debug for ResourceUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(url) => f.debug_tuple("Literal").field(url).finish(),
            Self::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// A model or collection backed by a scope resource
pub trait Resource: Send + Sync {
    fn url(&self) -> Option<ResourceUrl>;

    /// Drain every page on read instead of fetching one
    fn all(&self) -> bool {
        false
    }

    /// Endpoint override: `host:port/db.collection` (optionally with a
    /// `mongodb://` prefix) targets another deployment and collection;
    /// an `http(s)://` URL targets another scope service.
    fn endpoint(&self) -> Option<String> {
        None
    }
}

/// Parsed form of [`Resource::endpoint`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Deployment {
        seed: String,
        namespace: Option<Namespace>,
    },
    Scope(String),
}

impl Endpoint {
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(Self::Scope(raw.to_string()));
        }

        let rest = raw.strip_prefix("mongodb://").unwrap_or(raw);
        let (host, ns) = match rest.split_once('/') {
            Some((host, ns)) => (host, Some(ns)),
            None => (rest, None),
        };
        if host.is_empty() {
            return Err(ScopeError::MissingSeed);
        }

        let namespace = match ns.filter(|ns| !ns.is_empty()) {
            Some(ns) => Some(ns.parse()?),
            None => None,
        };
        Ok(Self::Deployment {
            seed: format!("mongodb://{}", host),
            namespace,
        })
    }

    /// Resource URL implied by the endpoint, if it names a collection
    pub fn find_url(&self) -> Option<String> {
        match self {
            Self::Deployment {
                namespace: Some(ns), ..
            } => Some(format!("{}/find", ns.path())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMethod {
    Read,
    Create,
    Update,
    Patch,
    Delete,
}

impl SyncMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Create => "create",
            Self::Update => "update",
            Self::Patch => "patch",
            Self::Delete => "delete",
        }
    }
}

/// Per-call overrides for a sync
#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Overrides [`Resource::all`]
    pub all: Option<bool>,
    pub skip: Option<u64>,
    pub limit: Option<u32>,
    /// Overrides the resource URL
    pub url: Option<String>,
}

/// Picks the client for a resource and performs reads against it
#[derive(Clone)]
pub struct Adapter {
    default: ScopeClient,
    registry: ClientRegistry,
}

impl Adapter {
    pub fn new(default: ScopeClient, registry: ClientRegistry) -> Self {
        Self { default, registry }
    }

    pub fn default_client(&self) -> &ScopeClient {
        &self.default
    }

    /// Client and URL a resource should be read through
    pub fn target<R: Resource + ?Sized>(&self, resource: &R, url_override: Option<&str>) -> Result<(ScopeClient, String)> {
        let endpoint = resource.endpoint().map(|raw| Endpoint::parse(&raw)).transpose()?;
        let url = url_override
            .map(str::to_string)
            .or_else(|| resource.url().map(|u| u.resolve()))
            .or_else(|| endpoint.as_ref().and_then(Endpoint::find_url))
            .filter(|u| !u.is_empty())
            .ok_or(ScopeError::MissingResourceUrl)?;

        let client = match endpoint {
            None => self.default.clone(),
            Some(Endpoint::Deployment { seed, .. }) => {
                let scope = self.default.config().scope;
                self.registry.get_or_connect(ScopeConfig::new(scope, seed)?)?
            }
            Some(Endpoint::Scope(scope)) => {
                let seed = self.default.seed();
                self.registry.get_or_connect(ScopeConfig::new(scope, seed)?)?
            }
        };
        Ok((client, url))
    }

    /// Read-only sync. Non-read methods fail with `ReadOnlyAdapter`.
    pub async fn sync<R: Resource + ?Sized>(
        &self,
        resource: &R,
        method: SyncMethod,
        options: SyncOptions,
    ) -> Result<Value> {
        if method != SyncMethod::Read {
            return Err(ScopeError::ReadOnlyAdapter(method.as_str().to_string()));
        }
        let (client, url) = self.target(resource, options.url.as_deref())?;

        if !options.all.unwrap_or_else(|| resource.all()) {
            let mut query = Vec::new();
            if let Some(skip) = options.skip {
                query.push(("skip".to_string(), skip.to_string()));
            }
            if let Some(limit) = options.limit {
                query.push(("limit".to_string(), limit.to_string()));
            }
            return client.read(&url, &query).await;
        }

        let limit = options.limit.filter(|l| *l > 0).unwrap_or(DRAIN_PAGE_SIZE);
        drain(&client, &url, options.skip.unwrap_or(0), limit)
            .await
            .map(Value::Array)
    }

    /// Bind a resource to its live feed
    pub async fn subscribe<R: Resource + ?Sized>(&self, resource: &R) -> Result<LiveBinding> {
        let (client, url) = self.target(resource, None)?;
        LiveBinding::start(client, url).await
    }
}

/// Read pages of `limit` until one comes back short
async fn drain(client: &ScopeClient, url: &str, mut skip: u64, limit: u32) -> Result<Vec<Value>> {
    let mut buffer = Vec::new();
    loop {
        let query = [
            ("skip".to_string(), skip.to_string()),
            ("limit".to_string(), limit.to_string()),
        ];
        let page = match client.read(url, &query).await? {
            Value::Array(items) => items,
            other => {
                return Err(ScopeError::Decode(format!(
                    "expected a page of documents from {}, got {}",
                    url, other
                )))
            }
        };

        let returned = page.len();
        buffer.extend(page);
        debug!(url, skip, returned, "[Adapter] Drained page");
        if returned == 0 || returned != limit as usize {
            return Ok(buffer);
        }
        skip += limit as u64;
    }
}

/// Read-only fetch capability
#[async_trait]
pub trait Syncable: Resource {
    async fn sync(&self, adapter: &Adapter, method: SyncMethod, options: SyncOptions) -> Result<Value> {
        adapter.sync(self, method, options).await
    }

    async fn fetch(&self, adapter: &Adapter) -> Result<Value> {
        adapter.sync(self, SyncMethod::Read, SyncOptions::default()).await
    }
}

/// Live binding capability
#[async_trait]
pub trait Subscribable: Resource {
    async fn subscribe_live(&self, adapter: &Adapter) -> Result<LiveBinding> {
        adapter.subscribe(self).await
    }
}

/// A live feed that survives client reconnects.
///
/// Whenever the client announces a change (context change or reconnect)
/// the binding drops its subscription and subscribes again against the
/// new instance. Dropping the binding stops it.
pub struct LiveBinding {
    url: String,
    updates: mpsc::UnboundedReceiver<Result<Value>>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl LiveBinding {
    pub async fn start(client: ScopeClient, url: String) -> Result<Self> {
        // Subscribe before returning so setup errors reach the caller
        let mut events = client.events();
        let first = client.subscribe(&url, json!({})).await?;

        let (tx, updates) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let task_url = url.clone();

        let task = tokio::spawn(async move {
            let mut subscription = Some(first);
            loop {
                tokio::select! {
                    _ = task_cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(ClientEvent::Close) | None => break,
                        Some(event) if event.is_change() => {
                            debug!(url = %task_url, "[LiveBinding] Client changed, re-subscribing");
                            // Unsubscribe before subscribing again
                            drop(subscription.take());
                            match client.subscribe(&task_url, json!({})).await {
                                Ok(next) => subscription = Some(next),
                                Err(e) => {
                                    warn!(url = %task_url, error = %e, "[LiveBinding] Re-subscribe failed");
                                    if tx.send(Err(e)).is_err() {
                                        break;
                                    }
                                }
                            }
                        }
                        Some(_) => {}
                    },
                    item = next_item(&mut subscription) => match item {
                        Some(item) => {
                            if tx.send(item).is_err() {
                                break;
                            }
                        }
                        // Transport went away; wait for the next change
                        None => subscription = None,
                    },
                }
            }
            debug!(url = %task_url, "[LiveBinding] Stopped");
        });

        Ok(Self {
            url,
            updates,
            cancel,
            task,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn recv(&mut self) -> Option<Result<Value>> {
        self.updates.recv().await
    }

    pub fn unsubscribe(self) {
        self.cancel.cancel();
    }
}

/// Next item of an optional subscription; pends forever when there is none
async fn next_item(
    subscription: &mut Option<crate::transport::Subscription>,
) -> Option<Result<Value>> {
    match subscription {
        Some(subscription) => subscription.next().await,
        None => std::future::pending().await,
    }
}

impl Stream for LiveBinding {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.updates.poll_recv(cx)
    }
}

impl Drop for LiveBinding {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

impl fmt::Debug for LiveBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveBinding").field("url", &self.url).finish()
    }
}
