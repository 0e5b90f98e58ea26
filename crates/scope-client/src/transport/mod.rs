//! Streaming transport
//!
//! One persistent WebSocket to the scope root per session, opened when the
//! token becomes readable. Live subscriptions multiplex over it by channel:
//!
//! ```text
//!   client → server  {"event": "/top", "payload": {token, instance_id, ...}}
//!   server → client  {"event": "/top", "data": {...}}
//!                    {"event": "/top", "error": {"message": "..."}}
//!   client → server  {"event": "/top/unsubscribe", "payload": {...}}
//! ```
//!
//! A single reader task owns the socket stream and routes frames to the
//! listeners registered for their channel; a writer task owns the sink.

mod subscription;

pub use subscription::Subscription;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt as _, StreamExt as _};
use scope_core::{Result, ScopeError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;
use uuid::Uuid;

/// Suffix appended to a channel to stop a server-side feed
pub const UNSUBSCRIBE_SUFFIX: &str = "/unsubscribe";

#[derive(Debug, Serialize)]
struct Outgoing<'a> {
    event: &'a str,
    payload: &'a Value,
}

#[derive(Debug, Deserialize)]
struct Incoming {
    event: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<Value>,
}

/// Decode a server frame into `(channel, item)`. Frames that are not
/// envelopes are ignored.
fn parse_incoming(text: &str) -> Option<(String, Result<Value>)> {
    let incoming: Incoming = serde_json::from_str(text).ok()?;
    let item = match incoming.error {
        Some(error) if !error.is_null() => {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            Err(ScopeError::StreamMessage {
                channel: incoming.event.clone(),
                message,
            })
        }
        _ => Ok(incoming.data),
    };
    Some((incoming.event, item))
}

pub(crate) struct Listener {
    id: Uuid,
    tx: mpsc::UnboundedSender<Result<Value>>,
}

pub(crate) struct TransportInner {
    url: Url,
    outgoing: mpsc::UnboundedSender<Message>,
    listeners: DashMap<String, Vec<Listener>>,
    connected: AtomicBool,
    shutdown: CancellationToken,
}

impl TransportInner {
    fn send(&self, channel: &str, payload: &Value) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ScopeError::StreamUnavailable);
        }
        let text = serde_json::to_string(&Outgoing {
            event: channel,
            payload,
        })?;
        self.outgoing
            .send(Message::Text(text.into()))
            .map_err(|_| ScopeError::StreamUnavailable)
    }

    fn dispatch(&self, text: &str) {
        let Some((channel, item)) = parse_incoming(text) else {
            trace!("[StreamingTransport] Ignoring non-envelope frame");
            return;
        };

        match self.listeners.get_mut(&channel) {
            Some(mut listeners) => {
                listeners.retain(|l| l.tx.send(item.clone()).is_ok());
                trace!(channel = %channel, listeners = listeners.len(), "[StreamingTransport] Dispatched");
            }
            None => {
                trace!(channel = %channel, "[StreamingTransport] No listener for channel");
            }
        }
    }

    /// Remove one listener. The last listener of a channel also stops the
    /// server-side feed.
    pub(crate) fn remove_listener(&self, channel: &str, id: Uuid, payload: &Value) {
        let now_empty = match self.listeners.get_mut(channel) {
            Some(mut listeners) => {
                listeners.retain(|l| l.id != id);
                listeners.is_empty()
            }
            None => false,
        };

        if now_empty {
            self.listeners.remove_if(channel, |_, listeners| listeners.is_empty());
            let unsubscribe = format!("{}{}", channel, UNSUBSCRIBE_SUFFIX);
            match self.send(&unsubscribe, payload) {
                Ok(()) => debug!(channel, "[StreamingTransport] Unsubscribed"),
                Err(e) => trace!(channel, error = %e, "[StreamingTransport] Unsubscribe not sent"),
            }
        }
    }

    /// Stop both tasks and end every open subscription
    fn teardown(&self, reason: Option<ScopeError>) {
        self.connected.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let channels: Vec<String> = self.listeners.iter().map(|e| e.key().clone()).collect();
        for channel in channels {
            if let Some((_, listeners)) = self.listeners.remove(&channel) {
                if let Some(err) = &reason {
                    for listener in listeners {
                        let _ = listener.tx.send(Err(err.clone()));
                    }
                }
            }
        }
    }
}

/// Live connection to the scope streaming endpoint
pub struct StreamingTransport {
    inner: Arc<TransportInner>,
}

impl StreamingTransport {
    /// Open the socket and start the reader and writer tasks
    pub async fn connect(url: Url, timeout: Duration) -> Result<Self> {
        debug!(url = %url, "[StreamingTransport] Connecting");
        let (socket, _response) = tokio::time::timeout(timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                warn!(url = %url, "[StreamingTransport] Connect timed out");
                ScopeError::StreamUnavailable
            })??;

        let (mut sink, mut stream) = socket.split();
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let shutdown = CancellationToken::new();

        let inner = Arc::new(TransportInner {
            url: url.clone(),
            outgoing,
            listeners: DashMap::new(),
            connected: AtomicBool::new(true),
            shutdown: shutdown.clone(),
        });

        // Writer: sole owner of the sink
        let writer_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_shutdown.cancelled() => {
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                    message = outgoing_rx.recv() => {
                        let Some(message) = message else { break };
                        if let Err(e) = sink.send(message).await {
                            warn!(error = %e, "[StreamingTransport] Write failed");
                            break;
                        }
                    }
                }
            }
            trace!("[StreamingTransport] Writer stopped");
        });

        // Reader: sole consumer of the stream
        let reader_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = reader_inner.shutdown.cancelled() => break None,
                    frame = stream.next() => match frame {
                        Some(Ok(Message::Text(text))) => reader_inner.dispatch(text.as_str()),
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "[StreamingTransport] Server closed the stream");
                            break Some(ScopeError::StreamUnavailable);
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "[StreamingTransport] Read failed");
                            break Some(ScopeError::from(e));
                        }
                        None => break Some(ScopeError::StreamUnavailable),
                    }
                }
            };
            reader_inner.teardown(reason);
            trace!("[StreamingTransport] Reader stopped");
        });

        info!(url = %url, "[StreamingTransport] Connected");
        Ok(Self { inner })
    }

    pub fn url(&self) -> &Url {
        &self.inner.url
    }

    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }

    /// Register a listener on `channel` and ask the server to start pushing
    pub fn subscribe(&self, channel: &str, payload: Value) -> Result<Subscription> {
        if !self.is_connected() {
            return Err(ScopeError::StreamUnavailable);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        self.inner
            .listeners
            .entry(channel.to_string())
            .or_default()
            .push(Listener { id, tx });

        if let Err(e) = self.inner.send(channel, &payload) {
            self.inner.remove_listener(channel, id, &payload);
            return Err(e);
        }

        debug!(channel, "[StreamingTransport] Subscribed");
        Ok(Subscription::new(channel.to_string(), id, payload, rx, Arc::downgrade(&self.inner)))
    }

    /// Listeners currently registered on `channel`
    pub fn listener_count(&self, channel: &str) -> usize {
        self.inner.listeners.get(channel).map(|l| l.len()).unwrap_or(0)
    }

    pub fn close(&self) {
        if self.is_connected() {
            info!(url = %self.inner.url, "[StreamingTransport] Closing");
        }
        self.inner.teardown(None);
    }
}

impl Drop for StreamingTransport {
    fn drop(&mut self) {
        self.inner.teardown(None);
    }
}
