use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use futures::Stream;
use scope_core::Result;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::TransportInner;

/// A live, server-pushed feed on one channel.
///
/// Yields each pushed `data` payload; server-side errors arrive as `Err`
/// items. The stream ends when the transport goes away. Dropping the
/// subscription unsubscribes.
pub struct Subscription {
    channel: String,
    id: Uuid,
    payload: Value,
    rx: mpsc::UnboundedReceiver<Result<Value>>,
    transport: Weak<TransportInner>,
    attached: bool,
}

impl Subscription {
    pub(super) fn new(
        channel: String,
        id: Uuid,
        payload: Value,
        rx: mpsc::UnboundedReceiver<Result<Value>>,
        transport: Weak<TransportInner>,
    ) -> Self {
        Self {
            channel,
            id,
            payload,
            rx,
            transport,
            attached: true,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Payload sent with the subscribe request
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Next pushed item, `None` once the transport has gone away
    pub async fn recv(&mut self) -> Option<Result<Value>> {
        self.rx.recv().await
    }

    /// Remove the transport listener and stop the server feed
    pub fn unsubscribe(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.rx.close();
        if let Some(transport) = self.transport.upgrade() {
            transport.remove_listener(&self.channel, self.id, &self.payload);
        }
    }
}

impl Stream for Subscription {
    type Item = Result<Value>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .field("attached", &self.attached)
            .finish()
    }
}
