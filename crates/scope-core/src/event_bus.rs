//! Event Bus - client notification distribution
//!
//! Every `ScopeClient` owns one bus. Producers (the connection driver, the
//! Context forwarder, `close()`) emit `ClientEvent`s; consumers (application
//! code, live bindings, tests) subscribe and receive every event emitted
//! after they subscribed.
//!
//! ```text
//!   Context forwarder ─┐
//!   Connection driver ─┼──► broadcast ──► app listeners / LiveBinding / tests
//!   ScopeClient::close ┘
//! ```

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::ClientEvent;

/// Default channel capacity for the event bus
const DEFAULT_CAPACITY: usize = 256;

/// Event Bus - central hub for client notifications
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Create a new event bus with default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a new event bus with custom capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Get a sender for emitting events
    pub fn sender(&self) -> EventSender {
        EventSender {
            sender: self.sender.clone(),
        }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Cheaply cloneable handle for emitting events
#[derive(Clone)]
pub struct EventSender {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventSender {
    /// Emit an event, returning how many receivers got it.
    /// Zero receivers is not an error.
    pub fn emit(&self, event: ClientEvent) -> usize {
        let type_name = event.type_name();
        match self.sender.send(event) {
            Ok(count) => {
                debug!(
                    event_type = type_name,
                    receivers = count,
                    "[EventBus] Emitted event"
                );
                count
            }
            Err(_) => {
                debug!(event_type = type_name, "[EventBus] No receivers for event");
                0
            }
        }
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Receives every event emitted after subscription
pub struct EventReceiver {
    receiver: broadcast::Receiver<ClientEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once the bus is gone. Lag is logged and skipped.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        skipped_events = skipped,
                        "[EventBus] Receiver lagged, skipped {} events", skipped
                    );
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("[EventBus] Channel closed");
                    return None;
                }
            }
        }
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        match self.receiver.try_recv() {
            Ok(event) => Some(event),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                warn!(skipped_events = skipped, "[EventBus] Receiver lagged on try_recv");
                self.receiver.try_recv().ok()
            }
            Err(_) => None,
        }
    }
}
