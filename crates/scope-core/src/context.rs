//! Instance context
//!
//! Mutable key-value state identifying the deployment/instance the client is
//! pointed at. Updated only from the token manager's session payload.
//!
//! Change notifications:
//! - exactly one per `set` that changes at least one key
//! - none when every key already holds the incoming value
//! - delivered by a forwarder task, never synchronously with `set`, so a
//!   listener registered right after the mutation still observes it
//! - delivered in mutation order

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::event_bus::EventSender;
use crate::{ClientEvent, ContextChange};

pub const DEPLOYMENT_ID: &str = "deployment_id";
pub const INSTANCE_ID: &str = "instance_id";

pub struct Context {
    data: RwLock<Map<String, Value>>,
    /// False once the client has been pointed at a seed other than the original
    original: AtomicBool,
    changes: mpsc::UnboundedSender<ContextChange>,
}

impl Context {
    /// Create a context whose changes are emitted on `events`.
    ///
    /// Must be called inside a tokio runtime: the forwarder runs as a task.
    pub fn new(events: EventSender) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ContextChange>();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                events.emit(ClientEvent::ContextChanged(change));
            }
            trace!("[Context] Forwarder stopped");
        });
        Self::with_notifier(tx)
    }

    /// Create a context that reports changes on a caller-owned channel
    pub fn with_notifier(changes: mpsc::UnboundedSender<ContextChange>) -> Self {
        let mut data = Map::new();
        data.insert(DEPLOYMENT_ID.to_string(), Value::Null);
        data.insert(INSTANCE_ID.to_string(), Value::Null);

        Self {
            data: RwLock::new(data),
            original: AtomicBool::new(true),
            changes,
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.data.read().get(key).filter(|v| !v.is_null()).cloned()
    }

    /// Read a string-valued key
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.data
            .read()
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn instance_id(&self) -> Option<String> {
        self.get_str(INSTANCE_ID)
    }

    pub fn deployment_id(&self) -> Option<String> {
        self.get_str(DEPLOYMENT_ID)
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.read().clone()
    }

    /// Merge `incoming` into the context.
    ///
    /// Returns the change when at least one key was modified; the same change
    /// is queued for asynchronous notification.
    pub fn set(&self, incoming: Map<String, Value>) -> Option<ContextChange> {
        let mut previous = Map::new();
        {
            let mut data = self.data.write();
            for (key, value) in &incoming {
                if data.get(key) != Some(value) {
                    let old = data.insert(key.clone(), value.clone()).unwrap_or(Value::Null);
                    previous.insert(key.clone(), old);
                }
            }
        }

        if previous.is_empty() {
            trace!("[Context] Set without changes");
            return None;
        }

        let change = ContextChange { incoming, previous };
        debug!(
            keys = ?change.changed_keys().collect::<Vec<_>>(),
            "[Context] Changed"
        );
        // Receiver only goes away with the runtime
        let _ = self.changes.send(change.clone());
        Some(change)
    }

    /// Mark the context as reused for a seed other than the original one
    pub fn mark_reused(&self) {
        self.original.store(false, Ordering::SeqCst);
    }

    pub fn is_original(&self) -> bool {
        self.original.load(Ordering::SeqCst)
    }
}
