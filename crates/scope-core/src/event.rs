//! Client notifications
//!
//! The client core announces its lifecycle through these events:
//! - `Readable` once the first session is established
//! - `ContextChanged` / `Reconnected` whenever subscribers should requery
//! - `Error` for fatal session failures
//! - `Close` once, when the client shuts down

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ScopeError;

/// Values that actually changed in a Context update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextChange {
    /// The full update as passed to `Context::set`
    pub incoming: Map<String, Value>,
    /// Previous values, only for keys whose value changed
    pub previous: Map<String, Value>,
}

impl ContextChange {
    /// Keys whose value changed
    pub fn changed_keys(&self) -> impl Iterator<Item = &str> {
        self.previous.keys().map(String::as_str)
    }

    pub fn changed(&self, key: &str) -> bool {
        self.previous.contains_key(key)
    }
}

#[derive(Debug, Clone)]
pub enum ClientEvent {
    /// Session established, operations are flowing
    Readable,
    /// Context keys changed
    ContextChanged(ContextChange),
    /// A `connect()` to a new seed completed
    Reconnected { seed: String },
    /// Fatal session error, the client is dead until `connect()`
    Error(ScopeError),
    /// Client closed
    Close,
}

impl ClientEvent {
    /// Get the event type name for logging
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Readable => "readable",
            Self::ContextChanged(_) => "context_changed",
            Self::Reconnected { .. } => "reconnected",
            Self::Error(_) => "error",
            Self::Close => "close",
        }
    }

    /// True for events after which live subscriptions should be re-established
    pub fn is_change(&self) -> bool {
        matches!(self, Self::ContextChanged(_) | Self::Reconnected { .. })
    }
}
