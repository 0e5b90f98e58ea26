//! # Scope Client
//!
//! Async client SDK for the scope monitoring service.
//!
//! ## Modules
//!
//! - `token` - Bearer session acquisition, scheduled refresh and revoke
//! - `gate` - FIFO readiness gate for operations issued before the session is ready
//! - `router` - Express-style route tables for fragment dispatch
//! - `cursor` - Lazily refilled result cursor
//! - `transport` - WebSocket transport and live subscriptions
//! - `client` - `ScopeClient`: context, request primitive, typed endpoints, lifecycle
//! - `registry` - Application-owned `(scope, seed)` client registry
//! - `adapter` - Read-only sync and live binding capabilities for model layers
//! - `logging` - Subscriber setup and request tracing
//!
//! ## Example
//!
//! ```no_run
//! use scope_client::{FindOptions, ScopeClient, ScopeConfig};
//!
//! # async fn run() -> scope_client::Result<()> {
//! let client = ScopeClient::new(ScopeConfig::new("http://localhost:29017", "mongodb://localhost:27017")?)?;
//! client.ready().await?;
//!
//! let docs = client.find("local.startup_log", FindOptions::new().with_limit(1)).await?;
//! let mut cursor = client.find_cursor("local.startup_log", FindOptions::new())?;
//! while let Some(doc) = cursor.next().await? {
//!     println!("{doc}");
//! }
//! client.close().await;
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod client;
pub mod cursor;
pub mod gate;
pub mod logging;
pub mod registry;
pub mod router;
pub mod token;
pub mod transport;

pub use adapter::{Adapter, LiveBinding, Resource, ResourceUrl, Subscribable, SyncMethod, SyncOptions, Syncable};
pub use client::{ApiResponse, ResourceStream, ScopeClient};
pub use cursor::{BatchSource, Cursor};
pub use registry::ClientRegistry;
pub use router::{ApiMethod, Resolved, Router};
pub use token::{TokenEvent, TokenManager, TokenState};
pub use transport::{StreamingTransport, Subscription};

pub use scope_core::{
    AggregateOptions, AnalyticsGroup, ClientEvent, ClientOptions, Context, ContextChange, DriverInfo,
    EventReceiver, FindOptions, Namespace, Result, ScopeConfig, ScopeError, Session,
};
