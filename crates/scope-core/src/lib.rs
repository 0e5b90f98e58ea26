//! # Scope Core
//!
//! Domain types shared by the scope client runtime.
//!
//! ## Modules
//!
//! - `config` - Scope endpoint, seed, driver info and client tuning
//! - `context` - Instance context with deduplicated change notifications
//! - `session` - Token endpoint payload validation and refresh timing
//! - `query` - Namespaces and query option encoding
//! - `event` / `event_bus` - Client notifications
//! - `error` - Error taxonomy

pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod event_bus;
pub mod query;
pub mod session;

pub use config::{ClientOptions, DriverInfo, ScopeConfig};
pub use context::Context;
pub use error::{Result, ScopeError};
pub use event::{ClientEvent, ContextChange};
pub use event_bus::{EventBus, EventReceiver, EventSender};
pub use query::{AggregateOptions, AnalyticsGroup, FindOptions, Namespace};
pub use session::{json_type_name, Session};
