//! Logging Infrastructure
//!
//! Provides structured logging with:
//! - Trace IDs for request correlation
//! - Colored, compact console output
//! - `RUST_LOG` override with debug defaults for the scope crates

mod trace_context;

pub use trace_context::{generate_trace_id, RequestSpan, TraceContext};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global subscriber.
///
/// `RUST_LOG` takes precedence; otherwise `default_level` applies to
/// everything and the scope crates log at debug. Returns `false` when a
/// subscriber was already installed.
pub fn init_logging(default_level: &str) -> bool {
    // Crate names use underscores in tracing targets (scope-core -> scope_core)
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = EnvFilter::try_new(default_level).unwrap_or_else(|_| EnvFilter::new("info"));
        for directive in ["scope_core=debug", "scope_client=debug"] {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
        filter
    });

    let console_layer = fmt::layer()
        .with_ansi(true)
        .compact()
        .with_thread_names(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .try_init()
        .is_ok()
}
