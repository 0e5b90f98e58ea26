//! Trace Context - request correlation for outgoing scope calls
//!
//! Generates short trace IDs and the spans that wrap each authorized request.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tracing::{debug, debug_span, warn, Span};

/// Global request counter for trace ID generation
static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a short, unique trace ID for this request
/// Format: 6 hex characters (e.g., "a1b2c3")
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    let mixed = counter.wrapping_add(timestamp);
    format!("{:06x}", mixed & 0xFFFFFF)
}

/// Correlation data for one outgoing request
#[derive(Debug, Clone)]
pub struct TraceContext {
    /// Unique trace ID (6 hex chars)
    pub trace_id: String,
    /// HTTP method (GET, POST, ...)
    pub method: String,
    /// Resource path before the instance prefix (e.g. `/test/things/find`)
    pub path: String,
    /// Instance the request was addressed to, absent for meta routes
    pub instance_id: Option<String>,
    pub started_at: Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            instance_id: None,
            started_at: Instant::now(),
        }
    }

    pub fn with_instance(mut self, instance_id: Option<String>) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Short instance ID for logging (first 12 chars or "meta")
    pub fn short_instance(&self) -> &str {
        self.instance_id
            .as_ref()
            .map(|i| i.char_indices().nth(12).map_or(i.as_str(), |(end, _)| &i[..end]))
            .unwrap_or("meta")
    }
}

/// Span and entry/exit lines for outgoing requests
pub struct RequestSpan;

impl RequestSpan {
    /// Span carrying the trace ID into every child log line
    pub fn enter(ctx: &TraceContext) -> Span {
        debug_span!(
            "scope_request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    pub fn log_entry(ctx: &TraceContext) {
        debug!(
            trace_id = %ctx.trace_id,
            "→ {} {} instance={}",
            ctx.method,
            ctx.path,
            ctx.short_instance()
        );
    }

    /// Completion line; statuses >= 400 log at warn
    pub fn log_exit(ctx: &TraceContext, status: u16) {
        let elapsed = ctx.elapsed_ms();
        if status >= 400 {
            warn!(trace_id = %ctx.trace_id, "← {} {} ({}ms)", status, ctx.path, elapsed);
        } else {
            debug!(trace_id = %ctx.trace_id, "← {} ({}ms)", status, elapsed);
        }
    }
}
