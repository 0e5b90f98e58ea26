//! Router-based calls, cursors and live streams

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use scope_core::query::validate_pipeline;
use scope_core::{AggregateOptions, FindOptions, Namespace, Result, ScopeError};
use serde_json::{json, Map, Value};
use tracing::debug;

use super::ScopeClient;
use crate::cursor::{BatchSource, Cursor};
use crate::router::{fragment_from_segments, ApiMethod, Streamable};
use crate::token::TokenManager;
use crate::transport::Subscription;

/// Unbuffered view of a streamable resource
#[derive(Debug)]
pub enum ResourceStream {
    /// Server-pushed feed (`/top`, `/log`)
    Live(Subscription),
    /// Paginated query results (`/:database/:collection/find`)
    Cursor(Cursor),
}

impl ResourceStream {
    pub fn into_stream(self) -> BoxStream<'static, Result<Value>> {
        match self {
            Self::Live(subscription) => subscription.boxed(),
            Self::Cursor(cursor) => cursor.into_stream().boxed(),
        }
    }
}

/// Decode a fragment query string. Values that parse as JSON are taken as
/// JSON, anything else as a string; `null` means absent.
pub(crate) fn query_object(query: Option<&str>) -> Map<String, Value> {
    let mut object = Map::new();
    let Some(query) = query else {
        return object;
    };
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        let parsed = serde_json::from_str::<Value>(&value)
            .unwrap_or_else(|_| Value::String(value.clone().into_owned()));
        if !parsed.is_null() {
            object.insert(key.into_owned(), parsed);
        }
    }
    object
}

pub(crate) fn find_options_from_query(query: Option<&str>) -> Result<FindOptions> {
    serde_json::from_value(Value::Object(query_object(query)))
        .map_err(|e| ScopeError::Decode(format!("invalid find options in query string: {}", e)))
}

impl ScopeClient {
    // ========================================================================
    // Router-based API
    // ========================================================================

    /// Resolve `fragment` with the default route table and invoke the
    /// matching operation.
    ///
    /// `options` applies to `find`/`count`; when absent they are read from the
    /// fragment's query string.
    pub async fn call(&self, fragment: &str, options: Option<FindOptions>) -> Result<Value> {
        let resolved = self.router().resolve(fragment)?;
        debug!(fragment, method = resolved.method.as_str(), "[ScopeClient] Dispatching call");

        let param = |i: usize| {
            resolved
                .params()
                .get(i)
                .cloned()
                .flatten()
                .ok_or_else(|| ScopeError::NoRoute(fragment.to_string()))
        };
        let ns = || -> Result<String> { Ok(Namespace::new(param(0)?, param(1)?)?.to_string()) };
        // Only query routes read find options from the query string
        let options = || -> Result<FindOptions> {
            match &options {
                Some(options) => Ok(options.clone()),
                None => find_options_from_query(resolved.query()),
            }
        };

        match resolved.method {
            ApiMethod::Instance => self.instance().await,
            ApiMethod::Deployments => self.deployments().await,
            ApiMethod::Count => self.count(&ns()?, options()?).await,
            ApiMethod::Find => self.find(&ns()?, options()?).await.map(Value::Array),
            ApiMethod::Log => self.log().await,
            ApiMethod::Top => self.top().await,
            ApiMethod::Replication => self.replication().await,
            ApiMethod::Sharding => self.sharding().await,
            ApiMethod::Database => self.database(&param(0)?).await,
            ApiMethod::Collection => self.collection(&ns()?).await,
        }
    }

    /// `call(&["test", "things"])` is `call("/test/things")`
    pub async fn call_segments<S: AsRef<str>>(&self, segments: &[S]) -> Result<Value> {
        self.call(&fragment_from_segments(segments), None).await
    }

    /// Resolve `fragment` and open it without buffering: a live subscription
    /// for pushed resources, a cursor for queries. Anything else is
    /// `NotStreamable`.
    pub async fn stream(&self, fragment: &str) -> Result<ResourceStream> {
        let resolved = self.router().resolve(fragment)?;
        match resolved.method.streamable() {
            Some(Streamable::Live) => {
                let path = fragment.split('?').next().unwrap_or(fragment);
                let params = Value::Object(query_object(resolved.query()));
                self.subscribe(path, params).await.map(ResourceStream::Live)
            }
            Some(Streamable::Cursor) => {
                let params = resolved.params();
                let database = params.first().cloned().flatten();
                let collection = params.get(1).cloned().flatten();
                let (Some(database), Some(collection)) = (database, collection) else {
                    return Err(ScopeError::NoRoute(fragment.to_string()));
                };
                let ns = Namespace::new(database, collection)?;
                let options = find_options_from_query(resolved.query())?;
                Ok(ResourceStream::Cursor(self.cursor_for(ns, options)))
            }
            None => Err(ScopeError::NotStreamable(resolved.method.as_str().to_string())),
        }
    }

    // ========================================================================
    // Cursors
    // ========================================================================

    /// A cursor over every document matching `options`, fetched in pages of
    /// `batch_size` (or `limit`).
    pub fn find_cursor(&self, ns: &str, options: FindOptions) -> Result<Cursor> {
        let ns: Namespace = ns.parse()?;
        Ok(self.cursor_for(ns, options))
    }

    fn cursor_for(&self, ns: Namespace, options: FindOptions) -> Cursor {
        Cursor::new(Arc::new(self.clone()), ns, options)
    }

    // ========================================================================
    // Live subscriptions
    // ========================================================================

    /// Subscribe to server pushes on `path`, opening the streaming transport
    /// if needed. The payload carries the token and instance id plus
    /// `params`.
    pub async fn subscribe(&self, path: &str, params: Value) -> Result<Subscription> {
        self.inner.gate.enter().await?;
        let stream = self.inner.ensure_stream().await?;

        let token = self
            .inner
            .token
            .read()
            .as_ref()
            .and_then(TokenManager::token)
            .ok_or(ScopeError::NoSession)?;

        let mut payload = Map::new();
        payload.insert("token".into(), Value::String(token));
        payload.insert(
            "instance_id".into(),
            self.inner.context.instance_id().map(Value::String).unwrap_or(Value::Null),
        );
        if let Value::Object(params) = params {
            payload.extend(params);
        }

        stream.subscribe(path, Value::Object(payload))
    }

    /// Live per-namespace operation counters
    pub async fn top_stream(&self, params: Value) -> Result<Subscription> {
        self.subscribe("/top", params).await
    }

    /// Live log tail
    pub async fn log_stream(&self) -> Result<Subscription> {
        self.subscribe("/log", json!({})).await
    }

    /// Aggregation results pushed as the server's cursor produces them
    pub async fn aggregate_stream(
        &self,
        ns: &str,
        pipeline: Value,
        options: AggregateOptions,
    ) -> Result<Subscription> {
        validate_pipeline(&pipeline)?;
        let ns: Namespace = ns.parse()?;
        let params = json!({
            "pipeline": pipeline,
            "options": options,
        });
        self.subscribe(&format!("{}/aggregate", ns.path()), params).await
    }
}

#[async_trait]
impl BatchSource for ScopeClient {
    async fn fetch_batch(&self, namespace: &Namespace, options: &FindOptions) -> Result<Vec<Value>> {
        self.find_in(namespace, options).await
    }
}
