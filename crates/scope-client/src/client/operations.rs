//! Typed endpoint operations
//!
//! Thin wrappers over [`ScopeClient::read`] and [`ScopeClient::crud`].
//! Argument validation (namespaces, pipelines, analytics groups) happens
//! before the readiness gate, so misuse fails without waiting for a session.

use reqwest::Method;
use scope_core::query::validate_pipeline;
use scope_core::{
    json_type_name, AggregateOptions, AnalyticsGroup, FindOptions, Namespace, Result, ScopeError,
};
use serde_json::{json, Map, Value};

use super::{ApiResponse, ScopeClient};

fn namespace(ns: &str) -> Result<Namespace> {
    ns.parse()
}

fn segment(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

/// Document ids travel as path segments: strings as-is, anything else as JSON
fn id_segment(id: &Value) -> String {
    match id {
        Value::String(s) => segment(s),
        other => segment(&other.to_string()),
    }
}

fn expect_array(body: Value, what: &str) -> Result<Vec<Value>> {
    match body {
        Value::Array(items) => Ok(items),
        other => Err(ScopeError::Decode(format!(
            "expected an array from {}, got {}",
            what,
            json_type_name(&other)
        ))),
    }
}

fn expect_names(mut body: Value, field: &str) -> Result<Vec<String>> {
    let names = body
        .get_mut(field)
        .map(Value::take)
        .ok_or_else(|| ScopeError::Decode(format!("response has no `{}`", field)))?;
    Ok(serde_json::from_value(names)?)
}

impl ScopeClient {
    // ========================================================================
    // Instance
    // ========================================================================

    /// Details of the current instance: database names, host and build info
    pub async fn instance(&self) -> Result<Value> {
        self.read("/", &[]).await
    }

    /// Every deployment the scope service knows about
    pub async fn deployments(&self) -> Result<Value> {
        self.read("../", &[]).await
    }

    /// Sharding status of the cluster the instance belongs to
    pub async fn sharding(&self) -> Result<Value> {
        self.read("/sharding", &[]).await
    }

    pub async fn replication(&self) -> Result<Value> {
        self.read("/replication", &[]).await
    }

    /// One snapshot of per-namespace operation counters
    pub async fn top(&self) -> Result<Value> {
        self.read("/top", &[]).await
    }

    /// Recent log lines
    pub async fn log(&self) -> Result<Value> {
        self.read("/log", &[]).await
    }

    pub async fn working_set(&self) -> Result<Value> {
        self.read("/working-set", &[]).await
    }

    /// Server-side analytics for one group. Unknown groups fail immediately.
    pub async fn analytics(&self, group: &str) -> Result<Value> {
        let group: AnalyticsGroup = group.parse()?;
        self.analytics_group(group).await
    }

    pub async fn analytics_group(&self, group: AnalyticsGroup) -> Result<Value> {
        self.read(&format!("/analytics/{}", group.as_str()), &[]).await
    }

    // ========================================================================
    // Databases
    // ========================================================================

    pub async fn database(&self, name: &str) -> Result<Value> {
        self.read(&format!("/{}", segment(name)), &[]).await
    }

    pub async fn destroy_database(&self, name: &str) -> Result<ApiResponse> {
        self.crud(Method::DELETE, &format!("/{}", segment(name)), None).await
    }

    // ========================================================================
    // Collections
    // ========================================================================

    pub async fn collection(&self, ns: &str) -> Result<Value> {
        let ns = namespace(ns)?;
        self.read(&ns.path(), &[]).await
    }

    /// Create a collection. `options` carries creation flags such as
    /// `{capped: true, max: 10}`.
    pub async fn create_collection(&self, ns: &str, options: Option<Value>) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        let body = options.unwrap_or_else(|| Value::Object(Map::new()));
        self.crud(Method::POST, &ns.path(), Some(&body)).await
    }

    /// Update a collection, e.g. `{name: "renamed"}` to rename it
    pub async fn update_collection(&self, ns: &str, changes: Value) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(Method::PUT, &ns.path(), Some(&changes)).await
    }

    pub async fn destroy_collection(&self, ns: &str) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(Method::DELETE, &ns.path(), None).await
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// One page of documents matching `options`
    pub async fn find(&self, ns: &str, options: FindOptions) -> Result<Vec<Value>> {
        let ns = namespace(ns)?;
        self.find_in(&ns, &options).await
    }

    pub(crate) async fn find_in(&self, ns: &Namespace, options: &FindOptions) -> Result<Vec<Value>> {
        let path = format!("{}/find", ns.path());
        let body = self.read(&path, &options.query_params()).await?;
        expect_array(body, &path)
    }

    /// `{count: n}` for documents matching `options.query`
    pub async fn count(&self, ns: &str, options: FindOptions) -> Result<Value> {
        let ns = namespace(ns)?;
        self.read(&format!("{}/count", ns.path()), &options.query_params())
            .await
    }

    /// Run an aggregation pipeline. The pipeline must be a JSON array.
    pub async fn aggregate(
        &self,
        ns: &str,
        pipeline: Value,
        options: AggregateOptions,
    ) -> Result<Value> {
        validate_pipeline(&pipeline)?;
        let ns = namespace(ns)?;
        self.read(
            &format!("{}/aggregate", ns.path()),
            &options.query_params(&pipeline),
        )
        .await
    }

    /// Up to `size` distinct random documents
    pub async fn sample(&self, ns: &str, size: u32) -> Result<Vec<Value>> {
        let ns = namespace(ns)?;
        let path = format!("{}/sample", ns.path());
        let body = self.read(&path, &[("size".to_string(), size.to_string())]).await?;
        expect_array(body, &path)
    }

    /// A single random document
    pub async fn random(&self, ns: &str) -> Result<Value> {
        let ns = namespace(ns)?;
        self.read(&format!("{}/random", ns.path()), &[]).await
    }

    // ========================================================================
    // Documents
    // ========================================================================

    pub async fn get_document(&self, ns: &str, id: &Value) -> Result<Value> {
        let ns = namespace(ns)?;
        self.read(&format!("{}/documents/{}", ns.path(), id_segment(id)), &[])
            .await
    }

    pub async fn create_document(&self, ns: &str, doc: Value) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(Method::POST, &format!("{}/documents", ns.path()), Some(&doc))
            .await
    }

    /// Apply an update document such as `{"$inc": {"updates": 1}}`
    pub async fn update_document(&self, ns: &str, id: &Value, update: Value) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(
            Method::PUT,
            &format!("{}/documents/{}", ns.path(), id_segment(id)),
            Some(&update),
        )
        .await
    }

    pub async fn destroy_document(&self, ns: &str, id: &Value) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(
            Method::DELETE,
            &format!("{}/documents/{}", ns.path(), id_segment(id)),
            None,
        )
        .await
    }

    // ========================================================================
    // Indexes
    // ========================================================================

    pub async fn index(&self, ns: &str, name: &str) -> Result<Value> {
        let ns = namespace(ns)?;
        self.read(&format!("{}/indexes/{}", ns.path(), segment(name)), &[])
            .await
    }

    /// Create an index from a key spec such as `{hostname: 1}`
    pub async fn create_index(&self, ns: &str, keys: Value, options: Option<Value>) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        let body = json!({
            "field": keys,
            "options": options.unwrap_or_else(|| Value::Object(Map::new())),
        });
        self.crud(Method::POST, &format!("{}/indexes", ns.path()), Some(&body))
            .await
    }

    /// Change index options, e.g. `{name: "hostname"}`
    pub async fn update_index(&self, ns: &str, name: &str, options: Value) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(
            Method::PUT,
            &format!("{}/indexes/{}", ns.path(), segment(name)),
            Some(&options),
        )
        .await
    }

    pub async fn destroy_index(&self, ns: &str, name: &str) -> Result<ApiResponse> {
        let ns = namespace(ns)?;
        self.crud(
            Method::DELETE,
            &format!("{}/indexes/{}", ns.path(), segment(name)),
            None,
        )
        .await
    }

    // ========================================================================
    // Shell facades
    // ========================================================================

    /// `db.adminCommand({listDatabases: 1})` equivalent
    pub async fn list_databases(&self) -> Result<Vec<String>> {
        expect_names(self.instance().await?, "database_names")
    }

    /// `db.getCollectionNames()` equivalent
    pub async fn get_collection_names(&self, database: &str) -> Result<Vec<String>> {
        expect_names(self.database(database).await?, "collection_names")
    }
}
