//! Namespaces and query option types
//!
//! Options are JSON-encoded into the query string the way the scope service
//! expects: scalars as-is, documents as JSON text, absent documents as `null`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{Result, ScopeError};

/// Default page size for `find`/`count`
pub const DEFAULT_LIMIT: u32 = 10;

/// A `database.collection` qualified resource identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        let database = database.into();
        let collection = collection.into();
        if database.is_empty() || collection.is_empty() {
            return Err(ScopeError::InvalidNamespace(format!("{}.{}", database, collection)));
        }
        Ok(Self {
            database,
            collection,
        })
    }

    /// `/{database}/{collection}`
    pub fn path(&self) -> String {
        format!(
            "/{}/{}",
            urlencoding::encode(&self.database),
            urlencoding::encode(&self.collection)
        )
    }
}

impl FromStr for Namespace {
    type Err = ScopeError;

    /// Split at the first dot; collection names may contain dots.
    fn from_str(ns: &str) -> Result<Self> {
        match ns.split_once('.') {
            Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Self::new(db, coll),
            _ => Err(ScopeError::InvalidNamespace(ns.to_string())),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

impl TryFrom<&str> for Namespace {
    type Error = ScopeError;

    fn try_from(ns: &str) -> Result<Self> {
        ns.parse()
    }
}

impl TryFrom<String> for Namespace {
    type Error = ScopeError;

    fn try_from(ns: String) -> Result<Self> {
        ns.parse()
    }
}

/// Options for `find` and `count`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FindOptions {
    pub query: Value,
    pub limit: u32,
    pub skip: u64,
    pub explain: bool,
    pub sort: Option<Value>,
    pub fields: Option<Value>,
    pub options: Option<Value>,
    pub batch_size: Option<u32>,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self {
            query: json!({}),
            limit: DEFAULT_LIMIT,
            skip: 0,
            explain: false,
            sort: None,
            fields: None,
            options: None,
            batch_size: None,
        }
    }
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_query(mut self, query: Value) -> Self {
        self.query = query;
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn with_sort(mut self, sort: Value) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_fields(mut self, fields: Value) -> Self {
        self.fields = Some(fields);
        self
    }

    pub fn with_options(mut self, options: Value) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_explain(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }

    pub fn query_params(&self) -> Vec<(String, String)> {
        vec![
            ("query".into(), encode_doc(Some(&self.query))),
            ("limit".into(), self.limit.to_string()),
            ("skip".into(), self.skip.to_string()),
            ("explain".into(), self.explain.to_string()),
            ("sort".into(), encode_doc(self.sort.as_ref())),
            ("fields".into(), encode_doc(self.fields.as_ref())),
            ("options".into(), encode_doc(self.options.as_ref())),
            (
                "batchSize".into(),
                self.batch_size.map(|b| b.to_string()).unwrap_or_else(|| "null".into()),
            ),
        ]
    }
}

/// Options for `aggregate`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AggregateOptions {
    pub explain: bool,
    pub allow_disk_use: Option<bool>,
    pub cursor: Option<Value>,
}

impl AggregateOptions {
    pub fn query_params(&self, pipeline: &Value) -> Vec<(String, String)> {
        vec![
            ("pipeline".into(), pipeline.to_string()),
            ("explain".into(), self.explain.to_string()),
            (
                "allowDiskUse".into(),
                self.allow_disk_use.map(|b| b.to_string()).unwrap_or_else(|| "null".into()),
            ),
            ("cursor".into(), encode_doc(self.cursor.as_ref())),
        ]
    }
}

/// Aggregation pipelines must be arrays
pub fn validate_pipeline(pipeline: &Value) -> Result<()> {
    if pipeline.is_array() {
        Ok(())
    } else {
        Err(ScopeError::InvalidPipeline)
    }
}

/// Server-side analytics groups
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsGroup {
    Durability,
    Operations,
    Memory,
    Replication,
    Network,
    Indexes,
}

impl AnalyticsGroup {
    pub const ALL: [AnalyticsGroup; 6] = [
        Self::Durability,
        Self::Operations,
        Self::Memory,
        Self::Replication,
        Self::Network,
        Self::Indexes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Durability => "durability",
            Self::Operations => "operations",
            Self::Memory => "memory",
            Self::Replication => "replication",
            Self::Network => "network",
            Self::Indexes => "indexes",
        }
    }
}

impl FromStr for AnalyticsGroup {
    type Err = ScopeError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| ScopeError::UnknownAnalyticsGroup(s.to_string()))
    }
}

fn encode_doc(doc: Option<&Value>) -> String {
    doc.map(Value::to_string).unwrap_or_else(|| "null".to_string())
}
