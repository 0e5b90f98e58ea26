//! Route Resolver
//!
//! Compiles Express-style path patterns into anchored regexes and resolves a
//! URL fragment to `(method, args)`.
//!
//! Pattern vocabulary:
//! - `:name`   one path segment, `[^/?]+`
//! - `(...)`   optional group
//! - `*name`   splat, non-greedy up to the query string
//!
//! Every compiled pattern also accepts a trailing `?query`, captured as the
//! final argument. Resolution is first-match in table order.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use scope_core::{Result, ScopeError};
use tracing::trace;

lazy_static! {
    static ref ESCAPE_CHARS: Regex = Regex::new(r"[\-{}\[\]+?.,\\\^$|#\s]").unwrap();
    static ref OPTIONAL_PARAM: Regex = Regex::new(r"\((.*?)\)").unwrap();
    static ref NAMED_PARAM: Regex = Regex::new(r"(\(\?)?:\w+").unwrap();
    static ref SPLAT_PARAM: Regex = Regex::new(r"\*\w+").unwrap();
}

/// Translate one route pattern into an anchored regex source
pub fn pattern_to_regex(pattern: &str) -> String {
    let escaped = ESCAPE_CHARS.replace_all(pattern, |caps: &Captures| regex::escape(&caps[0]));
    let optional = OPTIONAL_PARAM.replace_all(&escaped, "(?:${1})?");
    let named = NAMED_PARAM.replace_all(&optional, |caps: &Captures| {
        if caps.get(1).is_some() {
            caps[0].to_string()
        } else {
            "([^/?]+)".to_string()
        }
    });
    let splat = SPLAT_PARAM.replace_all(&named, "([^?]*?)");
    format!(r"^{}(?:\?([\s\S]*))?$", splat)
}

#[derive(Debug)]
struct CompiledRoute<M> {
    pattern: String,
    method: M,
    regex: Regex,
}

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<M> {
    pub method: M,
    /// Captured groups in order. All but the last are URL-decoded; the last
    /// is the raw query string.
    pub args: Vec<Option<String>>,
    /// Pattern that matched
    pub pattern: String,
}

impl<M> Resolved<M> {
    /// Path parameters, without the trailing query-string capture
    pub fn params(&self) -> &[Option<String>] {
        match self.args.split_last() {
            Some((_, params)) => params,
            None => &[],
        }
    }

    pub fn query(&self) -> Option<&str> {
        self.args.last().and_then(|q| q.as_deref())
    }
}

/// Ordered, immutable table of compiled routes
#[derive(Debug)]
pub struct Router<M> {
    routes: Vec<CompiledRoute<M>>,
}

impl<M: Clone> Router<M> {
    pub fn compile<'a>(table: impl IntoIterator<Item = (&'a str, M)>) -> Result<Self> {
        let routes = table
            .into_iter()
            .map(|(pattern, method)| {
                let source = pattern_to_regex(pattern);
                let regex = Regex::new(&source).map_err(|e| ScopeError::InvalidRoute {
                    pattern: pattern.to_string(),
                    reason: e.to_string(),
                })?;
                Ok(CompiledRoute {
                    pattern: pattern.to_string(),
                    method,
                    regex,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { routes })
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Resolve a fragment against the table. The first matching pattern wins.
    pub fn resolve(&self, fragment: &str) -> Result<Resolved<M>> {
        for route in &self.routes {
            let Some(caps) = route.regex.captures(fragment) else {
                continue;
            };

            let last = caps.len().saturating_sub(1);
            let args = (1..caps.len())
                .map(|i| {
                    caps.get(i).map(|m| {
                        if i == last {
                            m.as_str().to_string()
                        } else {
                            decode(m.as_str())
                        }
                    })
                })
                .collect();

            trace!(fragment, pattern = %route.pattern, "[Router] Resolved");
            return Ok(Resolved {
                method: route.method.clone(),
                args,
                pattern: route.pattern.clone(),
            });
        }

        Err(ScopeError::NoRoute(fragment.to_string()))
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

/// Methods reachable through `ScopeClient::call`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiMethod {
    Instance,
    Deployments,
    Count,
    Find,
    Log,
    Top,
    Replication,
    Sharding,
    Database,
    Collection,
}

/// How a method can be consumed without buffering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streamable {
    /// Server-pushed subscription
    Live,
    /// Paginated result cursor
    Cursor,
}

impl ApiMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instance => "instance",
            Self::Deployments => "deployments",
            Self::Count => "count",
            Self::Find => "find",
            Self::Log => "log",
            Self::Top => "top",
            Self::Replication => "replication",
            Self::Sharding => "sharding",
            Self::Database => "database",
            Self::Collection => "collection",
        }
    }

    pub fn streamable(&self) -> Option<Streamable> {
        match self {
            Self::Top | Self::Log => Some(Streamable::Live),
            Self::Find => Some(Streamable::Cursor),
            _ => None,
        }
    }

    pub fn is_streamable(&self) -> bool {
        self.streamable().is_some()
    }
}

/// Route table used by `ScopeClient::call`, in resolution order
pub fn default_routes() -> Vec<(&'static str, ApiMethod)> {
    vec![
        ("/", ApiMethod::Instance),
        ("../", ApiMethod::Deployments),
        ("/:database/:collection/count", ApiMethod::Count),
        ("/:database/:collection/find", ApiMethod::Find),
        ("/log", ApiMethod::Log),
        ("/top", ApiMethod::Top),
        ("/replication", ApiMethod::Replication),
        ("/sharding", ApiMethod::Sharding),
        ("/:database", ApiMethod::Database),
        ("/:database/:collection", ApiMethod::Collection),
    ]
}

/// `["db", "coll"]` -> `/db/coll`
pub fn fragment_from_segments<S: AsRef<str>>(segments: &[S]) -> String {
    let mut fragment = String::new();
    for segment in segments {
        fragment.push('/');
        fragment.push_str(segment.as_ref());
    }
    if fragment.is_empty() {
        fragment.push('/');
    }
    fragment
}
