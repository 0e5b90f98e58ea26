//! Session payload returned by the token endpoint
//!
//! Validation rules applied at acquisition:
//! - `token`, `created_at` and `expires_at` must all be present
//! - `expires_at` must be further in the future than the minimum TTL
//!
//! Timestamps are accepted either as RFC 3339 strings or epoch milliseconds.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, ScopeError};

/// Fields that belong to the credential itself and never reach the Context
pub const CREDENTIAL_FIELDS: [&str; 3] = ["token", "created_at", "expires_at"];

/// A validated bearer session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Everything else the server sent (deployment_id, instance_id, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Session {
    /// Parse and validate a token endpoint response against `now`.
    pub fn from_response(body: Value, now: DateTime<Utc>, min_ttl: Duration) -> Result<Self> {
        let mut fields = match body {
            Value::Object(map) => map,
            other => {
                return Err(ScopeError::MalformedSession(format!(
                    "expected an object, got {}",
                    json_type_name(&other)
                )))
            }
        };

        let created_at = fields.remove("created_at");
        let expires_at = fields.remove("expires_at");
        let (created_at, expires_at) = match (created_at, expires_at) {
            (Some(c), Some(e)) if !c.is_null() && !e.is_null() => (c, e),
            _ => {
                return Err(ScopeError::MalformedSession(
                    "Missing expires_at or created_at".to_string(),
                ))
            }
        };
        let created_at = parse_timestamp("created_at", &created_at)?;
        let expires_at = parse_timestamp("expires_at", &expires_at)?;

        let token = match fields.remove("token") {
            Some(Value::String(t)) if !t.is_empty() => t,
            _ => return Err(ScopeError::MalformedSession("Missing token".to_string())),
        };

        let remaining = expires_at - now;
        let min = chrono::Duration::from_std(min_ttl).unwrap_or(chrono::Duration::seconds(60));
        if remaining < min {
            return Err(ScopeError::ExpiryTooSoon {
                remaining_secs: remaining.num_seconds(),
                min_secs: min.num_seconds(),
            });
        }

        Ok(Self {
            token,
            created_at,
            expires_at,
            extra: fields,
        })
    }

    /// Time left until expiry, zero if already past
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).to_std().unwrap_or(Duration::ZERO)
    }

    /// Payload merged into the client Context
    pub fn context_fields(&self) -> Map<String, Value> {
        self.extra
            .iter()
            .filter(|(k, _)| !CREDENTIAL_FIELDS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Token prefix safe to put in logs
    pub fn redacted_token(&self) -> String {
        redact(&self.token)
    }
}

/// Show at most the first 6 characters of a secret
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{}…", prefix)
}

/// Delay until the refresh timer should fire: `(expires_at - now) - red_line`,
/// clamped to zero when the red line is already behind us.
pub fn refresh_delay(expires_at: DateTime<Utc>, now: DateTime<Utc>, red_line: Duration) -> Duration {
    let until_expiry = expires_at - now;
    let red_line = chrono::Duration::from_std(red_line).unwrap_or(chrono::Duration::zero());
    (until_expiry - red_line).to_std().unwrap_or(Duration::ZERO)
}

fn parse_timestamp(field: &str, value: &Value) -> Result<DateTime<Utc>> {
    let parsed = match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok(),
        Value::Number(n) => n.as_i64().and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    };
    parsed.ok_or_else(|| ScopeError::MalformedSession(format!("Unreadable {}: {}", field, value)))
}

/// Article-prefixed JSON type for error messages ("an array", "null")
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
