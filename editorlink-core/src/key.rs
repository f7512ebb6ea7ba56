//! Coalescing key derivation
//!
//! A key is a pure function of the request fields that decide what the
//! editor actually does. Incidental fields such as request ids and
//! timestamps never take part.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::CoalesceError;
use crate::path_utils::join_asset_path;

/// Payload fields that never influence the editor operation
const INCIDENTAL_FIELDS: &[&str] = &["requestId", "timestamp", "timeoutMs"];

/// Deterministic identifier of a logical editor operation
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoalesceKey(String);

impl CoalesceKey {
    /// Wrap an already-derived key. Rejects empty keys.
    pub fn new(raw: impl Into<String>) -> Result<Self, CoalesceError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(CoalesceError::invalid_key("key must not be empty"));
        }
        Ok(Self(raw))
    }

    /// Key for creating a named asset under a save path, e.g.
    /// `blueprint_create:/Game/Foo/Bar`.
    ///
    /// Different create actions on the same path are different operations,
    /// so the action is part of the key.
    pub fn for_asset(action: &str, save_path: &str, name: &str) -> Result<Self, CoalesceError> {
        if action.trim().is_empty() {
            return Err(CoalesceError::invalid_key("action must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(CoalesceError::invalid_key("asset name must not be empty"));
        }
        Self::new(format!("{}:{}", action, join_asset_path(save_path, name)))
    }

    /// Key for executing an editor script; surrounding whitespace is ignored
    pub fn for_script(script: &str) -> Result<Self, CoalesceError> {
        let script = script.trim();
        if script.is_empty() {
            return Err(CoalesceError::invalid_key("script must not be empty"));
        }
        Self::new(format!("script:{}", script))
    }

    /// Key for a read-only query: the action plus its canonical payload
    pub fn for_query(action: &str, payload: &Value) -> Result<Self, CoalesceError> {
        if action.trim().is_empty() {
            return Err(CoalesceError::invalid_key("action must not be empty"));
        }
        let canonical = match payload {
            Value::Object(fields) => {
                let relevant: Map<String, Value> = fields
                    .iter()
                    .filter(|(k, _)| !INCIDENTAL_FIELDS.contains(&k.as_str()))
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                canonicalize(&Value::Object(relevant))
            }
            other => canonicalize(other),
        };
        Self::new(format!("{}:{}", action, canonical))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CoalesceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CoalesceKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Serialize with object keys in sorted order at every depth
fn canonicalize(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(fields) => {
                let mut keys: Vec<&String> = fields.keys().collect();
                keys.sort();
                let mut out = Map::new();
                for k in keys {
                    out.insert(k.clone(), sorted(&fields[k.as_str()]));
                }
                Value::Object(out)
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}
