//! Filter fingerprinting
//!
//! A fingerprint is the hex SHA-1 of the canonical JSON form of a
//! [`FilterSpec`]. It is the only key used by the server result cache and the
//! client stats cache, so it must be pure and independent of key order.
//!
//! # Algorithm
//!
//! 1. Canonicalize the filter (id lists sorted and de-duplicated)
//! 2. Serialize to JSON with sorted keys and no whitespace
//! 3. SHA-1 the UTF-8 bytes
//! 4. Render as 40 lowercase hex characters

use crate::model::FilterSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use std::fmt;

/// Fixed-length filter hash (40 hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const LEN: usize = 40;

    /// Wrap a hash received over the wire
    pub fn from_wire(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint a fetch filter
///
/// # Examples
///
/// ```
/// use tally_common::{fingerprint, FilterSpec};
///
/// let a = FilterSpec::for_users(["u1", "u2"]);
/// let b = FilterSpec::for_users(["u2", "u1"]);
/// assert_eq!(fingerprint(&a), fingerprint(&b));
/// assert_eq!(fingerprint(&a).as_str().len(), 40);
/// ```
pub fn fingerprint(spec: &FilterSpec) -> Fingerprint {
    let canonical = canonical_filter_json(spec);

    let mut hasher = Sha1::new();
    hasher.update(canonical.as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Canonical JSON text of a filter (what gets hashed)
pub fn canonical_filter_json(spec: &FilterSpec) -> String {
    // FilterSpec only holds strings, numbers, bools and timestamps
    let value = serde_json::to_value(spec.canonical()).unwrap_or(Value::Null);
    to_canonical_json(&value)
}

/// Convert JSON to canonical form (sorted keys, no whitespace)
///
/// # Examples
///
/// ```
/// use tally_common::fingerprint::to_canonical_json;
/// use serde_json::json;
///
/// let json = json!({"z": 3, "a": 1, "m": 2});
/// assert_eq!(to_canonical_json(&json), r#"{"a":1,"m":2,"z":3}"#);
/// ```
pub fn to_canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let items: Vec<String> = pairs
                .into_iter()
                .map(|(k, v)| format!("{}:{}", quote(k), to_canonical_json(v)))
                .collect();
            format!("{{{}}}", items.join(","))
        }
        Value::Array(arr) => {
            let items: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", items.join(","))
        }
        Value::String(s) => quote(s),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

fn quote(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| format!("\"{}\"", s))
}
