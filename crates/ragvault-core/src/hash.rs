//! Content fingerprints for row deduplication.
//!
//! A row's hash is the SHA-256 of its canonical JSON form: compact
//! separators, object keys sorted by byte order at every nesting level,
//! arrays left in order, numbers and strings in serde_json's standard
//! formatting. Two rows that differ only in field order therefore hash
//! identically, while any change to a key or value changes the digest.
//!
//! ```rust
//! use ragvault_core::hash::hash_value;
//! use serde_json::json;
//!
//! let a = hash_value(&json!({"name": "ada", "year": 1815}));
//! let b = hash_value(&json!({"year": 1815, "name": "ada"}));
//! assert_eq!(a, b);
//! assert_eq!(a.len(), 64);
//! ```

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{EngineError, Result};

/// Length of a hex-encoded row hash.
pub const HASH_HEX_LEN: usize = 64;

/// Rebuild `value` with every object's keys inserted in sorted order.
///
/// Insertion order is the serialization order for both map backends
/// serde_json supports, so the result renders canonically either way.
pub fn canonical_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonical_value(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonical_value).collect()),
        other => other.clone(),
    }
}

/// Canonical compact JSON text for `value`. This is exactly what gets hashed.
pub fn canonicalize(value: &Value) -> String {
    canonical_value(value).to_string()
}

/// SHA-256 hex digest of the canonical form of `value`.
pub fn hash_value(value: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonicalize(value).as_bytes());
    hex::encode(hasher.finalize())
}

/// Hash any serializable row.
///
/// Fails with [`EngineError::Serialization`] when the value has no JSON
/// representation, e.g. a map keyed by non-strings.
pub fn hash_row<T: Serialize + ?Sized>(row: &T) -> Result<String> {
    let value = serde_json::to_value(row).map_err(|e| EngineError::Serialization(e.to_string()))?;
    Ok(hash_value(&value))
}

/// True if `s` looks like a digest produced by this module.
pub fn is_row_hash(s: &str) -> bool {
    s.len() == HASH_HEX_LEN && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
