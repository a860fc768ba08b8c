//! One-way digest for password-like fields.
//!
//! The digest is a single unsalted SHA-256 with no work factor. It is kept this way so
//! stored values stay comparable with existing data; it is not suitable for production
//! credential storage.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of `value`.
pub fn hash(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Recompute the digest of `plain_text` and compare it with `hashed_value`.
pub fn is_same_hashed(plain_text: &str, hashed_value: &str) -> bool {
    hash(plain_text) == hashed_value
}

/// Hash a JSON value as it would be written. Strings are hashed as-is, other values by
/// their JSON text; null stays null.
pub fn hash_value(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(s) => Value::String(hash(s)),
        other => Value::String(hash(&other.to_string())),
    }
}
