//! Memoization keys.
//!
//! A key is the canonical JSON encoding of `[identity, positional_args]`:
//! object keys sorted, integer-valued floats collapsed to integers, and
//! NaN/Infinity rejected. Two calls with equal identity and equal positional
//! arguments always produce byte-identical keys. Named/tuning arguments
//! are never part of the key, so callers must keep them out of `args`.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::StorageError;
use crate::storage_traits::StorageResult;

/// Deterministic encoding of a function identity plus positional arguments.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemoKey {
    canonical: String,
    digest: String,
}

impl MemoKey {
    /// Build a key from a stable function identity and its positional
    /// arguments (anything that serializes to JSON).
    pub fn new<A: Serialize + ?Sized>(identity: &str, args: &A) -> StorageResult<Self> {
        let args = serde_json::to_value(args)?;
        let raw = serde_json::Value::Array(vec![serde_json::Value::from(identity), args]);
        let canonical = canonical_json(&raw)?;
        let digest = hex::encode(Sha256::digest(canonical.as_bytes()));
        Ok(Self { canonical, digest })
    }

    /// The canonical serialized bytes of the key.
    pub fn as_bytes(&self) -> &[u8] {
        self.canonical.as_bytes()
    }

    /// The canonical serialized key as text.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// SHA-256 hex digest of the canonical form; used as the storage id.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Short form (first 12 hex chars of the digest).
    pub fn short(&self) -> &str {
        &self.digest[..12.min(self.digest.len())]
    }
}

impl fmt::Display for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl fmt::Debug for MemoKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MemoKey({})", self.short())
    }
}

fn sort_keys(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys(v));
                }
            }
            serde_json::Value::Object(sorted)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

fn normalize_value(value: &serde_json::Value) -> StorageResult<serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => {
            let mut normalized = serde_json::Map::new();
            for (k, v) in map {
                normalized.insert(k.clone(), normalize_value(v)?);
            }
            Ok(serde_json::Value::Object(normalized))
        }
        serde_json::Value::Array(arr) => Ok(serde_json::Value::Array(
            arr.iter().map(normalize_value).collect::<StorageResult<Vec<_>>>()?,
        )),
        serde_json::Value::Number(n) if !(n.is_i64() || n.is_u64()) => match n.as_f64() {
            Some(f) if !f.is_finite() => Err(StorageError::InvalidKey(
                "NaN/Infinity not permitted in key arguments".to_string(),
            )),
            Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
                Ok(serde_json::Value::Number(serde_json::Number::from(f as i64)))
            }
            _ => Ok(value.clone()),
        },
        other => Ok(other.clone()),
    }
}

/// Normalize numbers, sort object keys, and emit compact JSON.
pub fn canonical_json(value: &serde_json::Value) -> StorageResult<String> {
    let normalized = normalize_value(value)?;
    Ok(serde_json::to_string(&sort_keys(&normalized))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn same_call_same_key() {
        let a = MemoKey::new("build_and_execute", &json!(["apps/sobel", null, 0, false])).unwrap();
        let b = MemoKey::new("build_and_execute", &json!(["apps/sobel", null, 0, false])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn identity_participates_in_key() {
        let a = MemoKey::new("build_and_execute", &json!([1])).unwrap();
        let b = MemoKey::new("execute_only", &json!([1])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn argument_order_matters() {
        let a = MemoKey::new("f", &json!([1, 2])).unwrap();
        let b = MemoKey::new("f", &json!([2, 1])).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn object_field_order_does_not_matter() {
        let a = MemoKey::new("f", &json!({"dir": "x", "rep": 1})).unwrap();
        let b = MemoKey::new("f", &json!({"rep": 1, "dir": "x"})).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn integer_valued_floats_collapse() {
        let a = MemoKey::new("f", &json!([1.0])).unwrap();
        let b = MemoKey::new("f", &json!([1])).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.canonical(), r#"["f",[1]]"#);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let key = MemoKey::new("f", &json!([])).unwrap();
        assert_eq!(key.digest().len(), 64);
        assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(key.short().len(), 12);
    }
}
