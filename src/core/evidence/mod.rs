// src/core/evidence/mod.rs

//! Tamper-evident records: the hash-chained audit ledger, content seals and
//! the per-run evidence collector.
//!
//! Everything here shares one hashing primitive: SHA-256 over the canonical
//! (recursively key-sorted, compact) JSON form of a record, with the record's
//! own `hash` field removed before hashing.

pub mod collector;
pub mod ledger;
pub mod seal;

use crate::core::error::{ChainFault, IntegrityError};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// `previous_hash` of the first record in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

pub const HASH_ALGORITHM: &str = "sha256";

/// Rebuilds every object with its keys in sorted order.
///
/// Sorting explicitly keeps the output stable even if `serde_json` is built
/// with `preserve_order` by another crate in the dependency graph.
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, canonicalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&canonicalize(serde_json::to_value(value)?))
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hash of a JSON value with any top-level `hash` field excluded.
pub fn record_hash_of_value(mut value: Value) -> Result<String, serde_json::Error> {
    if let Value::Object(map) = &mut value {
        map.remove("hash");
    }
    let canonical = serde_json::to_string(&canonicalize(value))?;
    Ok(sha256_hex(canonical.as_bytes()))
}

/// Hash of any serializable record, excluding its own `hash` field.
pub fn record_hash<T: Serialize>(record: &T) -> Result<String, serde_json::Error> {
    record_hash_of_value(serde_json::to_value(record)?)
}

/// A record that participates in a hash chain.
pub trait ChainLinked: Serialize {
    fn previous_hash(&self) -> &str;
    fn hash(&self) -> &str;
}

/// Checks one record against the hash its predecessor ended with.
pub(crate) fn check_link(value: &Value, expected_previous: &str) -> Result<String, ChainFault> {
    let field = |name: &str| -> Result<String, ChainFault> {
        value
            .get(name)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ChainFault::Malformed(format!("missing string field '{name}'")))
    };
    let stored = field("hash")?;
    let previous = field("previous_hash")?;

    if previous != expected_previous {
        return Err(ChainFault::BrokenLink {
            expected: expected_previous.to_string(),
            found: previous,
        });
    }
    let computed = record_hash_of_value(value.clone()).map_err(|e| ChainFault::Malformed(e.to_string()))?;
    if computed != stored {
        return Err(ChainFault::HashMismatch { stored, computed });
    }
    Ok(stored)
}

/// Verifies an in-memory chain, e.g. an evidence item's chain of custody.
pub fn verify_linked<T: ChainLinked>(records: &[T]) -> Result<(), IntegrityError> {
    let mut expected = GENESIS_HASH.to_string();
    for (index, record) in records.iter().enumerate() {
        let fail = |fault| IntegrityError::Chain {
            record: index + 1,
            byte_offset: 0,
            fault,
        };
        let value = serde_json::to_value(record).map_err(|e| fail(ChainFault::Malformed(e.to_string())))?;
        expected = check_link(&value, &expected).map_err(fail)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"d": [ {"z": 1, "y": 2} ], "c": null}});
        assert_eq!(
            canonical_json(&value).unwrap(),
            r#"{"a":{"c":null,"d":[{"y":2,"z":1}]},"b":1}"#
        );
    }

    #[test]
    fn record_hash_ignores_own_hash_field() {
        let without = json!({"action": "scan", "previous_hash": GENESIS_HASH});
        let with = json!({"action": "scan", "previous_hash": GENESIS_HASH, "hash": "whatever"});
        assert_eq!(record_hash(&without).unwrap(), record_hash(&with).unwrap());
        assert_eq!(record_hash(&without).unwrap().len(), 64);
    }

    #[test]
    fn genesis_is_sixty_four_zeros() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }
}
