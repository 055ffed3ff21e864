//! Canonical JSON and content fingerprints
//!
//! Object keys are sorted recursively and the value is re-serialized
//! compactly, with whole-valued floats written as integers. Payloads that
//! differ only in key order, whitespace or number spelling map to
//! the same bytes and the same SHA-256.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

/// Parse `raw` and return its canonical serialization
pub fn canonical_json(raw: &str) -> Result<String, serde_json::Error> {
    let value: Value = serde_json::from_str(raw)?;
    canonical_string(value)
}

/// Canonical serialization of an already-parsed value
pub fn canonical_string(value: Value) -> Result<String, serde_json::Error> {
    serde_json::to_string(&normalize_json_value(value))
}

/// Lowercase hex SHA-256
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// Sorted explicitly rather than relying on serde_json's default BTreeMap:
// a dependency enabling `preserve_order` would otherwise change fingerprints.
fn normalize_json_value(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map
                .into_iter()
                .map(|(k, v)| (k, normalize_json_value(v)))
                .collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, v);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(normalize_json_value).collect()),
        Value::Number(n) => Value::Number(normalize_number(n)),
        other => other,
    }
}

/// Whole floats collapse to integers, so `1`, `1.0` and `1e0` hash alike.
/// Only values below 2^53 are folded; larger floats keep their float form.
fn normalize_number(n: Number) -> Number {
    const EXACT: f64 = 9_007_199_254_740_992.0;
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() < EXACT => Number::from(f as i64),
        _ => n,
    }
}
