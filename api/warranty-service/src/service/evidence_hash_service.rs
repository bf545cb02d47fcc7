use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Rebuilds every object with its keys in ascending order so the compact
/// serialization is independent of construction order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries = map.iter().collect::<Vec<_>>();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut ordered = Map::new();
            for (key, inner) in entries {
                ordered.insert(key.clone(), canonicalize(inner));
            }
            Value::Object(ordered)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}

pub fn canonical_string<T: Serialize>(value: &T) -> Result<String, String> {
    let raw = serde_json::to_value(value).map_err(|e| format!("canonical conversion failed: {e}"))?;
    serde_json::to_string(&canonicalize(&raw)).map_err(|e| format!("canonical serialization failed: {e}"))
}

/// SHA-256 hex of the canonical JSON form of `value`.
pub fn content_hash<T: Serialize>(value: &T) -> Result<String, String> {
    Ok(sha256_hex(&canonical_string(value)?))
}

pub fn sha256_hex(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn hmac_sha256_hex(input: &str, secret: &str) -> Result<String, String> {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
        .map_err(|e| format!("hmac init failed: {e}"))?;
    mac.update(input.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}
