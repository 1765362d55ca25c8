//! Content-derived cache keys and the server-side reference wire format.
//!
//! A memoized output is stored under
//!
//! ```text
//! sha256(canonical_json([function, "{id}.{prop}", arg..., session?]))
//! ```
//!
//! so identical logical inputs map to the same key across restarts. The
//! client receives `SERVERSIDE_{"backend_uid":..,"key":..}` in place of the
//! value.

use crate::backend::BackendRegistry;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

pub const REFERENCE_PREFIX: &str = "SERVERSIDE_";

/// Inputs of a content-derived key.
#[derive(Debug, Clone, Copy)]
pub struct KeyMaterial<'a> {
    pub function: &'a str,
    /// `"{id}.{property}"` of the output being stored.
    pub output: &'a str,
    /// `None` excludes the arguments (arg check disabled).
    pub args: Option<&'a [Value]>,
    pub session_id: Option<&'a str>,
}

impl KeyMaterial<'_> {
    pub fn cache_key(&self) -> String {
        let mut parts = vec![
            Value::String(self.function.to_string()),
            Value::String(self.output.to_string()),
        ];
        if let Some(args) = self.args {
            parts.extend(args.iter().cloned());
        }
        if let Some(session) = self.session_id {
            parts.push(Value::String(session.to_string()));
        }
        let bytes = canonical_json_bytes(&Value::Array(parts));
        hex_lower(&Sha256::digest(bytes))
    }
}

/// A fresh random key for non-memoized writes.
pub fn random_key() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Pointer to a value held by a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServersideRef {
    pub backend_uid: String,
    pub key: String,
}

impl ServersideRef {
    pub fn new(backend_uid: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            backend_uid: backend_uid.into(),
            key: key.into(),
        }
    }

    /// The string sent to the client.
    pub fn encode(&self) -> String {
        let body = canonical_json_bytes(&serde_json::json!({
            "backend_uid": self.backend_uid,
            "key": self.key,
        }));
        format!("{REFERENCE_PREFIX}{}", String::from_utf8_lossy(&body))
    }

    /// `Ok(None)` for values that are not references at all.
    pub fn detect(value: &Value) -> Result<Option<Self>, StoreError> {
        let Some(text) = value.as_str() else {
            return Ok(None);
        };
        let Some(body) = text.strip_prefix(REFERENCE_PREFIX) else {
            return Ok(None);
        };
        serde_json::from_str(body)
            .map(Some)
            .map_err(|e| StoreError::MalformedReference(format!("{text}: {e}")))
    }

    /// Write `value` and return the reference to it.
    pub fn store(
        registry: &BackendRegistry,
        backend_uid: Option<&str>,
        key: impl Into<String>,
        value: &Value,
    ) -> Result<Self, StoreError> {
        let backend = registry.resolve(backend_uid)?;
        let key = key.into();
        backend.set(&key, value)?;
        Ok(Self::new(backend.uid(), key))
    }

    /// Read the referenced value, past expiry where the backend allows it.
    pub fn fetch(&self, registry: &BackendRegistry) -> Result<Option<Value>, StoreError> {
        let backend = registry.resolve(Some(&self.backend_uid))?;
        backend.get(&self.key, true)
    }
}

/// JSON with object keys sorted at every level.
pub fn canonical_json_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Array(items) => {
            let mut out = vec![b'['];
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                out.extend(canonical_json_bytes(item));
            }
            out.push(b']');
            out
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            let mut out = vec![b'{'];
            for (idx, (key, item)) in entries.into_iter().enumerate() {
                if idx > 0 {
                    out.push(b',');
                }
                out.extend(canonical_json_bytes(&Value::String(key.clone())));
                out.push(b':');
                out.extend(canonical_json_bytes(item));
            }
            out.push(b'}');
            out
        }
        scalar => scalar.to_string().into_bytes(),
    }
}

pub(crate) fn hex_lower(bytes: &[u8]) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}
