//! In-process backend.
//!
//! Values live for the lifetime of the process. Suitable for tests and for
//! single-process deployments; nothing is shared across workers.

use crate::backend::ServersideBackend;
use crate::error::StoreError;
use chrono::{DateTime, TimeDelta, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now > at)
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    uid: String,
    timeout: Option<TimeDelta>,
    entries: RwLock<HashMap<String, Entry>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::named("MemoryBackend")
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn named(uid: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            timeout: None,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entries written from now on expire after `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = TimeDelta::from_std(timeout).ok();
        self
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().unwrap_or_else(|p| p.into_inner()).clear();
    }
}

impl ServersideBackend for MemoryBackend {
    fn uid(&self) -> String {
        self.uid.clone()
    }

    fn get(&self, key: &str, ignore_expired: bool) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        let Some(entry) = entries.get(key) else {
            return Ok(None);
        };
        if !ignore_expired && entry.is_expired(Utc::now()) {
            return Ok(None);
        }
        Ok(Some(entry.value.clone()))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let expires_at = self.timeout.map(|t| Utc::now() + t);
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StoreError> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        Ok(entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(Utc::now())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_and_has() {
        let backend = MemoryBackend::new();
        assert!(!backend.has("k").expect("has should succeed"));
        backend.set("k", &json!({"a": 1})).expect("set should succeed");
        assert!(backend.has("k").expect("has should succeed"));
        assert_eq!(
            backend.get("k", false).expect("get should succeed"),
            Some(json!({"a": 1}))
        );
        assert_eq!(backend.len(), 1);
        backend.clear();
        assert!(backend.is_empty());
    }

    #[test]
    fn expired_entries_are_readable_only_when_ignoring_expiry() {
        let backend = MemoryBackend::new().with_timeout(Duration::ZERO);
        backend.set("k", &json!(1)).expect("set should succeed");
        std::thread::sleep(Duration::from_millis(5));

        assert!(!backend.has("k").expect("has should succeed"));
        assert_eq!(backend.get("k", false).expect("get should succeed"), None);
        assert_eq!(
            backend.get("k", true).expect("get should succeed"),
            Some(json!(1))
        );
        assert!(backend.honors_ignore_expired());
    }
}
