//! Backend contract and registry.

use crate::error::StoreError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// A key-value store for server-side values.
///
/// Implementations must tolerate concurrent `get`/`set`/`has` from many
/// request threads.
pub trait ServersideBackend: Send + Sync + fmt::Debug {
    /// Unique within a [`BackendRegistry`]. Embedded in references sent to
    /// the client, so it must be stable across restarts.
    fn uid(&self) -> String;

    /// Fetch a value. With `ignore_expired`, backends that can still read an
    /// expired entry return it (see [`Self::honors_ignore_expired`]).
    fn get(&self, key: &str, ignore_expired: bool) -> Result<Option<Value>, StoreError>;

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError>;

    /// Whether an unexpired entry exists.
    fn has(&self, key: &str) -> Result<bool, StoreError>;

    /// Whether `get(.., ignore_expired = true)` can return expired entries.
    /// Backends that evict on expiry (e.g. networked caches with native TTLs)
    /// answer `false`; their timeout must then outlive any user session.
    fn honors_ignore_expired(&self) -> bool {
        true
    }
}

/// Backends by uid, plus the default one.
#[derive(Debug, Clone)]
pub struct BackendRegistry {
    default_uid: String,
    backends: BTreeMap<String, Arc<dyn ServersideBackend>>,
}

impl BackendRegistry {
    pub fn new(default: Arc<dyn ServersideBackend>) -> Self {
        let default_uid = default.uid();
        let mut backends = BTreeMap::new();
        backends.insert(default_uid.clone(), default);
        Self {
            default_uid,
            backends,
        }
    }

    /// Register an additional backend. Uids must be unique.
    pub fn with_backend(mut self, backend: Arc<dyn ServersideBackend>) -> Result<Self, StoreError> {
        let uid = backend.uid();
        if self.backends.contains_key(&uid) {
            return Err(StoreError::DuplicateBackend(uid));
        }
        self.backends.insert(uid, backend);
        Ok(self)
    }

    pub fn default_uid(&self) -> &str {
        &self.default_uid
    }

    pub fn default_backend(&self) -> &Arc<dyn ServersideBackend> {
        // The default is inserted on construction and never removed.
        &self.backends[&self.default_uid]
    }

    /// Look up a backend; `None` selects the default.
    pub fn resolve(&self, uid: Option<&str>) -> Result<&Arc<dyn ServersideBackend>, StoreError> {
        match uid {
            None => Ok(self.default_backend()),
            Some(uid) => self
                .backends
                .get(uid)
                .ok_or_else(|| StoreError::UnknownBackend(uid.to_string())),
        }
    }

    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }
}
