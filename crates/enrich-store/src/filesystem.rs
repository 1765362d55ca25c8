//! Filesystem backend: one JSON file per key.
//!
//! File names are the SHA-256 of the key, so client-echoed keys never
//! become paths. Each file holds `{"expires_at": <rfc3339|null>, "value": ..}`
//! and is replaced atomically (write tmp, fsync, rename), which keeps
//! concurrent readers in other processes from ever seeing a partial entry.

use crate::backend::ServersideBackend;
use crate::error::StoreError;
use crate::key::hex_lower;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::debug;

pub const DEFAULT_CACHE_DIR: &str = "file_system_backend";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
    value: Value,
}

#[derive(Debug, Clone)]
pub struct FileSystemBackend {
    dir: PathBuf,
    timeout: Option<TimeDelta>,
}

impl FileSystemBackend {
    /// Backend rooted at `dir`, with the default timeout.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            timeout: TimeDelta::from_std(DEFAULT_TIMEOUT).ok(),
        }
    }

    /// A zero timeout means entries never expire.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = if timeout.is_zero() {
            None
        } else {
            TimeDelta::from_std(timeout).ok()
        };
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        self.dir.join(hex_lower(&digest))
    }

    fn read_entry(&self, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let path = self.entry_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::Io(format!("{}: {e}", path.display()))),
        };
        let entry = serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(entry))
    }

    fn write_entry(&self, key: &str, entry: &StoredEntry) -> Result<(), StoreError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| StoreError::Io(format!("{}: {e}", self.dir.display())))?;
        let path = self.entry_path(key);
        let bytes = serde_json::to_vec(entry).map_err(|e| StoreError::Serialize(e.to_string()))?;

        let tmp_path = tmp_write_path(&path);
        let write_result = (|| -> Result<(), StoreError> {
            let mut file = File::create(&tmp_path)
                .map_err(|e| StoreError::Io(format!("{}: {e}", tmp_path.display())))?;
            file.write_all(&bytes)
                .map_err(|e| StoreError::Io(format!("{}: {e}", tmp_path.display())))?;
            file.sync_all()
                .map_err(|e| StoreError::Io(format!("{}: {e}", tmp_path.display())))?;
            Ok(())
        })();

        if let Err(error) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(error);
        }

        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            StoreError::Io(format!("{} -> {}: {e}", tmp_path.display(), path.display()))
        })
    }
}

impl Default for FileSystemBackend {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_DIR)
    }
}

impl ServersideBackend for FileSystemBackend {
    fn uid(&self) -> String {
        format!("FileSystemBackend:{}", self.dir.display())
    }

    fn get(&self, key: &str, ignore_expired: bool) -> Result<Option<Value>, StoreError> {
        let Some(entry) = self.read_entry(key)? else {
            return Ok(None);
        };
        if !ignore_expired && is_expired(&entry, Utc::now()) {
            debug!(key, "entry expired");
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn set(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        let entry = StoredEntry {
            expires_at: self.timeout.map(|t| Utc::now() + t),
            value: value.clone(),
        };
        self.write_entry(key, &entry)?;
        debug!(key, dir = %self.dir.display(), "entry written");
        Ok(())
    }

    fn has(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self
            .read_entry(key)?
            .is_some_and(|entry| !is_expired(&entry, Utc::now())))
    }
}

fn is_expired(entry: &StoredEntry, now: DateTime<Utc>) -> bool {
    entry.expires_at.is_some_and(|at| now > at)
}

fn tmp_write_path(path: &Path) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let mut tmp: OsString = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp.{}.{}.{}", std::process::id(), unique, seq));
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct TempDirGuard {
        path: PathBuf,
    }

    impl TempDirGuard {
        fn new(prefix: &str) -> Self {
            let mut path = std::env::temp_dir();
            let nonce = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock should be monotonic after unix epoch")
                .as_nanos();
            path.push(format!("enrich-store-{prefix}-{}-{nonce}", std::process::id()));
            fs::create_dir_all(&path).expect("temp test directory should be creatable");
            Self { path }
        }

        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for TempDirGuard {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.path);
        }
    }

    #[test]
    fn values_survive_a_new_backend_instance() {
        let temp = TempDirGuard::new("persist");
        let first = FileSystemBackend::new(temp.path().join("cache"));
        first
            .set("abc", &json!({"rows": [1, 2, 3]}))
            .expect("set should succeed");

        let second = FileSystemBackend::new(temp.path().join("cache"));
        assert_eq!(first.uid(), second.uid());
        assert!(second.has("abc").expect("has should succeed"));
        assert_eq!(
            second.get("abc", false).expect("get should succeed"),
            Some(json!({"rows": [1, 2, 3]}))
        );
        assert_eq!(second.get("missing", false).expect("get should succeed"), None);
    }

    #[test]
    fn keys_never_become_paths() {
        let temp = TempDirGuard::new("paths");
        let backend = FileSystemBackend::new(temp.path());
        backend
            .set("../escape", &json!(1))
            .expect("set should succeed");
        let names: Vec<String> = fs::read_dir(temp.path())
            .expect("dir should be readable")
            .map(|e| e.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].len(), 64);
    }

    #[test]
    fn expired_entries_are_hidden_unless_ignored() {
        let temp = TempDirGuard::new("expiry");
        let backend = FileSystemBackend::new(temp.path());
        let stale = StoredEntry {
            expires_at: Some(Utc::now() - TimeDelta::seconds(10)),
            value: json!("old"),
        };
        backend.write_entry("k", &stale).expect("write should succeed");

        assert!(!backend.has("k").expect("has should succeed"));
        assert_eq!(backend.get("k", false).expect("get should succeed"), None);
        assert_eq!(
            backend.get("k", true).expect("get should succeed"),
            Some(json!("old"))
        );
    }

    #[test]
    fn zero_timeout_never_expires() {
        let temp = TempDirGuard::new("forever");
        let backend = FileSystemBackend::new(temp.path()).with_timeout(Duration::ZERO);
        backend.set("k", &json!(true)).expect("set should succeed");
        let raw = fs::read(backend.entry_path("k")).expect("entry file should exist");
        let stored: Value = serde_json::from_slice(&raw).expect("entry should be json");
        assert_eq!(stored["expires_at"], Value::Null);
    }

    #[test]
    fn corrupt_entries_are_reported() {
        let temp = TempDirGuard::new("corrupt");
        let backend = FileSystemBackend::new(temp.path());
        fs::write(backend.entry_path("k"), b"not json").expect("fixture should be writable");
        assert!(matches!(
            backend.get("k", false),
            Err(StoreError::Corrupt { .. })
        ));
    }
}
