//! Coordination store backends.
//!
//! - [`MemoryStore`]: in-process map shared through an `Arc`. Supports an
//!   atomic compare-and-set, so the order arbiter becomes an exact mutex on it.
//! - [`FileStore`]: one JSON file per key under a directory. Each write lands
//!   through a temp file and a rename, so a key is last-write-wins across
//!   processes and readers never observe a half-written value. There is no
//!   atomic read-modify-write across processes.

use crate::traits::{CasOutcome, CoordinationStore};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::warn;

/// Errors from coordination store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// IO error reading/writing a key.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Key cannot be mapped onto the backend.
    #[error("Invalid store key: {0}")]
    InvalidKey(String),
}

/// Reads `key` as `T`, returning `default` when the key is absent or holds
/// something that does not parse as `T`.
///
/// # Errors
/// Returns an error only when the backend itself fails.
pub async fn get_or<T>(store: &dyn CoordinationStore, key: &str, default: T) -> Result<T, StoreError>
where
    T: DeserializeOwned + Send,
{
    match store.get(key).await? {
        None => Ok(default),
        Some(value) => match serde_json::from_value(value) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!("Malformed value under {}, using default: {}", key, e);
                Ok(default)
            }
        },
    }
}

/// Serializes `value` and stores it under `key`.
///
/// # Errors
/// Returns an error if serialization or the backend write fails.
pub async fn put<T>(store: &dyn CoordinationStore, key: &str, value: &T) -> Result<(), StoreError>
where
    T: Serialize + Sync + ?Sized,
{
    let value = serde_json::to_value(value)?;
    store.set(key, value).await
}

// =============================================================================
// Memory Store
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.values.write().insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.values.write().remove(key);
        Ok(())
    }

    async fn compare_and_set(
        &self,
        key: &str,
        expected: Option<&Value>,
        new: Value,
    ) -> Result<CasOutcome, StoreError> {
        let mut values = self.values.write();
        if values.get(key) != expected {
            return Ok(CasOutcome::Conflict);
        }
        values.insert(key.to_string(), new);
        Ok(CasOutcome::Swapped)
    }
}

// =============================================================================
// File Store
// =============================================================================

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Directory-backed store shared by every process pointed at the same path.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{key}.json")))
    }
}

#[async_trait]
impl CoordinationStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        let tmp = self.dir.join(format!(
            ".{key}.{}.{}.tmp",
            std::process::id(),
            TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let bytes = serde_json::to_vec(&value)?;
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
