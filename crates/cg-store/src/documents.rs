//! Typed document access with per-path locking and bounded store calls.
//!
//! A logical read-modify-write of one document looks like:
//!
//! ```rust,ignore
//! let _guard = documents.lock(KEYS_PATH).await;
//! let mut keys: HashMap<String, String> = documents.load(KEYS_PATH).await?;
//! keys.insert(identity, key);
//! documents.save(KEYS_PATH, &keys).await?;
//! ```
//!
//! Locks are in-process and keyed by the normalized path, so two
//! operations on `/keys` serialize while `/keys` and `/ratelimits` proceed
//! independently. Operations that touch several documents must acquire their
//! locks in a fixed order.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::warn;

use crate::{path, DocumentStore, Result, StoreError};

/// Registry of exclusive locks, one per document path
#[derive(Default)]
pub struct PathLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `path`
    pub async fn acquire(&self, path: &str) -> PathGuard {
        let path = path::normalize(path);
        let mutex = self.locks.entry(path.clone()).or_default().clone();
        let guard = mutex.lock_owned().await;
        PathGuard { path, _guard: guard }
    }

    /// Number of distinct paths ever locked
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Held for the duration of a read-modify-write; released on drop
#[must_use = "the path is unlocked as soon as the guard is dropped"]
pub struct PathGuard {
    path: String,
    _guard: OwnedMutexGuard<()>,
}

impl PathGuard {
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Shared handle to the document store used by every admission component
#[derive(Clone)]
pub struct Documents {
    store: Arc<dyn DocumentStore>,
    locks: Arc<PathLocks>,
    timeout: Duration,
}

impl Documents {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self {
            store,
            locks: Arc::new(PathLocks::new()),
            timeout,
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn lock(&self, path: &str) -> PathGuard {
        self.locks.acquire(path).await
    }

    /// Raw subtree, `None` when the path does not exist
    pub async fn get_raw(&self, path: &str) -> Result<Option<Value>> {
        match self.bounded(path, self.store.get(path)).await {
            Ok(Value::Null) => Ok(None),
            Ok(value) => Ok(Some(value)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Typed document, `None` when absent
    pub async fn load_optional<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get_raw(path).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed document; an absent path bootstraps as `T::default()`
    pub async fn load<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        Ok(self.load_optional(path).await?.unwrap_or_default())
    }

    /// Overwrite the whole document at `path`
    pub async fn save<T: Serialize + ?Sized>(&self, path: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.bounded(path, self.store.set(path, value)).await
    }

    pub async fn remove(&self, path: &str) -> Result<()> {
        self.bounded(path, self.store.delete(path)).await
    }

    async fn bounded<T>(
        &self,
        path: &str,
        call: impl std::future::Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    path = %path,
                    backend = self.store.name(),
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Document store call timed out"
                );
                Err(StoreError::Timeout(self.timeout))
            }
        }
    }
}
