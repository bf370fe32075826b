//! In-memory document store (tests and development)

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::{path, DocumentStore, Result, StoreError};

pub struct MemoryStore {
    root: RwLock<Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            root: RwLock::new(Value::Object(Map::new())),
        }
    }

    /// Start from an existing document
    pub fn with_document(root: Value) -> Self {
        Self {
            root: RwLock::new(root),
        }
    }

    /// Copy of the whole document
    pub fn snapshot(&self) -> Value {
        self.root.read().clone()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Value> {
        let root = self.root.read();
        path::lookup(&root, path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let mut root = self.root.write();
        path::assign(&mut root, path, value)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut root = self.root.write();
        path::remove(&mut root, path);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_get_missing_path() {
        let store = MemoryStore::new();
        let err = store.get("/keys").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_replaces_subtree() {
        let store = MemoryStore::with_document(json!({"keys": {"1": "a", "2": "b"}}));

        store.set("/keys", json!({"3": "c"})).await.unwrap();

        assert_eq!(store.get("/keys").await.unwrap(), json!({"3": "c"}));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryStore::with_document(json!({"locked": {"1": true}}));
        store.delete("/locked/1").await.unwrap();
        store.delete("/locked/1").await.unwrap();
        assert_eq!(store.snapshot(), json!({"locked": {}}));
    }
}
