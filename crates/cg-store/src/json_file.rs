//! Document store persisted as a single JSON file
//!
//! The whole document is held in memory and rewritten to disk after every
//! mutation (write to a temp file, then rename over the original). A mutation
//! is applied to a copy of the document and becomes visible only once the
//! rename succeeded. The commit runs in its own task, so a caller that stops
//! waiting cannot interrupt it between the temp write and the rename.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{path, DocumentStore, Result, StoreError};

pub struct JsonFileStore {
    file: PathBuf,
    root: Arc<RwLock<Value>>,
    pretty: bool,
}

impl JsonFileStore {
    /// Open the store at `file`, creating an empty document if it does not exist.
    pub async fn open<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref().to_path_buf();

        if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let root = match tokio::fs::read(&file).await {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Value::Object(Map::new()),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Value::Object(Map::new()),
            Err(e) => return Err(e.into()),
        };

        persist(&file, &root, true).await?;
        info!(file = %file.display(), "Opened JSON document store");

        Ok(Self {
            file,
            root: Arc::new(RwLock::new(root)),
            pretty: true,
        })
    }

    /// Write compact JSON instead of indented JSON
    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Apply `change` to a copy of the document and commit it. `change`
    /// returns `false` when there is nothing to write.
    async fn commit<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Value) -> Result<bool> + Send + 'static,
    {
        let root = self.root.clone();
        let file = self.file.clone();
        let pretty = self.pretty;

        tokio::spawn(apply(root, file, pretty, change))
            .await
            .map_err(|e| {
                warn!(error = %e, "JSON document write task failed");
                StoreError::WriteTask(e.to_string())
            })?
    }
}

async fn apply<F>(root: Arc<RwLock<Value>>, file: PathBuf, pretty: bool, change: F) -> Result<()>
where
    F: FnOnce(&mut Value) -> Result<bool>,
{
    // Held across the file write so saves land in mutation order
    let mut current = root.write_owned().await;
    let mut next = current.clone();
    if !change(&mut next)? {
        return Ok(());
    }
    persist(&file, &next, pretty).await?;
    *current = next;
    Ok(())
}

async fn persist(file: &Path, root: &Value, pretty: bool) -> Result<()> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(root)?
    } else {
        serde_json::to_vec(root)?
    };

    let tmp_path = file.with_extension("tmp");
    tokio::fs::write(&tmp_path, &bytes).await?;
    tokio::fs::rename(&tmp_path, file).await?;

    debug!(file = %file.display(), bytes = bytes.len(), "Saved JSON document");
    Ok(())
}

#[async_trait]
impl DocumentStore for JsonFileStore {
    async fn get(&self, path: &str) -> Result<Value> {
        let root = self.root.read().await;
        path::lookup(&root, path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let path = path.to_string();
        self.commit(move |root| {
            path::assign(root, &path, value)?;
            Ok(true)
        })
        .await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.commit(move |root| Ok(path::remove(root, &path).is_some()))
            .await
    }

    fn name(&self) -> &str {
        "json-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_open_creates_empty_document() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("nested").join("main_db.json");

        let store = JsonFileStore::open(&file).await.unwrap();

        assert!(file.exists());
        assert!(store.get("/keys").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("main_db.json");

        {
            let store = JsonFileStore::open(&file).await.unwrap();
            store.set("/keys", json!({"76561198000000001": "abc"})).await.unwrap();
            store.set("/locked/76561198000000002", json!(true)).await.unwrap();
        }

        let store = JsonFileStore::open(&file).await.unwrap();
        assert_eq!(
            store.get("/keys/76561198000000001").await.unwrap(),
            json!("abc")
        );
        assert_eq!(store.get("/locked").await.unwrap(), json!({"76561198000000002": true}));
    }

    #[tokio::test]
    async fn test_delete_persists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.json");

        let store = JsonFileStore::open(&file).await.unwrap().compact();
        store.set("/courses/AAAA-BBBB-CCCC", json!({"plays": 1})).await.unwrap();
        store.delete("/courses/AAAA-BBBB-CCCC").await.unwrap();

        let on_disk: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"courses": {}}));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.json");
        std::fs::write(&file, "{not json").unwrap();

        assert!(matches!(
            JsonFileStore::open(&file).await,
            Err(StoreError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_write_leaves_document_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.json");
        let store = JsonFileStore::open(&file).await.unwrap();
        store.set("/keys/1", json!("kept")).await.unwrap();

        // A directory where the temp file should go makes every write fail
        let blocker = file.with_extension("tmp");
        std::fs::create_dir(&blocker).unwrap();

        assert!(store.set("/courses/AAAA-BBBB-CCCC", json!({"plays": 0})).await.is_err());
        assert!(store.get("/courses/AAAA-BBBB-CCCC").await.unwrap_err().is_not_found());
        assert!(store.delete("/keys/1").await.is_err());
        assert_eq!(store.get("/keys/1").await.unwrap(), json!("kept"));

        let on_disk: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"keys": {"1": "kept"}}));

        // Once writes succeed again the failed change does not resurface
        std::fs::remove_dir(&blocker).unwrap();
        store.set("/keys/2", json!("new")).await.unwrap();
        let on_disk: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(on_disk, json!({"keys": {"1": "kept", "2": "new"}}));
    }

    #[tokio::test]
    async fn test_abandoned_write_keeps_memory_and_disk_in_step() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("db.json");
        let store = JsonFileStore::open(&file).await.unwrap();

        for i in 0..20 {
            let _ = tokio::time::timeout(
                std::time::Duration::ZERO,
                store.set(&format!("/records/{i}"), json!(i)),
            )
            .await;
        }
        // Serialized behind every write still in flight
        store.set("/done", json!(true)).await.unwrap();

        let on_disk: Value = serde_json::from_slice(&std::fs::read(&file).unwrap()).unwrap();
        assert_eq!(store.get("/").await.unwrap(), on_disk);
    }
}
