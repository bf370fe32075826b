//! Flat namespace of uploaded course files, keyed by course code.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use crate::{Result, StoreError};

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool>;

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// `StoreError::NotFound` when the artifact is missing
    async fn read(&self, name: &str) -> Result<Vec<u8>>;

    /// `StoreError::NotFound` when the artifact is missing
    async fn delete(&self, name: &str) -> Result<()>;

    /// Public relative location of an artifact, e.g. `courses/ABCD-EFGH-IJKL.txt`
    fn location(&self, name: &str) -> String;
}

/// Names become file names, so anything that could escape the directory is refused
fn check_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0']);
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(name.to_string()))
    }
}

/// Artifacts stored as `<dir>/<name>.txt`
pub struct FsArtifactStore {
    dir: PathBuf,
    public_prefix: String,
}

impl FsArtifactStore {
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            public_prefix: "courses".to_string(),
        })
    }

    pub fn with_public_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.public_prefix = prefix.into();
        self
    }

    fn file_path(&self, name: &str) -> Result<PathBuf> {
        check_name(name)?;
        Ok(self.dir.join(format!("{name}.txt")))
    }
}

fn not_found(name: &str, e: std::io::Error) -> StoreError {
    if e.kind() == std::io::ErrorKind::NotFound {
        StoreError::NotFound(name.to_string())
    } else {
        StoreError::Io(e)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        let path = self.file_path(name)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.file_path(name)?;
        tokio::fs::write(&path, bytes).await?;
        debug!(artifact = %name, bytes = bytes.len(), "Wrote artifact");
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.file_path(name)?;
        tokio::fs::read(&path).await.map_err(|e| not_found(name, e))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let path = self.file_path(name)?;
        tokio::fs::remove_file(&path).await.map_err(|e| not_found(name, e))?;
        debug!(artifact = %name, "Deleted artifact");
        Ok(())
    }

    fn location(&self, name: &str) -> String {
        format!("{}/{}.txt", self.public_prefix, name)
    }
}

/// In-memory artifacts (tests and development)
#[derive(Default)]
pub struct MemoryArtifactStore {
    files: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.read().is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn exists(&self, name: &str) -> Result<bool> {
        check_name(name)?;
        Ok(self.files.read().contains_key(name))
    }

    async fn write(&self, name: &str, bytes: &[u8]) -> Result<()> {
        check_name(name)?;
        self.files.write().insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.files
            .write()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn location(&self, name: &str) -> String {
        format!("courses/{name}.txt")
    }
}
