//! CourseGate storage layer
//!
//! Provides:
//! - `DocumentStore`: whole-subtree get/set over a JSON document addressed by
//!   slash-separated paths (`/keys`, `/courses/ABCD-EFGH-IJKL`)
//! - `JsonFileStore`: the document persisted as one JSON file
//! - `MemoryStore`: the same semantics without persistence
//! - `Documents`: typed access with per-path exclusive locks and bounded timeouts
//! - `ArtifactStore`: flat namespace of uploaded course files
//!
//! The store itself offers no transactions. Callers that read-modify-write a
//! document hold the path lock from `Documents::lock` for the whole operation.

use async_trait::async_trait;
use serde_json::Value;

pub mod artifacts;
pub mod documents;
pub mod error;
pub mod json_file;
pub mod memory;
mod path;

pub use artifacts::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use documents::{Documents, PathGuard, PathLocks};
pub use error::StoreError;
pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Key/value document store addressed by path.
///
/// Every call reads or replaces a whole subtree. There is no merge and no
/// transaction token.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch the subtree at `path`; `StoreError::NotFound` when absent.
    async fn get(&self, path: &str) -> Result<Value>;

    /// Replace the subtree at `path`, creating parents as needed.
    async fn set(&self, path: &str, value: Value) -> Result<()>;

    /// Remove the subtree at `path`. Removing an absent path is not an error.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Backend name for logs
    fn name(&self) -> &str;
}
