//! Course codes and the `/courses` index
//!
//! A course code must be free in both the index and the artifact namespace.
//! Publishing and removal hold the `/courses` lock across both stores, so no
//! allocation can observe a code that exists in only one of them.

use std::collections::HashMap;
use std::sync::Arc;

use cg_common::Clock;
use cg_config::AdmissionConfig;
use cg_store::{ArtifactStore, Documents, StoreError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::payload::{CourseFilePayload, PayloadShapeError};
use crate::random::{composite_code, RandomCodeGenerator, TokenSource};
use crate::{run_detached, AdmissionError, Result};

pub const COURSES_PATH: &str = "/courses";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Uploader {
    pub authkey: String,
    pub userid: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseRecord {
    pub map: String,
    pub uploader: Uploader,
    /// Publication time, epoch millis
    pub time: i64,
    pub path: String,
    #[serde(default)]
    pub mapid: String,
    #[serde(default)]
    pub mapimg: String,
    #[serde(default)]
    pub plays: u64,
}

/// A validated upload ready to be published
#[derive(Debug, Clone)]
pub struct CourseUpload {
    pub map: String,
    pub map_id: Option<String>,
    pub map_image: Option<String>,
    pub uploader: Uploader,
    pub content: Vec<u8>,
}

/// Result of `CourseRegistry::update`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum CourseUpdate {
    Updated,
    /// The course was published for another map
    WrongMap { expected: String },
    NotUploader,
    InvalidPayload { error: PayloadShapeError },
}

/// Result of `CourseRegistry::download`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CourseDownload {
    Served { content: Vec<u8>, plays: u64 },
    WrongMap { expected: String },
}

type CourseIndex = HashMap<String, CourseRecord>;

#[derive(Debug, Clone, Copy)]
pub struct CodeLayout {
    pub groups: usize,
    pub group_length: usize,
    pub retry_limit: u32,
}

impl Default for CodeLayout {
    fn default() -> Self {
        Self {
            groups: 3,
            group_length: 4,
            retry_limit: 50,
        }
    }
}

impl From<&AdmissionConfig> for CodeLayout {
    fn from(config: &AdmissionConfig) -> Self {
        Self {
            groups: config.code_groups,
            group_length: config.code_group_length,
            retry_limit: config.code_retry_limit,
        }
    }
}

#[derive(Clone)]
pub struct CourseCodeAllocator {
    documents: Documents,
    artifacts: Arc<dyn ArtifactStore>,
    tokens: Arc<dyn TokenSource>,
    layout: CodeLayout,
}

impl CourseCodeAllocator {
    pub fn new(documents: Documents, artifacts: Arc<dyn ArtifactStore>) -> Self {
        Self {
            documents,
            artifacts,
            tokens: Arc::new(RandomCodeGenerator::new()),
            layout: CodeLayout::default(),
        }
    }

    pub fn with_layout(mut self, layout: CodeLayout) -> Self {
        self.layout = layout;
        self
    }

    pub fn with_token_source(mut self, tokens: Arc<dyn TokenSource>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn layout(&self) -> CodeLayout {
        self.layout
    }

    /// A code currently free in the index and the artifact namespace. The
    /// code is not reserved; publish through `CourseRegistry` to claim one.
    pub async fn allocate(&self) -> Result<String> {
        let _guard = self.documents.lock(COURSES_PATH).await;
        let index: CourseIndex = self.documents.load(COURSES_PATH).await?;
        self.allocate_against(&index).await
    }

    /// Caller holds the `/courses` lock
    async fn allocate_against(&self, index: &CourseIndex) -> Result<String> {
        for _ in 0..self.layout.retry_limit {
            let code = composite_code(
                self.tokens.as_ref(),
                self.layout.groups,
                self.layout.group_length,
            );
            if index.contains_key(&code) {
                debug!(code = %code, "Course code taken in index, retrying");
                continue;
            }
            if self
                .artifacts
                .exists(&code)
                .await
                .map_err(AdmissionError::Artifact)?
            {
                debug!(code = %code, "Course code taken by an artifact, retrying");
                continue;
            }
            return Ok(code);
        }

        error!(
            attempts = self.layout.retry_limit,
            indexed = index.len(),
            "Course code space exhausted"
        );
        Err(AdmissionError::CodeSpaceExhausted {
            attempts: self.layout.retry_limit,
        })
    }
}

#[derive(Clone)]
pub struct CourseRegistry {
    documents: Documents,
    artifacts: Arc<dyn ArtifactStore>,
    allocator: CourseCodeAllocator,
    audit: AuditLog,
    clock: Arc<dyn Clock>,
}

impl CourseRegistry {
    pub fn new(
        allocator: CourseCodeAllocator,
        audit: AuditLog,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            documents: allocator.documents.clone(),
            artifacts: allocator.artifacts.clone(),
            allocator,
            audit,
            clock,
        }
    }

    pub fn allocator(&self) -> &CourseCodeAllocator {
        &self.allocator
    }

    /// Allocate a code, write the artifact, then index the course
    pub async fn publish(&self, upload: CourseUpload) -> Result<String> {
        let this = self.clone();
        run_detached(async move {
            let (code, uploader) = this.publish_locked(upload).await?;
            this.audit
                .record(
                    &format!("[COURSE] Published {code} (uploader: {uploader})"),
                    Some(&format!("[COURSE] Published `{code}` by `{uploader}`")),
                )
                .await;
            Ok(code)
        })
        .await
    }

    async fn publish_locked(&self, upload: CourseUpload) -> Result<(String, String)> {
        let _guard = self.documents.lock(COURSES_PATH).await;
        let mut index: CourseIndex = self.documents.load(COURSES_PATH).await?;

        let code = self.allocator.allocate_against(&index).await?;
        self.artifacts
            .write(&code, &upload.content)
            .await
            .map_err(AdmissionError::Artifact)?;

        let record = CourseRecord {
            map: upload.map,
            uploader: upload.uploader,
            time: self.clock.now_millis(),
            path: self.artifacts.location(&code),
            mapid: upload.map_id.unwrap_or_default(),
            mapimg: upload.map_image.unwrap_or_default(),
            plays: 0,
        };
        let uploader = record.uploader.userid.clone();
        index.insert(code.clone(), record);

        if let Err(e) = self.documents.save(COURSES_PATH, &index).await {
            // Leave no orphan artifact behind a failed index write
            if let Err(cleanup) = self.artifacts.delete(&code).await {
                warn!(code = %code, error = %cleanup, "Failed to remove artifact after index write failure");
            }
            return Err(e.into());
        }

        info!(code = %code, uploader = %uploader, "Published course");
        Ok((code, uploader))
    }

    /// Replace the content of an existing course. Only the original uploader
    /// may do so, and only for the same map.
    pub async fn update(
        &self,
        code: &str,
        identity: &str,
        map: &str,
        content: Vec<u8>,
    ) -> Result<CourseUpdate> {
        let this = self.clone();
        let code = code.to_uppercase();
        let identity = identity.to_string();
        let map = map.to_string();
        run_detached(async move {
            let outcome = this.update_locked(&code, &identity, &map, content).await?;
            if outcome == CourseUpdate::Updated {
                this.audit
                    .record(
                        &format!("[UPDATE] Updated {code} (uploader: {identity})"),
                        Some(&format!("[UPDATE] Updated `{code}` by `{identity}`")),
                    )
                    .await;
            }
            Ok(outcome)
        })
        .await
    }

    async fn update_locked(
        &self,
        code: &str,
        identity: &str,
        map: &str,
        content: Vec<u8>,
    ) -> Result<CourseUpdate> {
        let _guard = self.documents.lock(COURSES_PATH).await;
        let mut index: CourseIndex = self.documents.load(COURSES_PATH).await?;
        let record = index
            .get_mut(code)
            .ok_or_else(|| AdmissionError::CourseNotFound(code.to_string()))?;

        if record.map != map {
            return Ok(CourseUpdate::WrongMap {
                expected: record.map.clone(),
            });
        }
        if record.uploader.userid != identity {
            return Ok(CourseUpdate::NotUploader);
        }
        if let Err(error) = CourseFilePayload::from_slice(&content) {
            return Ok(CourseUpdate::InvalidPayload { error });
        }

        let previous = match self.artifacts.read(code).await {
            Ok(bytes) => Some(bytes),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(AdmissionError::Artifact(e)),
        };
        self.artifacts
            .write(code, &content)
            .await
            .map_err(AdmissionError::Artifact)?;
        record.time = self.clock.now_millis();

        if let Err(e) = self.documents.save(COURSES_PATH, &index).await {
            let restored = match &previous {
                Some(bytes) => self.artifacts.write(code, bytes).await,
                None => self.artifacts.delete(code).await,
            };
            if let Err(restore) = restored {
                warn!(code = %code, error = %restore, "Failed to restore artifact after index write failure");
            }
            return Err(e.into());
        }

        info!(code = %code, uploader = %identity, bytes = content.len(), "Updated course");
        Ok(CourseUpdate::Updated)
    }

    /// Serve a course for the given map and count the play
    pub async fn download(&self, code: &str, map: &str, identity: &str) -> Result<CourseDownload> {
        let code = code.to_uppercase();
        let record = self
            .get(&code)
            .await?
            .ok_or_else(|| AdmissionError::CourseNotFound(code.clone()))?;
        if record.map != map {
            return Ok(CourseDownload::WrongMap {
                expected: record.map,
            });
        }

        let content = self.read_content(&code).await?;
        let plays = self.record_play(&code).await?;
        self.audit
            .record(
                &format!("[DOWNLOAD] Served {code} (identity: {identity})"),
                Some(&format!("[DOWNLOAD] Served `{code}` to `{identity}`")),
            )
            .await;
        Ok(CourseDownload::Served { content, plays })
    }

    pub async fn get(&self, code: &str) -> Result<Option<CourseRecord>> {
        let index: CourseIndex = self.documents.load(COURSES_PATH).await?;
        Ok(index.get(&code.to_uppercase()).cloned())
    }

    pub async fn list(&self) -> Result<HashMap<String, CourseRecord>> {
        Ok(self.documents.load(COURSES_PATH).await?)
    }

    pub async fn read_content(&self, code: &str) -> Result<Vec<u8>> {
        let code = code.to_uppercase();
        match self.artifacts.read(&code).await {
            Ok(bytes) => Ok(bytes),
            Err(StoreError::NotFound(_)) | Err(StoreError::InvalidPath(_)) => {
                Err(AdmissionError::CourseNotFound(code))
            }
            Err(e) => Err(AdmissionError::Artifact(e)),
        }
    }

    /// Increment the play counter, returning the new count
    pub async fn record_play(&self, code: &str) -> Result<u64> {
        let this = self.clone();
        let code = code.to_uppercase();
        run_detached(async move {
            let _guard = this.documents.lock(COURSES_PATH).await;
            let mut index: CourseIndex = this.documents.load(COURSES_PATH).await?;
            let record = index
                .get_mut(&code)
                .ok_or_else(|| AdmissionError::CourseNotFound(code.clone()))?;
            record.plays += 1;
            let plays = record.plays;
            this.documents.save(COURSES_PATH, &index).await?;
            Ok(plays)
        })
        .await
    }

    /// Remove the index entry, then the artifact. Returns `false` when the
    /// course does not exist.
    pub async fn remove(&self, code: &str) -> Result<bool> {
        let this = self.clone();
        let code = code.to_uppercase();
        run_detached(async move {
            let _guard = this.documents.lock(COURSES_PATH).await;
            let mut index: CourseIndex = this.documents.load(COURSES_PATH).await?;
            if index.remove(&code).is_none() {
                return Ok(false);
            }
            this.documents.save(COURSES_PATH, &index).await?;

            match this.artifacts.delete(&code).await {
                Ok(()) => {}
                Err(StoreError::NotFound(_)) => {
                    warn!(code = %code, "Course artifact already missing");
                }
                Err(e) => return Err(AdmissionError::Artifact(e)),
            }
            info!(code = %code, "Removed course");
            Ok(true)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::testing::{ConstantToken, ScriptedTokens};
    use cg_common::ManualClock;
    use cg_store::{MemoryArtifactStore, MemoryStore};
    use serde_json::json;
    use std::time::Duration;

    const NOW: i64 = 1_700_000_000_000;

    struct Fixture {
        registry: CourseRegistry,
        artifacts: Arc<MemoryArtifactStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(root: serde_json::Value, tokens: Option<Arc<dyn TokenSource>>) -> Fixture {
        let documents = Documents::new(
            Arc::new(MemoryStore::with_document(root)),
            Duration::from_secs(1),
        );
        let artifacts = Arc::new(MemoryArtifactStore::new());
        let mut allocator = CourseCodeAllocator::new(documents, artifacts.clone());
        if let Some(tokens) = tokens {
            allocator = allocator.with_token_source(tokens);
        }
        let clock = Arc::new(ManualClock::new(NOW));
        let dyn_clock: Arc<dyn Clock> = clock.clone();
        Fixture {
            registry: CourseRegistry::new(allocator, AuditLog::disabled(dyn_clock.clone()), dyn_clock),
            artifacts,
            clock,
        }
    }

    fn upload(content: &[u8]) -> CourseUpload {
        CourseUpload {
            map: "Forest".to_string(),
            map_id: Some("12".to_string()),
            map_image: None,
            uploader: Uploader {
                authkey: "key".to_string(),
                userid: "alice".to_string(),
            },
            content: content.to_vec(),
        }
    }

    #[tokio::test]
    async fn test_publish_indexes_and_stores() {
        let f = fixture(json!({}), None);

        let code = f.registry.publish(upload(b"[]")).await.unwrap();

        assert!(crate::random::is_course_code(&code, 3, 4));
        let record = f.registry.get(&code).await.unwrap().unwrap();
        assert_eq!(record.map, "Forest");
        assert_eq!(record.mapid, "12");
        assert_eq!(record.time, NOW);
        assert_eq!(record.path, format!("courses/{code}.txt"));
        assert_eq!(record.plays, 0);
        assert_eq!(f.registry.read_content(&code).await.unwrap(), b"[]");
    }

    #[tokio::test]
    async fn test_allocation_skips_indexed_and_stored_codes() {
        let tokens = Arc::new(ScriptedTokens::new([
            "AAAA", "AAAA", "AAAA", // indexed
            "BBBB", "BBBB", "BBBB", // artifact on disk
            "CCCC", "CCCC", "CCCC",
        ]));
        let f = fixture(
            json!({"courses": {"AAAA-AAAA-AAAA": {
                "map": "m", "uploader": {"authkey": "k", "userid": "u"},
                "time": 1, "path": "courses/AAAA-AAAA-AAAA.txt"
            }}}),
            Some(tokens as Arc<dyn TokenSource>),
        );
        f.artifacts.write("BBBB-BBBB-BBBB", b"orphan").await.unwrap();

        let code = f.registry.allocator().allocate().await.unwrap();
        assert_eq!(code, "CCCC-CCCC-CCCC");
    }

    #[tokio::test]
    async fn test_code_space_exhaustion() {
        let f = fixture(json!({}), Some(Arc::new(ConstantToken("ZZZZ")) as Arc<dyn TokenSource>));
        f.artifacts.write("ZZZZ-ZZZZ-ZZZZ", b"x").await.unwrap();

        let err = f.registry.publish(upload(b"[]")).await.unwrap_err();
        assert!(matches!(err, AdmissionError::CodeSpaceExhausted { attempts: 50 }));
        assert_eq!(f.artifacts.len(), 1);
    }

    #[tokio::test]
    async fn test_record_play() {
        let f = fixture(json!({}), None);
        let code = f.registry.publish(upload(b"[]")).await.unwrap();

        assert_eq!(f.registry.record_play(&code).await.unwrap(), 1);
        assert_eq!(f.registry.record_play(&code.to_lowercase()).await.unwrap(), 2);
        assert!(matches!(
            f.registry.record_play("NOPE-NOPE-NOPE").await,
            Err(AdmissionError::CourseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_frees_both_namespaces() {
        let tokens = Arc::new(ScriptedTokens::new(["DDDD", "DDDD", "DDDD"]));
        let f = fixture(json!({}), Some(tokens.clone() as Arc<dyn TokenSource>));
        let code = f.registry.publish(upload(b"[]")).await.unwrap();
        assert_eq!(code, "DDDD-DDDD-DDDD");

        assert!(f.registry.remove(&code).await.unwrap());
        assert!(!f.registry.remove(&code).await.unwrap());
        assert!(f.registry.get(&code).await.unwrap().is_none());
        assert!(f.artifacts.is_empty());

        // The freed code can be handed out again
        for _ in 0..3 {
            tokens.push("DDDD");
        }
        assert_eq!(f.registry.allocator().allocate().await.unwrap(), code);
    }

    const VALID: &[u8] = br#"[{},[],"tag",2,"Sky",{}]"#;

    #[tokio::test]
    async fn test_update_by_uploader_replaces_content() {
        let f = fixture(json!({}), None);
        let code = f.registry.publish(upload(b"[]")).await.unwrap();

        f.clock.set(NOW + 60_000);
        let outcome = f
            .registry
            .update(&code.to_lowercase(), "alice", "Forest", VALID.to_vec())
            .await
            .unwrap();

        assert_eq!(outcome, CourseUpdate::Updated);
        assert_eq!(f.registry.read_content(&code).await.unwrap(), VALID);
        let record = f.registry.get(&code).await.unwrap().unwrap();
        assert_eq!(record.time, NOW + 60_000);
        assert_eq!(record.uploader.userid, "alice");
    }

    #[tokio::test]
    async fn test_update_refusals_leave_course_untouched() {
        let f = fixture(json!({}), None);
        let code = f.registry.publish(upload(b"[]")).await.unwrap();

        let wrong_map = f
            .registry
            .update(&code, "alice", "Desert", VALID.to_vec())
            .await
            .unwrap();
        assert_eq!(
            wrong_map,
            CourseUpdate::WrongMap {
                expected: "Forest".to_string()
            }
        );

        let stranger = f
            .registry
            .update(&code, "mallory", "Forest", VALID.to_vec())
            .await
            .unwrap();
        assert_eq!(stranger, CourseUpdate::NotUploader);

        let invalid = f
            .registry
            .update(&code, "alice", "Forest", b"[1,2,3]".to_vec())
            .await
            .unwrap();
        assert_eq!(
            invalid,
            CourseUpdate::InvalidPayload {
                error: PayloadShapeError::WrongLength { found: 3 }
            }
        );

        assert_eq!(f.registry.read_content(&code).await.unwrap(), b"[]");
        assert_eq!(f.registry.get(&code).await.unwrap().unwrap().time, NOW);

        assert!(matches!(
            f.registry
                .update("NOPE-NOPE-NOPE", "alice", "Forest", VALID.to_vec())
                .await,
            Err(AdmissionError::CourseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_download_checks_map_and_counts_plays() {
        let f = fixture(json!({}), None);
        let code = f.registry.publish(upload(VALID)).await.unwrap();

        let wrong = f.registry.download(&code, "Desert", "bob").await.unwrap();
        assert_eq!(
            wrong,
            CourseDownload::WrongMap {
                expected: "Forest".to_string()
            }
        );
        assert_eq!(f.registry.get(&code).await.unwrap().unwrap().plays, 0);

        let served = f.registry.download(&code, "Forest", "bob").await.unwrap();
        assert_eq!(
            served,
            CourseDownload::Served {
                content: VALID.to_vec(),
                plays: 1
            }
        );
        assert!(matches!(
            f.registry.download("NOPE-NOPE-NOPE", "Forest", "bob").await,
            Err(AdmissionError::CourseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_read_missing_content() {
        let f = fixture(json!({}), None);
        assert!(matches!(
            f.registry.read_content("ABCD-EFGH-IJKL").await,
            Err(AdmissionError::CourseNotFound(_))
        ));
    }
}
