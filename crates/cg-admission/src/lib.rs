//! CourseGate admission and identity control
//!
//! Components, leaf first:
//! - `random`: alphanumeric tokens and hyphenated course codes
//! - `keys`: one durable access key per identity, account age policy
//! - `rate_limit`: per-IP cooldown
//! - `abuse`: IP churn detection and the locked set
//! - `courses`: collision-free course codes, the course index, updates and downloads
//! - `rating`: per-identity likes and dislikes
//! - `payload`: six-slot course file decoder
//! - `audit` / `notification`: timestamped audit file with a webhook mirror
//! - `admission`: the `Gatekeeper` pipeline a request handler calls
//! - `admin`: administrative actions
//! - `sweep`: periodic eviction of stale entries
//!
//! All state lives in one `cg_store::DocumentStore`. Every read-modify-write
//! holds the path lock for its document, and every state transition runs in
//! a detached task so a dropped caller cannot leave it half applied.

use std::future::Future;

pub mod abuse;
pub mod admin;
pub mod admission;
pub mod audit;
pub mod courses;
pub mod error;
pub mod keys;
pub mod notification;
pub mod payload;
pub mod random;
pub mod rate_limit;
pub mod rating;
pub mod services;
pub mod sweep;

pub use abuse::{AbuseDetector, ChurnPolicy, IpHistory};
pub use admin::{AdminCommand, AdminOutcome, AdminRequest, AdminService};
pub use admission::{Admission, ClientIp, DenialReason, Gatekeeper, UploadAdmission};
pub use audit::AuditLog;
pub use courses::{
    CourseCodeAllocator, CourseDownload, CourseRecord, CourseRegistry, CourseUpdate, CourseUpload,
    Uploader,
};
pub use error::AdmissionError;
pub use keys::{AccountAgePolicy, KeyIssuance, KeyRegistry};
pub use notification::{create_notifier, NoOpNotifier, RemoteNotifier, WebhookNotifier};
pub use payload::{CourseFilePayload, CourseSummary, PayloadShapeError};
pub use random::{RandomCodeGenerator, TokenSource};
pub use rate_limit::RateLimiter;
pub use rating::{CourseRating, RatingRegistry, Vote};
pub use services::AdmissionServices;
pub use sweep::{spawn_eviction_task, EvictionSweeper, SweepReport};

pub type Result<T> = std::result::Result<T, AdmissionError>;

/// Run `operation` on its own task and wait for it. Dropping the returned
/// future stops the wait, not the operation.
pub(crate) async fn run_detached<F, T>(operation: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(operation)
        .await
        .map_err(|e| AdmissionError::Internal(format!("admission task failed: {e}")))?
}
