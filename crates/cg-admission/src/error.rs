use cg_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The document store failed or did not answer in time. Retryable.
    #[error("Document store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Could not mint a unique access key after {attempts} attempts")]
    KeyGenerationExhausted { attempts: u32 },

    #[error("Could not allocate a unique course code after {attempts} attempts")]
    CodeSpaceExhausted { attempts: u32 },

    #[error("Course artifact storage error: {0}")]
    Artifact(#[source] StoreError),

    #[error("Course not found: {0}")]
    CourseNotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AdmissionError {
    /// Whether the same request may succeed if simply retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, AdmissionError::StoreUnavailable(_))
    }
}

impl From<StoreError> for AdmissionError {
    fn from(e: StoreError) -> Self {
        AdmissionError::StoreUnavailable(e)
    }
}
