//! Traits for job stores, object stores, and the external services.

use crate::{Job, JobState, JobTransition};
use async_trait::async_trait;

/// Job record store (subset of a task-status table).
///
/// Every mutation is a single-record compare-and-set, so concurrent pollers see a
/// job either before or after a transition, never in between.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job record.
    async fn insert(&self, job: Job) -> Result<(), JobError>;

    /// Get one job by id.
    async fn get(&self, job_id: &str) -> Result<Option<Job>, JobError>;

    /// Apply `transition` if the job is currently in `transition.from`; returns the updated job.
    ///
    /// Fails with `NotFound` for an unknown job and `InvalidState` (leaving the record
    /// untouched) when the current state differs.
    async fn transition(&self, job_id: &str, transition: JobTransition) -> Result<Job, JobError>;

    /// All jobs in Pending, In Progress or Retrying.
    async fn processing(&self) -> Result<Vec<Job>, JobError>;
}

/// Blob store with retrievable URLs (subset of a storage backend).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `contents` under `path`; returns a URL to the stored file.
    async fn store(&self, path: &str, contents: &[u8]) -> Result<String, ObjectStoreError>;

    /// Read a file back; `Ok(None)` when nothing is stored at `path`.
    async fn retrieve(&self, path: &str) -> Result<Option<Vec<u8>>, ObjectStoreError>;

    /// Delete a file. Deleting a missing file is not an error.
    async fn delete(&self, path: &str) -> Result<(), ObjectStoreError>;

    /// Whether a file exists at `path`.
    async fn exists(&self, path: &str) -> Result<bool, ObjectStoreError>;

    /// URL for `path`, whether or not a file is stored there.
    fn url(&self, path: &str) -> String;
}

/// HTTP verbs used against the LMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LmsMethod {
    Get,
    Post,
    Patch,
    Put,
}

impl LmsMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            LmsMethod::Get => "GET",
            LmsMethod::Post => "POST",
            LmsMethod::Patch => "PATCH",
            LmsMethod::Put => "PUT",
        }
    }
}

impl From<crate::WriteMethod> for LmsMethod {
    fn from(m: crate::WriteMethod) -> Self {
        match m {
            crate::WriteMethod::Post => LmsMethod::Post,
            crate::WriteMethod::Patch => LmsMethod::Patch,
            crate::WriteMethod::Put => LmsMethod::Put,
        }
    }
}

impl std::fmt::Display for LmsMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status and raw body of an LMS response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmsResponse {
    pub status: u16,
    pub body: String,
}

impl LmsResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body parsed as JSON, or `None` if it is not JSON.
    pub fn json(&self) -> Option<serde_json::Value> {
        serde_json::from_str(&self.body).ok()
    }
}

/// Authenticated transport to the LMS.
///
/// Non-2xx responses are returned as `Ok`; only failures to get a response at all
/// are errors.
#[async_trait]
pub trait LmsTransport: Send + Sync {
    async fn send(
        &self,
        method: LmsMethod,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<LmsResponse, LmsError>;
}

/// Client for the course catalog service.
#[async_trait]
pub trait CatalogClient: Send + Sync {
    /// Raw program payload; `Ok(None)` when the catalog does not know the program.
    async fn fetch_program(
        &self,
        program_uuid: &str,
    ) -> Result<Option<serde_json::Value>, CatalogError>;
}

/// A program registered with the registrar.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub key: String,
    pub discovery_uuid: String,
}

/// Lookup of registered programs by key.
#[async_trait]
pub trait ProgramDirectory: Send + Sync {
    async fn get_program(&self, program_key: &str) -> Option<Program>;
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no such job: {0}")]
    NotFound(String),
    #[error("permission denied for job {0}")]
    PermissionDenied(String),
    #[error("job {job_id} is {actual}, expected {expected}")]
    InvalidState {
        job_id: String,
        expected: JobState,
        actual: JobState,
    },
    #[error("job store error: {0}")]
    Store(String),
    #[error("executor error: {0}")]
    Executor(String),
    #[error("object store: {0}")]
    ObjectStore(#[from] ObjectStoreError),
    #[error("retryable failure: {0}")]
    Retryable(String),
    #[error("job error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ObjectStoreError {
    #[error("io error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("invalid path: {0}")]
    InvalidPath(String),
    #[error("storage misconfigured: {0}")]
    Config(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LmsError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP error {status} at {url}")]
    Status { status: u16, url: String },
    #[error("invalid data from LMS: {0}")]
    InvalidData(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Http(String),
    #[error("catalog returned status {0}")]
    Status(u16),
    #[error("catalog payload invalid: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EnrollmentError {
    #[error("program not found: {0}")]
    ProgramNotFound(String),
    #[error("course not found in program: {0}")]
    CourseNotFound(String),
    #[error("enrollment is not enabled for program {0}")]
    EnrollmentDisabled(String),
    #[error("program {0} has no active curriculum")]
    NoActiveCurriculum(String),
    #[error("\"course_staff\" not accepted since role assignment is not enabled")]
    CourseStaffNotAllowed,
    #[error("{0}")]
    InvalidInput(String),
    #[error("Enrollment limit {0}")]
    TooManyRecords(usize),
    #[error("Upload too large. Must be under {0} bytes")]
    UploadTooLarge(usize),
    #[error("result format not supported: {0}")]
    UnsupportedFormat(String),
    #[error("Job already in progress for program")]
    JobInProgress(String),
    #[error(transparent)]
    Lms(#[from] LmsError),
    #[error(transparent)]
    Job(#[from] JobError),
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}
