//! Services shared by enrollment jobs and the synchronous enrollment API.

use registrar_catalog::ProgramDetailsCache;
use registrar_jobs::{JobContext, JobError, JobManager};
use registrar_lms::LmsInterop;
use registrar_types::{LmsError, ObjectStore, Program, ProgramDirectory};
use std::sync::Arc;

/// Read and write modes in enrollment job names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobAccess {
    Read,
    Write,
}

impl JobAccess {
    pub fn as_str(self) -> &'static str {
        match self {
            JobAccess::Read => "read",
            JobAccess::Write => "write",
        }
    }
}

/// `{program_key}:{read|write}:{task_name}`.
pub fn enrollment_job_name(program_key: &str, access: JobAccess, task_name: &str) -> String {
    format!("{}:{}:{}", program_key, access.as_str(), task_name)
}

/// Name prefix shared by every enrollment job of `program_key`.
pub fn enrollment_job_prefix(program_key: &str) -> String {
    format!("{}:", program_key)
}

/// Whether any enrollment job for `program_key` is still processing.
pub async fn is_enrollment_job_processing(
    jobs: &JobManager,
    program_key: &str,
) -> Result<bool, JobError> {
    jobs.processing_job_with_prefix_exists(&enrollment_job_prefix(program_key))
        .await
}

pub struct EnrollmentContext {
    pub directory: Arc<dyn ProgramDirectory>,
    pub programs: Arc<ProgramDetailsCache>,
    pub lms: Arc<LmsInterop>,
    /// Uploaded enrollment requests, scoped to the uploads prefix.
    pub uploads: Arc<dyn ObjectStore>,
}

impl EnrollmentContext {
    /// Look up `program_key` for a running job; fails the job when it is unknown.
    pub(crate) async fn program_for_job(
        &self,
        job: &JobContext,
        program_key: &str,
    ) -> Result<Option<Program>, JobError> {
        match self.directory.get_program(program_key).await {
            Some(program) => Ok(Some(program)),
            None => {
                job.ledger
                    .post_job_failure(&job.job_id, &format!("Bad program key: {}", program_key))
                    .await?;
                Ok(None)
            }
        }
    }
}

/// What a read job fetches, as named in its failure messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReadSubject {
    Enrollment,
    Grade,
}

impl ReadSubject {
    fn as_str(self) -> &'static str {
        match self {
            ReadSubject::Enrollment => "enrollment",
            ReadSubject::Grade => "grade",
        }
    }
}

/// Fail a read job for an LMS error. Transport and auth failures are retryable.
pub(crate) async fn fail_read(
    job: &JobContext,
    subject: ReadSubject,
    err: LmsError,
) -> Result<(), JobError> {
    let message = match err {
        LmsError::Status { status, url } => format!(
            "HTTP error {} when getting {}s at {}",
            status,
            subject.as_str(),
            url
        ),
        LmsError::InvalidData(detail) => {
            format!("Invalid {} data from LMS: {}", subject.as_str(), detail)
        }
        other => return Err(JobError::Retryable(other.to_string())),
    };
    job.ledger.post_job_failure(&job.job_id, &message).await
}
