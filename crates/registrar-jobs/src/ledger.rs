//! Job ledger: creating, reading and finalizing job records.

use registrar_types::{
    Job, JobError, JobResult, JobState, JobStatus, JobStore, JobTransition, ObjectStore,
};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

const FINISHED_CHANNEL_CAPACITY: usize = 1024;

/// Who is asking for a job, and whether they may read every user's jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester {
    pub user_id: String,
    pub can_read_all_jobs: bool,
}

impl Requester {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            can_read_all_jobs: false,
        }
    }

    pub fn job_reader(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            can_read_all_jobs: true,
        }
    }
}

/// Job records plus the object store their result files go to.
pub struct JobLedger {
    store: Arc<dyn JobStore>,
    results: Arc<dyn ObjectStore>,
    /// Ids of jobs that just reached a terminal state.
    finished: broadcast::Sender<String>,
    /// Serializes check-then-create in [`JobLedger::create_job_unless_processing`].
    admission: Mutex<()>,
}

impl JobLedger {
    /// `results` should already be scoped to the job results prefix.
    pub fn new(store: Arc<dyn JobStore>, results: Arc<dyn ObjectStore>) -> Self {
        let (finished, _) = broadcast::channel(FINISHED_CHANNEL_CAPACITY);
        Self {
            store,
            results,
            finished,
            admission: Mutex::new(()),
        }
    }

    /// The store result files are written to.
    pub fn results(&self) -> &Arc<dyn ObjectStore> {
        &self.results
    }

    /// Receive the id of every job that reaches Succeeded, Failed or Canceled from now on.
    pub fn subscribe_finished(&self) -> broadcast::Receiver<String> {
        self.finished.subscribe()
    }

    fn announce(&self, job: &Job) {
        if job.state.is_terminal() {
            // No subscribers is fine.
            let _ = self.finished.send(job.job_id.clone());
        }
    }

    /// Create a Pending job with a fresh UUID v4 id.
    pub async fn create_job(&self, owner: &str, name: &str) -> Result<Job, JobError> {
        let job = Job::new(Uuid::new_v4().to_string(), owner, name);
        self.store.insert(job.clone()).await?;
        tracing::debug!(job_id = %job.job_id, owner = %owner, name = %name, "created job");
        Ok(job)
    }

    /// Create a Pending job unless a job whose name starts with `prefix` is processing.
    ///
    /// Concurrent callers are serialized, so at most one of them gets a job for `prefix`.
    pub async fn create_job_unless_processing(
        &self,
        owner: &str,
        name: &str,
        prefix: &str,
    ) -> Result<Option<Job>, JobError> {
        let _admitted = self.admission.lock().await;
        if self.processing_job_with_prefix_exists(prefix).await? {
            tracing::info!(owner = %owner, prefix = %prefix, "job with prefix already processing");
            return Ok(None);
        }
        self.create_job(owner, name).await.map(Some)
    }

    pub async fn get_job(&self, job_id: &str) -> Result<Job, JobError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))
    }

    /// Status of `job_id`, if `requester` owns it or may read all jobs.
    pub async fn get_job_status(
        &self,
        requester: &Requester,
        job_id: &str,
    ) -> Result<JobStatus, JobError> {
        let job = self.get_job(job_id).await?;
        if job.owner != requester.user_id && !requester.can_read_all_jobs {
            return Err(JobError::PermissionDenied(job_id.to_string()));
        }
        Ok(job.status())
    }

    /// Store `payload` as `{job_id}.{file_extension}` and mark the job Succeeded.
    ///
    /// The job must be In Progress.
    pub async fn post_job_success(
        &self,
        job_id: &str,
        payload: &[u8],
        file_extension: &str,
        text: Option<String>,
    ) -> Result<JobStatus, JobError> {
        self.require_in_progress(job_id, "post success").await?;
        let path = result_path(job_id, file_extension);
        let url = self.results.store(&path, payload).await?;
        let transition = JobTransition::new(JobState::InProgress, JobState::Succeeded)
            .with_result(JobResult { url, text });
        match self.store.transition(job_id, transition).await {
            Ok(job) => {
                tracing::info!(job_id = %job_id, "job succeeded");
                self.announce(&job);
                Ok(job.status())
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "job changed state while posting success");
                if let Err(del) = self.results.delete(&path).await {
                    tracing::warn!(job_id = %job_id, error = %del, "could not remove orphaned result file");
                }
                Err(e)
            }
        }
    }

    /// Mark the job Failed with `message`. The job must be In Progress.
    pub async fn post_job_failure(&self, job_id: &str, message: &str) -> Result<(), JobError> {
        self.require_in_progress(job_id, "post failure").await?;
        let transition =
            JobTransition::new(JobState::InProgress, JobState::Failed).with_failure(message);
        match self.store.transition(job_id, transition).await {
            Ok(job) => self.announce(&job),
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "job changed state while posting failure");
                return Err(e);
            }
        }
        tracing::error!(job_id = %job_id, "Job {} failed. {}", job_id, message);
        Ok(())
    }

    /// Pending, In Progress and Retrying jobs owned by `user_id`, newest first.
    pub async fn get_processing_jobs_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<JobStatus>, JobError> {
        let mut jobs: Vec<Job> = self
            .store
            .processing()
            .await?
            .into_iter()
            .filter(|j| j.owner == user_id)
            .collect();
        jobs.sort_by(|a, b| b.created.cmp(&a.created));
        Ok(jobs.iter().map(Job::status).collect())
    }

    /// Whether any job whose name starts with `prefix` is still processing.
    pub async fn processing_job_with_prefix_exists(&self, prefix: &str) -> Result<bool, JobError> {
        Ok(self
            .store
            .processing()
            .await?
            .iter()
            .any(|j| j.name.starts_with(prefix)))
    }

    /// Move a non-terminal job to Canceled.
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatus, JobError> {
        let job = self.get_job(job_id).await?;
        let job = self
            .store
            .transition(job_id, JobTransition::new(job.state, JobState::Canceled))
            .await?;
        tracing::info!(job_id = %job_id, "job canceled");
        self.announce(&job);
        Ok(job.status())
    }

    pub(crate) async fn transition(
        &self,
        job_id: &str,
        from: JobState,
        to: JobState,
    ) -> Result<Job, JobError> {
        let job = self
            .store
            .transition(job_id, JobTransition::new(from, to))
            .await?;
        self.announce(&job);
        Ok(job)
    }

    pub(crate) async fn processing_job_ids(&self) -> Result<Vec<String>, JobError> {
        Ok(self
            .store
            .processing()
            .await?
            .into_iter()
            .map(|j| j.job_id)
            .collect())
    }

    async fn require_in_progress(&self, job_id: &str, action: &str) -> Result<(), JobError> {
        let job = self.get_job(job_id).await?;
        if job.state != JobState::InProgress {
            tracing::error!(
                job_id = %job_id,
                state = %job.state,
                "cannot {} for job {}: state is {}, expected {}",
                action,
                job_id,
                job.state,
                JobState::InProgress
            );
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                expected: JobState::InProgress,
                actual: job.state,
            });
        }
        Ok(())
    }
}

/// Object path of a job's result file.
pub fn result_path(job_id: &str, file_extension: &str) -> String {
    format!("{}.{}", job_id, file_extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InMemoryJobStore;
    use registrar_filestore::{InMemoryObjectStore, JOB_RESULTS_PREFIX};

    fn ledger() -> (JobLedger, Arc<InMemoryObjectStore>) {
        let files = Arc::new(InMemoryObjectStore::new("registrar", JOB_RESULTS_PREFIX));
        let ledger = JobLedger::new(Arc::new(InMemoryJobStore::new()), files.clone());
        (ledger, files)
    }

    async fn started(ledger: &JobLedger, owner: &str, name: &str) -> String {
        let job = ledger.create_job(owner, name).await.unwrap();
        ledger
            .transition(&job.job_id, JobState::Pending, JobState::InProgress)
            .await
            .unwrap();
        job.job_id
    }

    #[tokio::test]
    async fn job_status_visibility() {
        let (ledger, _) = ledger();
        let job = ledger.create_job("alice", "p:read:X").await.unwrap();

        let status = ledger
            .get_job_status(&Requester::user("alice"), &job.job_id)
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Pending);
        assert_eq!(status.result, None);

        let err = ledger
            .get_job_status(&Requester::user("bob"), &job.job_id)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::PermissionDenied(_)));

        ledger
            .get_job_status(&Requester::job_reader("staff"), &job.job_id)
            .await
            .unwrap();

        let err = ledger
            .get_job_status(&Requester::user("alice"), "00000000-0000-0000-0000-000000000000")
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotFound(_)));
    }

    #[tokio::test]
    async fn success_stores_result_file() {
        let (ledger, files) = ledger();
        let job_id = started(&ledger, "alice", "p:read:X").await;

        let status = ledger
            .post_job_success(&job_id, b"abcd,enrolled,True\r\n", "csv", None)
            .await
            .unwrap();
        assert_eq!(status.state, JobState::Succeeded);
        assert_eq!(
            status.result.as_deref(),
            Some(format!("/media/registrar/job-results/{}.csv", job_id).as_str())
        );
        let stored = files
            .retrieve(&result_path(&job_id, "csv"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored, b"abcd,enrolled,True\r\n");
    }

    #[tokio::test]
    async fn second_success_is_rejected_and_leaves_first_result() {
        let (ledger, files) = ledger();
        let job_id = started(&ledger, "alice", "p:read:X").await;
        ledger
            .post_job_success(&job_id, b"first", "json", Some("200".to_string()))
            .await
            .unwrap();

        let err = ledger
            .post_job_success(&job_id, b"second", "csv", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidState {
                actual: JobState::Succeeded,
                ..
            }
        ));
        let job = ledger.get_job(&job_id).await.unwrap();
        let result = job.result.unwrap();
        assert!(result.url.ends_with(".json"));
        assert_eq!(result.text.as_deref(), Some("200"));
        assert_eq!(files.len().await, 1);
    }

    #[tokio::test]
    async fn failure_requires_in_progress() {
        let (ledger, _) = ledger();
        let job = ledger.create_job("alice", "p:read:X").await.unwrap();
        assert!(ledger.post_job_failure(&job.job_id, "boom").await.is_err());

        ledger
            .transition(&job.job_id, JobState::Pending, JobState::InProgress)
            .await
            .unwrap();
        ledger.post_job_failure(&job.job_id, "boom").await.unwrap();
        let job = ledger.get_job(&job.job_id).await.unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.failure.as_deref(), Some("boom"));
        assert!(ledger.post_job_failure(&job.job_id, "again").await.is_err());
    }

    #[tokio::test]
    async fn processing_jobs_and_prefixes() {
        let (ledger, _) = ledger();
        let first = ledger.create_job("alice", "masters:read:A").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = started(&ledger, "alice", "masters:write:B").await;
        let other = ledger.create_job("bob", "phd:read:A").await.unwrap();

        let mine = ledger.get_processing_jobs_for_user("alice").await.unwrap();
        let ids: Vec<&str> = mine.iter().map(|s| s.job_id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.job_id.as_str()]);

        assert!(ledger.processing_job_with_prefix_exists("masters:").await.unwrap());
        ledger.cancel_job(&other.job_id).await.unwrap();
        assert!(!ledger.processing_job_with_prefix_exists("phd:").await.unwrap());
        assert!(ledger.get_processing_jobs_for_user("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn canceled_job_cannot_succeed() {
        let (ledger, files) = ledger();
        let job_id = started(&ledger, "alice", "p:read:X").await;
        ledger.cancel_job(&job_id).await.unwrap();
        assert!(ledger.post_job_success(&job_id, b"x", "json", None).await.is_err());
        assert!(files.is_empty().await);
        assert!(ledger.cancel_job(&job_id).await.is_err());
    }

    #[tokio::test]
    async fn terminal_transitions_are_announced() {
        let (ledger, _) = ledger();
        let mut finished = ledger.subscribe_finished();
        let done = started(&ledger, "alice", "p:read:X").await;
        ledger.post_job_success(&done, b"[]", "json", None).await.unwrap();
        let failed = started(&ledger, "alice", "p:read:X").await;
        ledger.post_job_failure(&failed, "boom").await.unwrap();
        let canceled = ledger.create_job("alice", "p:read:X").await.unwrap();
        ledger.cancel_job(&canceled.job_id).await.unwrap();

        assert_eq!(finished.recv().await.unwrap(), done);
        assert_eq!(finished.recv().await.unwrap(), failed);
        assert_eq!(finished.recv().await.unwrap(), canceled.job_id);
        assert!(finished.try_recv().is_err());
    }

    #[tokio::test]
    async fn concurrent_guarded_creates_admit_one_job() {
        let (ledger, _) = ledger();
        let ledger = Arc::new(ledger);
        let attempts = (0..8).map(|i| {
            let ledger = ledger.clone();
            tokio::spawn(async move {
                ledger
                    .create_job_unless_processing(&format!("user{i}"), "masters:write:W", "masters:")
                    .await
                    .unwrap()
            })
        });
        let mut created = 0;
        for attempt in attempts {
            if attempt.await.unwrap().is_some() {
                created += 1;
            }
        }
        assert_eq!(created, 1);

        let other = ledger
            .create_job_unless_processing("alice", "phd:write:W", "phd:")
            .await
            .unwrap();
        assert!(other.is_some());
    }
}
