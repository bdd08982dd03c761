//! Job manager: start jobs on the executor and keep track of their tasks.

use crate::{JobLedger, JobTask, Requester, TaskExecutor};
use registrar_types::{JobError, JobState, JobStatus};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast::error::RecvError, RwLock};

type TaskIds = Arc<RwLock<HashMap<String, String>>>;

/// Starts jobs and maps each unfinished job id to the executor's task id.
pub struct JobManager {
    ledger: Arc<JobLedger>,
    executor: Arc<dyn TaskExecutor>,
    task_ids: TaskIds,
}

impl JobManager {
    /// Must be called inside a tokio runtime: entries for finished jobs are dropped by a
    /// background task listening to the ledger.
    pub fn new(ledger: Arc<JobLedger>, executor: Arc<dyn TaskExecutor>) -> Self {
        let task_ids: TaskIds = Arc::new(RwLock::new(HashMap::new()));
        tokio::spawn(forget_finished_jobs(
            Arc::downgrade(&ledger),
            ledger.subscribe_finished(),
            Arc::downgrade(&task_ids),
        ));
        Self {
            ledger,
            executor,
            task_ids,
        }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    /// Create a Pending job owned by `owner`, queue `task` for it and return the job id.
    pub async fn start_job(&self, owner: &str, task: Arc<dyn JobTask>) -> Result<String, JobError> {
        let job = self.ledger.create_job(owner, &task.name()).await?;
        self.submit(job.job_id, task).await
    }

    /// Like [`JobManager::start_job`], but returns `None` without starting anything when
    /// a job whose name starts with `prefix` is still processing.
    pub async fn start_exclusive_job(
        &self,
        owner: &str,
        prefix: &str,
        task: Arc<dyn JobTask>,
    ) -> Result<Option<String>, JobError> {
        match self
            .ledger
            .create_job_unless_processing(owner, &task.name(), prefix)
            .await?
        {
            Some(job) => self.submit(job.job_id, task).await.map(Some),
            None => Ok(None),
        }
    }

    async fn submit(&self, job_id: String, task: Arc<dyn JobTask>) -> Result<String, JobError> {
        let task_id = match self.executor.submit(&job_id, task).await {
            Ok(task_id) => task_id,
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "could not queue job");
                if let Err(cancel_err) = self
                    .ledger
                    .transition(&job_id, JobState::Pending, JobState::Canceled)
                    .await
                {
                    tracing::error!(job_id = %job_id, error = %cancel_err, "could not cancel unqueued job");
                }
                return Err(e);
            }
        };
        self.task_ids
            .write()
            .await
            .insert(job_id.clone(), task_id);
        // The job may have finished before its entry existed.
        if self.ledger.get_job(&job_id).await?.state.is_terminal() {
            self.task_ids.write().await.remove(&job_id);
        }
        Ok(job_id)
    }

    /// Cancel a job and revoke its queued task.
    pub async fn cancel_job(&self, job_id: &str) -> Result<JobStatus, JobError> {
        // Read before canceling: the cancel itself makes the entry go away.
        let task_id = self.task_ids.read().await.get(job_id).cloned();
        let status = self.ledger.cancel_job(job_id).await?;
        self.task_ids.write().await.remove(job_id);
        if let Some(task_id) = task_id {
            self.executor.revoke(&task_id).await?;
        }
        Ok(status)
    }

    pub async fn get_job_status(
        &self,
        requester: &Requester,
        job_id: &str,
    ) -> Result<JobStatus, JobError> {
        self.ledger.get_job_status(requester, job_id).await
    }

    pub async fn get_processing_jobs_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<JobStatus>, JobError> {
        self.ledger.get_processing_jobs_for_user(user_id).await
    }

    pub async fn processing_job_with_prefix_exists(&self, prefix: &str) -> Result<bool, JobError> {
        self.ledger.processing_job_with_prefix_exists(prefix).await
    }

    pub(crate) async fn task_id(&self, job_id: &str) -> Option<String> {
        self.task_ids.read().await.get(job_id).cloned()
    }

    pub(crate) async fn tracked_tasks(&self) -> usize {
        self.task_ids.read().await.len()
    }
}

async fn forget_finished_jobs(
    ledger: Weak<JobLedger>,
    mut finished: tokio::sync::broadcast::Receiver<String>,
    task_ids: Weak<RwLock<HashMap<String, String>>>,
) {
    loop {
        let event = finished.recv().await;
        let Some(ids) = task_ids.upgrade() else { break };
        match event {
            Ok(job_id) => {
                ids.write().await.remove(&job_id);
            }
            Err(RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "missed job completions, resyncing task ids");
                let Some(ledger) = ledger.upgrade() else { break };
                match ledger.processing_job_ids().await {
                    Ok(processing) => ids
                        .write()
                        .await
                        .retain(|job_id, _| processing.contains(job_id)),
                    Err(e) => tracing::error!(error = %e, "could not list processing jobs"),
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}
