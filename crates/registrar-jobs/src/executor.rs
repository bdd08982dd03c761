//! Task execution: the [`JobTask`] and [`TaskExecutor`] seams and a tokio worker pool.

use crate::JobLedger;
use async_trait::async_trait;
use registrar_types::{JobError, JobState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

/// What a running task sees: its job and the ledger to post results to.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub ledger: Arc<JobLedger>,
    /// Zero on the first attempt.
    pub attempt: u32,
}

/// Body of a job. A task posts its own success or failure through the ledger.
///
/// Returning [`JobError::Retryable`] asks the executor to run it again; any other
/// error fails the job with the error's message.
#[async_trait]
pub trait JobTask: Send + Sync {
    /// Job name; enrollment jobs use `{program_key}:{read|write}:{TaskName}`.
    fn name(&self) -> String;

    async fn run(&self, ctx: &JobContext) -> Result<(), JobError>;
}

/// Execution substrate: queues a task for a job and returns the substrate's own task id.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn submit(&self, job_id: &str, task: Arc<dyn JobTask>) -> Result<String, JobError>;

    /// Drop a queued task; a task already running is not interrupted.
    async fn revoke(&self, task_id: &str) -> Result<(), JobError>;
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub workers: usize,
    /// Hard limit on one job, retries included.
    pub time_limit: Duration,
    pub max_retries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            time_limit: Duration::from_secs(3600),
            max_retries: 0,
        }
    }
}

impl PoolConfig {
    /// Reads `REGISTRAR_WORKERS`, `REGISTRAR_JOB_TIME_LIMIT_SECS` and
    /// `REGISTRAR_JOB_MAX_RETRIES`; unset or unparseable values keep the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let var = |name: &str| std::env::var(name).ok().and_then(|v| v.parse::<u64>().ok());
        Self {
            workers: var("REGISTRAR_WORKERS")
                .map(|n| n.max(1) as usize)
                .unwrap_or(defaults.workers),
            time_limit: var("REGISTRAR_JOB_TIME_LIMIT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.time_limit),
            max_retries: var("REGISTRAR_JOB_MAX_RETRIES")
                .map(|n| n as u32)
                .unwrap_or(defaults.max_retries),
        }
    }
}

struct Submission {
    task_id: String,
    job_id: String,
    task: Arc<dyn JobTask>,
}

/// Task ids waiting in the queue, each with its revoked flag.
type Queued = Arc<Mutex<HashMap<String, bool>>>;

/// N workers pulling from one queue. Each job runs on its own tokio task so a hard
/// time limit can abort it.
pub struct TokioWorkerPool {
    tx: mpsc::UnboundedSender<Submission>,
    queued: Queued,
}

impl TokioWorkerPool {
    /// Spawn the workers. Must be called inside a tokio runtime.
    pub fn start(ledger: Arc<JobLedger>, config: PoolConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel::<Submission>();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let queued: Queued = Arc::new(Mutex::new(HashMap::new()));

        for worker in 0..config.workers.max(1) {
            let rx = Arc::clone(&rx);
            let ledger = Arc::clone(&ledger);
            let queued = Arc::clone(&queued);
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let next = rx.lock().await.recv().await;
                    let Some(sub) = next else { break };
                    if dequeue(&queued, &sub.task_id) {
                        tracing::info!(job_id = %sub.job_id, "skipping revoked task");
                        continue;
                    }
                    run_submission(&ledger, &config, sub).await;
                }
                tracing::debug!(worker, "worker stopped");
            });
        }

        Self { tx, queued }
    }

    /// Number of submitted tasks no worker has picked up yet.
    pub fn queued_len(&self) -> usize {
        lock_queued(&self.queued).len()
    }
}

fn lock_queued(
    queued: &Mutex<HashMap<String, bool>>,
) -> std::sync::MutexGuard<'_, HashMap<String, bool>> {
    match queued.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Take `task_id` off the queue; true when it was revoked while waiting.
fn dequeue(queued: &Mutex<HashMap<String, bool>>, task_id: &str) -> bool {
    lock_queued(queued).remove(task_id).unwrap_or(false)
}

#[async_trait]
impl TaskExecutor for TokioWorkerPool {
    async fn submit(&self, job_id: &str, task: Arc<dyn JobTask>) -> Result<String, JobError> {
        let task_id = Uuid::new_v4().to_string();
        lock_queued(&self.queued).insert(task_id.clone(), false);
        let sent = self.tx.send(Submission {
            task_id: task_id.clone(),
            job_id: job_id.to_string(),
            task,
        });
        if sent.is_err() {
            lock_queued(&self.queued).remove(&task_id);
            return Err(JobError::Executor("worker channel closed".to_string()));
        }
        Ok(task_id)
    }

    /// Marks a queued task so no worker runs it. Tasks already picked up are left alone.
    async fn revoke(&self, task_id: &str) -> Result<(), JobError> {
        if let Some(revoked) = lock_queued(&self.queued).get_mut(task_id) {
            *revoked = true;
        }
        Ok(())
    }
}

async fn run_submission(ledger: &Arc<JobLedger>, config: &PoolConfig, sub: Submission) {
    let job_id = sub.job_id.clone();
    if let Err(e) = ledger
        .transition(&job_id, JobState::Pending, JobState::InProgress)
        .await
    {
        tracing::info!(job_id = %job_id, error = %e, "job not started");
        return;
    }
    tracing::info!(job_id = %job_id, name = %sub.task.name(), "job started");

    let handle = tokio::spawn(run_attempts(
        Arc::clone(ledger),
        sub.job_id,
        sub.task,
        config.max_retries,
    ));
    let abort = handle.abort_handle();
    let message = match tokio::time::timeout(config.time_limit, handle).await {
        Ok(Ok(None)) => match ledger.get_job(&job_id).await {
            Ok(job) if job.state == JobState::InProgress => {
                "Task finished without posting a result".to_string()
            }
            _ => return,
        },
        Ok(Ok(Some(message))) => message,
        Ok(Err(join_err)) => format!("Task panicked: {}", join_err),
        Err(_) => {
            abort.abort();
            format!(
                "Job exceeded time limit of {} seconds",
                config.time_limit.as_secs()
            )
        }
    };
    fail_if_in_progress(ledger, &job_id, &message).await;
}

/// Run the task until it finishes or runs out of retries. Returns a failure message
/// when the job should be failed on the task's behalf.
async fn run_attempts(
    ledger: Arc<JobLedger>,
    job_id: String,
    task: Arc<dyn JobTask>,
    max_retries: u32,
) -> Option<String> {
    let mut attempt = 0;
    loop {
        let ctx = JobContext {
            job_id: job_id.clone(),
            ledger: Arc::clone(&ledger),
            attempt,
        };
        match task.run(&ctx).await {
            Ok(()) => return None,
            Err(JobError::Retryable(reason)) if attempt < max_retries => {
                attempt += 1;
                tracing::warn!(job_id = %job_id, attempt, reason = %reason, "retrying job");
                if let Err(e) = retry(&ledger, &job_id).await {
                    tracing::info!(job_id = %job_id, error = %e, "job not retried");
                    return None;
                }
            }
            Err(e) => return Some(e.to_string()),
        }
    }
}

async fn retry(ledger: &JobLedger, job_id: &str) -> Result<(), JobError> {
    ledger
        .transition(job_id, JobState::InProgress, JobState::Retrying)
        .await?;
    ledger
        .transition(job_id, JobState::Retrying, JobState::InProgress)
        .await?;
    Ok(())
}

async fn fail_if_in_progress(ledger: &JobLedger, job_id: &str, message: &str) {
    match ledger.get_job(job_id).await {
        Ok(job) if job.state == JobState::InProgress => {
            if let Err(e) = ledger.post_job_failure(job_id, message).await {
                tracing::error!(job_id = %job_id, error = %e, "could not fail job");
            }
        }
        Ok(job) => {
            tracing::warn!(job_id = %job_id, state = %job.state, message = %message, "task error after job left In Progress");
        }
        Err(e) => tracing::error!(job_id = %job_id, error = %e, "could not load job"),
    }
}
