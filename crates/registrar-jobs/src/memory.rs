//! In-memory job store: job state in a map behind one lock.

use async_trait::async_trait;
use registrar_types::{Job, JobError, JobStore, JobTransition};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory JobStore. Each transition checks and writes under the same write lock.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobError> {
        let mut guard = self.jobs.write().await;
        if guard.contains_key(&job.job_id) {
            return Err(JobError::Store(format!("duplicate job id {}", job.job_id)));
        }
        guard.insert(job.job_id.clone(), job);
        Ok(())
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        let guard = self.jobs.read().await;
        Ok(guard.get(job_id).cloned())
    }

    async fn transition(&self, job_id: &str, transition: JobTransition) -> Result<Job, JobError> {
        let mut guard = self.jobs.write().await;
        let job = guard
            .get_mut(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if job.state != transition.from || !transition.from.can_transition_to(transition.to) {
            return Err(JobError::InvalidState {
                job_id: job_id.to_string(),
                expected: transition.from,
                actual: job.state,
            });
        }
        transition.apply(job);
        Ok(job.clone())
    }

    async fn processing(&self) -> Result<Vec<Job>, JobError> {
        let guard = self.jobs.read().await;
        Ok(guard
            .values()
            .filter(|j| j.state.is_processing())
            .cloned()
            .collect())
    }
}
