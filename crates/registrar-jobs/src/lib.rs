//! Job lifecycle: the job ledger, job stores and a tokio worker pool.
//!
//! A job is created Pending by [`JobManager::start_job`], moved to In Progress by the
//! worker that picks it up, and finalized by its task through [`JobLedger`].

mod executor;
mod ledger;
mod manager;
mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use executor::{JobContext, JobTask, PoolConfig, TaskExecutor, TokioWorkerPool};
pub use ledger::{result_path, JobLedger, Requester};
pub use manager::JobManager;
pub use memory::InMemoryJobStore;
pub use registrar_types::{Job, JobError, JobState, JobStatus, JobStore};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;
