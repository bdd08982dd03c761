//! SQLite-backed job store (persistence across restarts).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use registrar_types::{Job, JobError, JobResult, JobState, JobStore, JobTransition};
use std::path::Path;

const JOB_COLUMNS: &str = "job_id, owner, name, created, state, result_url, result_text, failure";

/// SQLite-backed job store. A transition is one `UPDATE ... WHERE job_id = ? AND state = ?`.
pub struct SqliteJobStore {
    conn: std::sync::Mutex<rusqlite::Connection>,
}

impl SqliteJobStore {
    /// Open (or create) a job database at the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, JobError> {
        let conn = rusqlite::Connection::open(path).map_err(|e| JobError::Store(e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                job_id TEXT PRIMARY KEY,
                owner TEXT NOT NULL,
                name TEXT NOT NULL,
                created TEXT NOT NULL,
                state TEXT NOT NULL,
                result_url TEXT,
                result_text TEXT,
                failure TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_jobs_state ON jobs(state);
            CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner);
            "#,
        )
        .map_err(|e| JobError::Store(e.to_string()))?;

        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn with_conn<T, F>(&self, f: F) -> Result<T, JobError>
    where
        F: FnOnce(&rusqlite::Connection) -> Result<T, JobError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| JobError::Store(format!("failed to acquire lock: {}", e)))?;
        f(&conn)
    }
}

fn store_err(e: rusqlite::Error) -> JobError {
    JobError::Store(e.to_string())
}

fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<Job> {
    let created: String = row.get(3)?;
    let state: String = row.get(4)?;
    let result_url: Option<String> = row.get(5)?;
    let result_text: Option<String> = row.get(6)?;
    let created = DateTime::parse_from_rfc3339(&created)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e)))?;
    let state = JobState::parse(&state).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown job state {}", state).into(),
        )
    })?;
    Ok(Job {
        job_id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        created,
        state,
        result: result_url.map(|url| JobResult {
            url,
            text: result_text,
        }),
        failure: row.get(7)?,
    })
}

fn select_job(conn: &rusqlite::Connection, job_id: &str) -> Result<Option<Job>, JobError> {
    let sql = format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS);
    let mut stmt = conn.prepare(&sql).map_err(store_err)?;
    let mut rows = stmt
        .query_map(rusqlite::params![job_id], row_to_job)
        .map_err(store_err)?;
    rows.next().transpose().map_err(store_err)
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: Job) -> Result<(), JobError> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO jobs (job_id, owner, name, created, state, result_url, result_text, failure) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    job.job_id,
                    job.owner,
                    job.name,
                    job.created.to_rfc3339(),
                    job.state.as_str(),
                    job.result.as_ref().map(|r| r.url.clone()),
                    job.result.as_ref().and_then(|r| r.text.clone()),
                    job.failure,
                ],
            )
            .map_err(store_err)?;
            Ok(())
        })
    }

    async fn get(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        self.with_conn(|conn| select_job(conn, job_id))
    }

    async fn transition(&self, job_id: &str, transition: JobTransition) -> Result<Job, JobError> {
        self.with_conn(|conn| {
            let changed = if transition.from.can_transition_to(transition.to) {
                conn.execute(
                    "UPDATE jobs SET state = ?1, \
                     result_url = COALESCE(?2, result_url), \
                     result_text = COALESCE(?3, result_text), \
                     failure = COALESCE(?4, failure) \
                     WHERE job_id = ?5 AND state = ?6",
                    rusqlite::params![
                        transition.to.as_str(),
                        transition.result.as_ref().map(|r| r.url.clone()),
                        transition.result.as_ref().and_then(|r| r.text.clone()),
                        transition.failure,
                        job_id,
                        transition.from.as_str(),
                    ],
                )
                .map_err(store_err)?
            } else {
                0
            };
            let job =
                select_job(conn, job_id)?.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
            if changed == 0 {
                return Err(JobError::InvalidState {
                    job_id: job_id.to_string(),
                    expected: transition.from,
                    actual: job.state,
                });
            }
            Ok(job)
        })
    }

    async fn processing(&self) -> Result<Vec<Job>, JobError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM jobs WHERE state IN (?1, ?2, ?3)",
                JOB_COLUMNS
            );
            let mut stmt = conn.prepare(&sql).map_err(store_err)?;
            let [a, b, c] = JobState::PROCESSING;
            let rows = stmt
                .query_map(
                    rusqlite::params![a.as_str(), b.as_str(), c.as_str()],
                    row_to_job,
                )
                .map_err(store_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(store_err)
        })
    }
}
