//! Registrar REST API server.

use registrar_api::server::{self, parse_job_readers, AppState};
use registrar_catalog::{HttpCatalogClient, ProgramDetailsCache};
use registrar_enrollments::{EnrollmentContext, EnrollmentService, InMemoryProgramDirectory};
use registrar_filestore::{filestore_from_env, JOB_RESULTS_PREFIX, STORAGE_BUCKET, UPLOADS_PREFIX};
use registrar_jobs::{
    InMemoryJobStore, JobError, JobLedger, JobManager, JobStore, PoolConfig, TokioWorkerPool,
};
use registrar_lms::{HttpLmsClient, LmsEndpoints, LmsInterop};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "sqlite")]
fn job_store() -> Result<Arc<dyn JobStore>, JobError> {
    match std::env::var("REGISTRAR_JOB_DB") {
        Ok(path) => {
            tracing::info!(path = %path, "using sqlite job store");
            Ok(Arc::new(registrar_jobs::SqliteJobStore::new(path)?))
        }
        Err(_) => Ok(Arc::new(InMemoryJobStore::new())),
    }
}

#[cfg(not(feature = "sqlite"))]
fn job_store() -> Result<Arc<dyn JobStore>, JobError> {
    Ok(Arc::new(InMemoryJobStore::new()))
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let results = filestore_from_env(STORAGE_BUCKET, JOB_RESULTS_PREFIX)?;
    let uploads = filestore_from_env(STORAGE_BUCKET, UPLOADS_PREFIX)?;
    let ledger = Arc::new(JobLedger::new(job_store()?, results));
    let pool = TokioWorkerPool::start(ledger.clone(), PoolConfig::from_env());
    let jobs = Arc::new(JobManager::new(ledger, Arc::new(pool)));

    let lms = HttpLmsClient::from_env();
    let endpoints = LmsEndpoints::new(lms.base_url());
    let directory = InMemoryProgramDirectory::from_env()?;
    tracing::info!(programs = directory.len(), "loaded program directory");
    let ctx = Arc::new(EnrollmentContext {
        directory: Arc::new(directory),
        programs: Arc::new(ProgramDetailsCache::new(Arc::new(
            HttpCatalogClient::from_env(),
        ))),
        lms: Arc::new(LmsInterop::new(Arc::new(lms), endpoints)),
        uploads,
    });

    let state = Arc::new(AppState {
        enrollments: EnrollmentService::new(ctx, jobs)
            .with_course_role_management(env_flag("REGISTRAR_COURSE_ROLE_MANAGEMENT")),
        job_readers: parse_job_readers(
            &std::env::var("REGISTRAR_JOB_READERS").unwrap_or_default(),
        ),
    });

    let app = server::router(state);
    let addr: SocketAddr = std::env::var("REGISTRAR_LISTEN")
        .unwrap_or_else(|_| "0.0.0.0:8734".to_string())
        .parse()?;
    tracing::info!("Registrar API listening on {}", addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .await?;
    Ok(())
}
