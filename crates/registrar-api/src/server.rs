//! Axum server and routes.

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use registrar_enrollments::{EnrollmentService, UPLOAD_FILE_MAX_SIZE};
use registrar_filestore::{JOB_RESULTS_PREFIX, STORAGE_BUCKET};
use registrar_jobs::{JobError, JobStatus, Requester};
use registrar_types::{
    EnrollmentError, EnrollmentOutcome, ObjectStore, ObjectStoreError, WriteMethod,
    WriteOutcome,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Header carrying the authenticated user id, set by the fronting gateway.
pub const USER_HEADER: &str = "x-registrar-user";

pub struct AppState {
    pub enrollments: EnrollmentService,
    /// Users allowed to read the status of any job.
    pub job_readers: HashSet<String>,
}

impl AppState {
    fn requester(&self, user_id: String) -> Requester {
        if self.job_readers.contains(&user_id) {
            Requester::job_reader(user_id)
        } else {
            Requester::user(user_id)
        }
    }
}

/// Comma-separated user ids, as in `REGISTRAR_JOB_READERS`.
pub fn parse_job_readers(list: &str) -> HashSet<String> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Route serving job result files at the URLs the results store hands out.
pub fn result_files_route() -> String {
    format!("/media/{}/{}/*file", STORAGE_BUCKET, JOB_RESULTS_PREFIX)
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/jobs", get(handle_list_jobs))
        .route("/api/v1/jobs/:job_id", get(handle_job_status))
        .route(
            "/api/v1/programs/:program_key/enrollments",
            get(handle_read_program)
                .post(handle_write_program)
                .patch(handle_write_program)
                .put(handle_write_program),
        )
        .route(
            "/api/v1/programs/:program_key/enrollments/upload",
            post(handle_upload_program),
        )
        .route(
            "/api/v1/programs/:program_key/courses/:course_id/enrollments",
            get(handle_read_course_run)
                .post(handle_write_course_run)
                .patch(handle_write_course_run)
                .put(handle_write_course_run),
        )
        .route(
            "/api/v1/programs/:program_key/courses/:course_id/grades",
            get(handle_read_grades),
        )
        .route(
            "/api/v1/programs/:program_key/course_enrollments",
            get(handle_read_all_course_runs),
        )
        .route(
            "/api/v1/programs/:program_key/course_enrollments/upload",
            post(handle_upload_course_runs),
        )
        .route("/api/internal/cache", post(handle_clear_cache))
        .route(&result_files_route(), get(handle_result_file))
        .route("/health", get(handle_health))
        // Oversized uploads must reach the handler to get the upload size message.
        .layer(DefaultBodyLimit::max(2 * UPLOAD_FILE_MAX_SIZE))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Request failure, mapped to a status code and a JSON string body.
#[derive(Debug)]
pub enum ApiError {
    Unauthenticated,
    FileNotFound(String),
    Enrollment(EnrollmentError),
    Job(JobError),
}

impl From<EnrollmentError> for ApiError {
    fn from(e: EnrollmentError) -> Self {
        ApiError::Enrollment(e)
    }
}

impl From<JobError> for ApiError {
    fn from(e: JobError) -> Self {
        ApiError::Job(e)
    }
}

fn job_error_status(e: &JobError) -> StatusCode {
    match e {
        JobError::NotFound(_) => StatusCode::NOT_FOUND,
        JobError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthenticated => StatusCode::UNAUTHORIZED,
            ApiError::FileNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Job(e) => job_error_status(e),
            ApiError::Enrollment(e) => match e {
                EnrollmentError::ProgramNotFound(_)
                | EnrollmentError::CourseNotFound(_)
                | EnrollmentError::UnsupportedFormat(_) => StatusCode::NOT_FOUND,
                EnrollmentError::EnrollmentDisabled(_) | EnrollmentError::CourseStaffNotAllowed => {
                    StatusCode::FORBIDDEN
                }
                EnrollmentError::NoActiveCurriculum(_) | EnrollmentError::JobInProgress(_) => {
                    StatusCode::CONFLICT
                }
                EnrollmentError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                EnrollmentError::TooManyRecords(_) | EnrollmentError::UploadTooLarge(_) => {
                    StatusCode::PAYLOAD_TOO_LARGE
                }
                EnrollmentError::Lms(_) => StatusCode::BAD_GATEWAY,
                EnrollmentError::Job(e) => job_error_status(e),
                EnrollmentError::ObjectStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::Unauthenticated => "Authentication credentials were not provided.".to_string(),
            ApiError::FileNotFound(file) => format!("No result file {}", file),
            ApiError::Enrollment(e) => e.to_string(),
            ApiError::Job(e) => e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.message();
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), error = %message, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %message, "request rejected");
        }
        (status, Json(message)).into_response()
    }
}

fn authenticated_user(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .ok_or(ApiError::Unauthenticated)
}

fn write_method(method: &Method) -> WriteMethod {
    if *method == Method::PATCH {
        WriteMethod::Patch
    } else if *method == Method::PUT {
        WriteMethod::Put
    } else {
        WriteMethod::Post
    }
}

fn parse_json(body: &Bytes) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|e| {
        ApiError::Enrollment(EnrollmentError::InvalidInput(format!(
            "JSON parse error - {}",
            e
        )))
    })
}

/// 200, 207 or 422 with the per-student map. A batch the LMS rejected wholesale with a
/// plain-text body comes back as that message alone.
fn write_response(outcome: WriteOutcome) -> Response {
    let status = StatusCode::from_u16(outcome.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    if let [message] = outcome.messages.as_slice() {
        let nothing_attributed = outcome
            .results
            .values()
            .all(|r| *r == EnrollmentOutcome::InternalError);
        if status == StatusCode::UNPROCESSABLE_ENTITY && nothing_attributed {
            return (status, Json(message.clone())).into_response();
        }
    }
    (status, Json(outcome.results)).into_response()
}

/// Body of a 202 answer to a request that started a job.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobAccepted {
    pub job_id: String,
    pub job_url: String,
}

fn job_accepted(job_id: String) -> Response {
    let body = JobAccepted {
        job_url: format!("/api/v1/jobs/{}", job_id),
        job_id,
    };
    (StatusCode::ACCEPTED, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
pub struct ReadQuery {
    #[serde(default)]
    pub fmt: Option<String>,
    #[serde(default)]
    pub include_username_email: bool,
}

async fn handle_job_status(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<JobStatus>, ApiError> {
    let user = authenticated_user(&headers)?;
    let requester = state.requester(user);
    let status = state
        .enrollments
        .jobs()
        .get_job_status(&requester, &job_id)
        .await?;
    Ok(Json(status))
}

async fn handle_list_jobs(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<JobStatus>>, ApiError> {
    let user = authenticated_user(&headers)?;
    let jobs = state
        .enrollments
        .jobs()
        .get_processing_jobs_for_user(&user)
        .await?;
    Ok(Json(jobs))
}

async fn handle_read_program(
    State(state): State<Arc<AppState>>,
    Path(program_key): Path<String>,
    Query(q): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_program_read(&user, &program_key, q.fmt.as_deref(), q.include_username_email)
        .await?;
    tracing::info!(user = %user, program_key = %program_key, job_id = %job_id, "started program enrollment read");
    Ok(job_accepted(job_id))
}

async fn handle_read_course_run(
    State(state): State<Arc<AppState>>,
    Path((program_key, course_id)): Path<(String, String)>,
    Query(q): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_course_run_read(&user, &program_key, &course_id, q.fmt.as_deref())
        .await?;
    tracing::info!(
        user = %user,
        program_key = %program_key,
        course_id = %course_id,
        job_id = %job_id,
        "started course run enrollment read"
    );
    Ok(job_accepted(job_id))
}

async fn handle_read_grades(
    State(state): State<Arc<AppState>>,
    Path((program_key, course_id)): Path<(String, String)>,
    Query(q): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_course_run_grades_read(&user, &program_key, &course_id, q.fmt.as_deref())
        .await?;
    tracing::info!(
        user = %user,
        program_key = %program_key,
        course_id = %course_id,
        job_id = %job_id,
        "started course run grades read"
    );
    Ok(job_accepted(job_id))
}

async fn handle_read_all_course_runs(
    State(state): State<Arc<AppState>>,
    Path(program_key): Path<String>,
    Query(q): Query<ReadQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_all_course_runs_read(&user, &program_key, q.fmt.as_deref())
        .await?;
    tracing::info!(user = %user, program_key = %program_key, job_id = %job_id, "started course enrollments read");
    Ok(job_accepted(job_id))
}

async fn handle_write_program(
    State(state): State<Arc<AppState>>,
    Path(program_key): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticated_user(&headers)?;
    let body = parse_json(&body)?;
    let outcome = state
        .enrollments
        .write_program_enrollments(&program_key, write_method(&method), &body)
        .await?;
    Ok(write_response(outcome))
}

async fn handle_write_course_run(
    State(state): State<Arc<AppState>>,
    Path((program_key, course_id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    authenticated_user(&headers)?;
    let body = parse_json(&body)?;
    let outcome = state
        .enrollments
        .write_course_run_enrollments(&program_key, &course_id, write_method(&method), &body)
        .await?;
    Ok(write_response(outcome))
}

async fn handle_upload_program(
    State(state): State<Arc<AppState>>,
    Path(program_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_program_upload(&user, &program_key, &body)
        .await?;
    tracing::info!(user = %user, program_key = %program_key, job_id = %job_id, bytes = body.len(), "started program enrollment upload");
    Ok(job_accepted(job_id))
}

async fn handle_upload_course_runs(
    State(state): State<Arc<AppState>>,
    Path(program_key): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiError> {
    let user = authenticated_user(&headers)?;
    let job_id = state
        .enrollments
        .start_course_run_upload(&user, &program_key, &body)
        .await?;
    tracing::info!(user = %user, program_key = %program_key, job_id = %job_id, bytes = body.len(), "started course enrollment upload");
    Ok(job_accepted(job_id))
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheRequest {
    #[serde(default)]
    pub programs: Vec<String>,
}

async fn handle_clear_cache(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let user = authenticated_user(&headers)?;
    let req: ClearCacheRequest = serde_json::from_value(parse_json(&body)?).map_err(|e| {
        ApiError::Enrollment(EnrollmentError::InvalidInput(e.to_string()))
    })?;
    let count = req.programs.len();
    state
        .enrollments
        .context()
        .programs
        .clear_cached_program_details(req.programs)
        .await;
    tracing::info!(user = %user, count, "cleared cached program details");
    Ok(StatusCode::NO_CONTENT)
}

fn content_type(file: &str) -> &'static str {
    match file.rsplit('.').next() {
        Some("csv") => "text/csv; charset=utf-8",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

/// Result files are not tied to an identity: job ids are unguessable, and the URL is
/// what the job status hands to its poller.
async fn handle_result_file(
    State(state): State<Arc<AppState>>,
    Path(file): Path<String>,
) -> Result<Response, ApiError> {
    let results = state.enrollments.jobs().ledger().results();
    let bytes = match results.retrieve(&file).await {
        Ok(Some(bytes)) => bytes,
        Ok(None) | Err(ObjectStoreError::InvalidPath(_)) => {
            return Err(ApiError::FileNotFound(file))
        }
        Err(e) => return Err(ApiError::Enrollment(EnrollmentError::ObjectStore(e))),
    };
    Ok(([(header::CONTENT_TYPE, content_type(&file))], bytes).into_response())
}

async fn handle_health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_readers_list() {
        let readers = parse_job_readers(" staff, ops ,,");
        assert_eq!(readers.len(), 2);
        assert!(readers.contains("staff"));
        assert!(readers.contains("ops"));
    }

    #[test]
    fn error_status_codes() {
        let cases = [
            (EnrollmentError::TooManyRecords(25), StatusCode::PAYLOAD_TOO_LARGE),
            (EnrollmentError::CourseStaffNotAllowed, StatusCode::FORBIDDEN),
            (EnrollmentError::UnsupportedFormat("xml".into()), StatusCode::NOT_FOUND),
            (EnrollmentError::JobInProgress("p".into()), StatusCode::CONFLICT),
            (
                EnrollmentError::Job(JobError::PermissionDenied("j".into())),
                StatusCode::FORBIDDEN,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
        assert_eq!(ApiError::Unauthenticated.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn wholesale_rejection_returns_message() {
        let mut outcome = WriteOutcome {
            bad: true,
            ..Default::default()
        };
        outcome
            .results
            .insert("a".to_string(), EnrollmentOutcome::InternalError);
        outcome.messages.push("program not accepting".to_string());
        assert_eq!(write_response(outcome).status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn result_file_types() {
        assert_eq!(result_files_route(), "/media/registrar/job-results/*file");
        assert_eq!(content_type("j.csv"), "text/csv; charset=utf-8");
        assert_eq!(content_type("j.json"), "application/json");
        assert_eq!(content_type("j"), "application/octet-stream");
    }

    #[test]
    fn methods_map_to_write_semantics() {
        assert_eq!(write_method(&Method::POST), WriteMethod::Post);
        assert_eq!(write_method(&Method::PATCH), WriteMethod::Patch);
        assert_eq!(write_method(&Method::PUT), WriteMethod::Put);
    }
}
