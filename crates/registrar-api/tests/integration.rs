//! Integration tests: enrollment writes, read jobs, uploads, job status, identity.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use registrar_api::server::{self, parse_job_readers, AppState};
use registrar_catalog::{MockCatalogClient, ProgramDetailsCache};
use registrar_enrollments::{EnrollmentContext, EnrollmentService, InMemoryProgramDirectory};
use registrar_filestore::{InMemoryObjectStore, JOB_RESULTS_PREFIX, UPLOADS_PREFIX};
use registrar_jobs::{
    result_path, InMemoryJobStore, JobError, JobLedger, JobManager, JobTask, PoolConfig,
    TaskExecutor, TokioWorkerPool,
};
use registrar_lms::{LmsEndpoints, LmsInterop, LmsResponse, MockLmsTransport};
use registrar_types::ObjectStore;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

const MASTERS_UUID: &str = "88888888-4444-2222-3333-000000000000";

fn catalog_program() -> Value {
    json!({
        "title": "Master's in Computer Science",
        "type": "Masters",
        "curricula": [{
            "uuid": "77777777-aaaa-bbbb-cccc-123412341234",
            "is_active": true,
            "courses": [
                {"course_runs": [{"key": "course-v1:ABCx+CS-101+Fall", "external_key": "cs-101-fall"}]},
            ],
        }],
    })
}

/// Executor that keeps every job Pending.
struct ParkedExecutor;

#[async_trait]
impl TaskExecutor for ParkedExecutor {
    async fn submit(&self, job_id: &str, _task: Arc<dyn JobTask>) -> Result<String, JobError> {
        Ok(format!("parked-{job_id}"))
    }

    async fn revoke(&self, _task_id: &str) -> Result<(), JobError> {
        Ok(())
    }
}

struct TestApp {
    router: axum::Router,
    results: Arc<InMemoryObjectStore>,
}

fn test_app_with(lms: MockLmsTransport, run_jobs: bool) -> TestApp {
    let ctx = Arc::new(EnrollmentContext {
        directory: Arc::new(
            InMemoryProgramDirectory::new().with_program("masters-in-cs", MASTERS_UUID),
        ),
        programs: Arc::new(ProgramDetailsCache::new(Arc::new(
            MockCatalogClient::new().with_program(MASTERS_UUID, catalog_program()),
        ))),
        lms: Arc::new(LmsInterop::new(
            Arc::new(lms),
            LmsEndpoints::new("http://lms"),
        )),
        uploads: Arc::new(InMemoryObjectStore::new("registrar", UPLOADS_PREFIX)),
    });
    let results = Arc::new(InMemoryObjectStore::new("registrar", JOB_RESULTS_PREFIX));
    let ledger = Arc::new(JobLedger::new(
        Arc::new(InMemoryJobStore::new()),
        results.clone(),
    ));
    let executor: Arc<dyn TaskExecutor> = if run_jobs {
        Arc::new(TokioWorkerPool::start(ledger.clone(), PoolConfig::default()))
    } else {
        Arc::new(ParkedExecutor)
    };
    let jobs = Arc::new(JobManager::new(ledger, executor));
    let state = Arc::new(AppState {
        enrollments: EnrollmentService::new(ctx, jobs),
        job_readers: parse_job_readers("staff"),
    });
    TestApp {
        router: server::router(state),
        results,
    }
}

fn test_app() -> TestApp {
    test_app_with(MockLmsTransport::new(), true)
}

fn request(method: &str, uri: &str, user: Option<&str>, body: Body) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(user) = user {
        builder = builder.header("x-registrar-user", user);
    }
    builder.body(body).unwrap()
}

async fn send(app: &TestApp, req: Request<Body>) -> (StatusCode, Value) {
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let body = res.into_body().collect().await.unwrap().to_bytes();
    let j = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, j)
}

/// GET `uri` without an identity; status, content type and raw body.
async fn fetch(app: &TestApp, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let res = app.router.clone().oneshot(req).await.unwrap();
    let status = res.status();
    let content_type = res
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    let body = res.into_body().collect().await.unwrap().to_bytes();
    (status, content_type, body.to_vec())
}

async fn wait_for_state(app: &TestApp, job_id: &str, user: &str, state: &str) -> Value {
    for _ in 0..200 {
        let (status, j) = send(
            app,
            request("GET", &format!("/api/v1/jobs/{job_id}"), Some(user), Body::empty()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        if j["state"] == state {
            return j;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {job_id} never reached {state}");
}

#[tokio::test]
async fn missing_identity_is_unauthorized() {
    let app = test_app();
    let (status, _) = send(&app, request("GET", "/api/v1/jobs", None, Body::empty())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn health() {
    let app = test_app();
    let res = app
        .router
        .clone()
        .oneshot(request("GET", "/health", None, Body::empty()))
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn duplicated_student_key_gives_multi_status() {
    let app = test_app();
    let body = json!([
        {"student_key": "A", "status": "enrolled"},
        {"student_key": "B", "status": "pending"},
        {"student_key": "A", "status": "enrolled"},
    ]);
    let (status, j) = send(
        &app,
        request(
            "POST",
            "/api/v1/programs/masters-in-cs/enrollments",
            Some("alice"),
            Body::from(body.to_string()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::MULTI_STATUS);
    assert_eq!(j, json!({"A": "duplicated", "B": "pending"}));
}

#[tokio::test]
async fn too_many_records_is_payload_too_large() {
    let app = test_app();
    let body = Value::Array(
        (0..30)
            .map(|i| json!({"student_key": format!("s{i}"), "status": "enrolled"}))
            .collect(),
    );
    let (status, j) = send(
        &app,
        request(
            "PUT",
            "/api/v1/programs/masters-in-cs/enrollments",
            Some("alice"),
            Body::from(body.to_string()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(j, json!("Enrollment limit 25"));
}

#[tokio::test]
async fn malformed_write_body_is_bad_request() {
    let app = test_app();
    for body in ["not json", "{\"student_key\": \"a\"}"] {
        let (status, _) = send(
            &app,
            request(
                "POST",
                "/api/v1/programs/masters-in-cs/enrollments",
                Some("alice"),
                Body::from(body),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }
}

#[tokio::test]
async fn wholesale_lms_rejection_returns_its_message() {
    let lms = MockLmsTransport::new().then_respond(LmsResponse::new(422, "curriculum closed"));
    let app = test_app_with(lms, true);
    let body = json!([{"student_key": "a", "status": "enrolled"}]);
    let (status, j) = send(
        &app,
        request(
            "POST",
            "/api/v1/programs/masters-in-cs/enrollments",
            Some("alice"),
            Body::from(body.to_string()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(j, json!("curriculum closed"));
}

#[tokio::test]
async fn course_run_write_and_unknown_course() {
    let app = test_app();
    let body = json!([{"student_key": "a", "status": "active"}]);
    let (status, j) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/programs/masters-in-cs/courses/cs-101-fall/enrollments",
            Some("alice"),
            Body::from(body.to_string()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j, json!({"a": "active"}));

    let (status, _) = send(
        &app,
        request(
            "PATCH",
            "/api/v1/programs/masters-in-cs/courses/cs-999/enrollments",
            Some("alice"),
            Body::from(body.to_string()),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_program_is_not_found() {
    let app = test_app();
    let (status, _) = send(
        &app,
        request("GET", "/api/v1/programs/nope/enrollments", Some("alice"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn read_job_produces_csv_result() {
    let url = LmsEndpoints::new("http://lms").program_enrollments(MASTERS_UUID);
    let lms = MockLmsTransport::new().with_get(
        &url,
        LmsResponse::new(
            200,
            json!({
                "next": null,
                "results": [{"student_key": "abcd", "status": "enrolled", "account_exists": true}],
            })
            .to_string(),
        ),
    );
    let app = test_app_with(lms, true);
    let (status, j) = send(
        &app,
        request(
            "GET",
            "/api/v1/programs/masters-in-cs/enrollments?fmt=csv",
            Some("alice"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = j["job_id"].as_str().unwrap().to_string();
    assert_eq!(j["job_url"], format!("/api/v1/jobs/{job_id}"));

    let job = wait_for_state(&app, &job_id, "alice", "Succeeded").await;
    let result_url = job["result"].as_str().unwrap();
    assert_eq!(result_url, format!("/media/registrar/job-results/{job_id}.csv"));
    let (status, content_type, bytes) = fetch(&app, result_url).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/csv; charset=utf-8"));
    assert_eq!(bytes, b"abcd,enrolled,True\r\n");
    let stored = app
        .results
        .retrieve(&result_path(&job_id, "csv"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, b"abcd,enrolled,True\r\n");

    let (status, _) = send(
        &app,
        request("GET", &format!("/api/v1/jobs/{job_id}"), Some("mallory"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = send(
        &app,
        request("GET", &format!("/api/v1/jobs/{job_id}"), Some("staff"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn grades_read_reports_status_text() {
    let url = LmsEndpoints::new("http://lms")
        .course_run_grades(MASTERS_UUID, "course-v1:ABCx+CS-101+Fall");
    let lms = MockLmsTransport::new().with_get(
        &url,
        LmsResponse::new(
            422,
            json!({"next": null, "results": [{"student_key": "abcd", "error": "no grade"}]})
                .to_string(),
        ),
    );
    let app = test_app_with(lms, true);
    let (status, j) = send(
        &app,
        request(
            "GET",
            "/api/v1/programs/masters-in-cs/courses/cs-101-fall/grades",
            Some("alice"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = j["job_id"].as_str().unwrap().to_string();

    let job = wait_for_state(&app, &job_id, "alice", "Succeeded").await;
    assert_eq!(job["text"], "422");
    let (status, content_type, bytes) = fetch(&app, job["result"].as_str().unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    let grades: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(grades, json!([{"student_key": "abcd", "error": "no grade"}]));

    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/v1/programs/masters-in-cs/courses/nope/grades",
            Some("alice"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let app = test_app();
    let (status, _) = send(
        &app,
        request("GET", "/api/v1/jobs/no-such-job", Some("alice"), Body::empty()),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsupported_format_is_not_found() {
    let app = test_app();
    let (status, _) = send(
        &app,
        request(
            "GET",
            "/api/v1/programs/masters-in-cs/course_enrollments?fmt=xml",
            Some("alice"),
            Body::empty(),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_conflicts_while_job_processing() {
    let app = test_app_with(MockLmsTransport::new(), false);
    let csv = "student_key,status\r\na,enrolled\r\n";
    let uri = "/api/v1/programs/masters-in-cs/enrollments/upload";

    let (status, j) = send(&app, request("POST", uri, Some("alice"), Body::from(csv))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = j["job_id"].as_str().unwrap().to_string();

    let (status, j) = send(&app, request("POST", uri, Some("alice"), Body::from(csv))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(j, json!("Job already in progress for program"));

    let (status, j) = send(&app, request("GET", "/api/v1/jobs", Some("alice"), Body::empty())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(j[0]["job_id"], job_id.as_str());
    assert_eq!(j[0]["state"], "Pending");
}

#[tokio::test]
async fn oversized_upload_is_payload_too_large() {
    let app = test_app_with(MockLmsTransport::new(), false);
    let mut csv = String::from("student_key,status\n");
    csv.push_str(&"x".repeat(registrar_enrollments::UPLOAD_FILE_MAX_SIZE));
    let (status, _) = send(
        &app,
        request(
            "POST",
            "/api/v1/programs/masters-in-cs/course_enrollments/upload",
            Some("alice"),
            Body::from(csv),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn upload_job_records_status_text() {
    let app = test_app();
    let csv = "student_key,course_id,status\na,cs-101-fall,active\nb,cs-999,inactive\n";
    let (status, j) = send(
        &app,
        request(
            "POST",
            "/api/v1/programs/masters-in-cs/course_enrollments/upload",
            Some("alice"),
            Body::from(csv),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = j["job_id"].as_str().unwrap().to_string();
    let job = wait_for_state(&app, &job_id, "alice", "Succeeded").await;
    assert_eq!(job["text"], "207");
}

#[tokio::test]
async fn cache_invalidation() {
    let app = test_app();
    let body = json!({"programs": [MASTERS_UUID]});
    let (status, _) = send(
        &app,
        request("POST", "/api/internal/cache", Some("staff"), Body::from(body.to_string())),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn missing_result_files_are_not_found() {
    let app = test_app();
    app.results.store("known.json", b"[]").await.unwrap();
    let (status, content_type, bytes) = fetch(&app, "/media/registrar/job-results/known.json").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("application/json"));
    assert_eq!(bytes, b"[]");

    for uri in [
        "/media/registrar/job-results/unknown.csv",
        "/media/registrar/job-results/..%2Fuploads%2Fsecret.json",
        "/media/registrar/uploads/known.json",
    ] {
        let (status, _, _) = fetch(&app, uri).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
    }
}
