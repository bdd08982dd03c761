//! Read jobs: fetch enrollments or grades from the LMS and store the result file.

use crate::context::{enrollment_job_name, fail_read, EnrollmentContext, JobAccess, ReadSubject};
use async_trait::async_trait;
use registrar_jobs::{JobContext, JobError, JobTask};
use registrar_lms::{
    course_enrollments_to_csv, course_grades_to_csv, program_enrollments_to_csv, to_pretty_json,
};
use registrar_types::{CourseEnrollment, ResultFormat};
use serde::Serialize;
use std::sync::Arc;

/// Serialize and post a read result.
async fn post_result<T: Serialize>(
    job: &JobContext,
    format: ResultFormat,
    records: &[T],
    to_csv: impl FnOnce(&[T]) -> String,
) -> Result<(), JobError> {
    post_result_with_text(job, format, records, to_csv, None).await
}

async fn post_result_with_text<T: Serialize>(
    job: &JobContext,
    format: ResultFormat,
    records: &[T],
    to_csv: impl FnOnce(&[T]) -> String,
    text: Option<String>,
) -> Result<(), JobError> {
    let payload = match format {
        ResultFormat::Json => {
            to_pretty_json(records).map_err(|e| JobError::Other(e.to_string()))?
        }
        ResultFormat::Csv => to_csv(records),
    };
    job.ledger
        .post_job_success(&job.job_id, payload.as_bytes(), format.extension(), text)
        .await?;
    Ok(())
}

/// All program enrollments of one program.
pub struct ListProgramEnrollments {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    pub format: ResultFormat,
    pub include_username_email: bool,
}

#[async_trait]
impl JobTask for ListProgramEnrollments {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Read, "ListProgramEnrollments")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let enrollments = match self
            .ctx
            .lms
            .get_program_enrollments(&program.discovery_uuid, self.include_username_email)
            .await
        {
            Ok(enrollments) => enrollments,
            Err(e) => return fail_read(job, ReadSubject::Enrollment, e).await,
        };
        tracing::info!(job_id = %job.job_id, program_key = %self.program_key, count = enrollments.len(), "read program enrollments");
        let include = self.include_username_email;
        post_result(job, self.format, &enrollments, |rows| {
            program_enrollments_to_csv(rows, include)
        })
        .await
    }
}

/// Enrollments in one course run of a program.
pub struct ListCourseRunEnrollments {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    pub internal_course_key: String,
    pub external_course_key: Option<String>,
    pub format: ResultFormat,
    pub course_role_management: bool,
}

#[async_trait]
impl JobTask for ListCourseRunEnrollments {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Read, "ListCourseRunEnrollments")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let enrollments = match self
            .ctx
            .lms
            .get_course_run_enrollments(
                &program.discovery_uuid,
                &self.internal_course_key,
                self.external_course_key.as_deref(),
                self.course_role_management,
            )
            .await
        {
            Ok(enrollments) => enrollments,
            Err(e) => return fail_read(job, ReadSubject::Enrollment, e).await,
        };
        let staff = self.course_role_management;
        post_result(job, self.format, &enrollments, |rows| {
            course_enrollments_to_csv(rows, staff)
        })
        .await
    }
}

/// Enrollments in every course run of a program's active curriculum, concatenated.
pub struct ListAllCourseRunEnrollments {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    pub format: ResultFormat,
    pub course_role_management: bool,
}

#[async_trait]
impl JobTask for ListAllCourseRunEnrollments {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Read, "ListAllCourseRunEnrollments")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let details = self
            .ctx
            .programs
            .get_program_details(&program.discovery_uuid)
            .await;
        let mut results: Vec<CourseEnrollment> = Vec::new();
        for run in details.course_runs() {
            match self
                .ctx
                .lms
                .get_course_run_enrollments(
                    &program.discovery_uuid,
                    &run.key,
                    run.external_key.as_deref(),
                    self.course_role_management,
                )
                .await
            {
                Ok(enrollments) => results.extend(enrollments),
                Err(e) => return fail_read(job, ReadSubject::Enrollment, e).await,
            }
        }
        let staff = self.course_role_management;
        post_result(job, self.format, &results, |rows| {
            course_enrollments_to_csv(rows, staff)
        })
        .await
    }
}

/// Grades of every student in one course run. The result text is 200, 207, 422 or 204
/// depending on which grades the LMS could report.
pub struct ListCourseRunGrades {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    pub internal_course_key: String,
    pub format: ResultFormat,
}

#[async_trait]
impl JobTask for ListCourseRunGrades {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Read, "ListCourseRunGrades")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let grades = match self
            .ctx
            .lms
            .get_course_run_grades(&program.discovery_uuid, &self.internal_course_key)
            .await
        {
            Ok(grades) => grades,
            Err(e) => return fail_read(job, ReadSubject::Grade, e).await,
        };
        let code = grades.status_code();
        tracing::info!(
            job_id = %job.job_id,
            course_key = %self.internal_course_key,
            count = grades.grades.len(),
            code,
            "read course run grades"
        );
        post_result_with_text(
            job,
            self.format,
            &grades.grades,
            course_grades_to_csv,
            Some(code.to_string()),
        )
        .await
    }
}
