//! Enrollment operations behind the HTTP API: request validation, synchronous
//! writes, and starting read and bulk write jobs.

use crate::context::{enrollment_job_prefix, is_enrollment_job_processing, EnrollmentContext};
use crate::read::{
    ListAllCourseRunEnrollments, ListCourseRunEnrollments, ListCourseRunGrades,
    ListProgramEnrollments,
};
use crate::upload::{load_records_from_csv, CsvRecord, UPLOAD_FILE_MAX_SIZE};
use crate::write::{
    write_course_run, write_program, UploadedEnrollment, WriteCourseRunEnrollments,
    WriteProgramEnrollments,
};
use registrar_catalog::{CourseRun, ProgramDetails};
use registrar_jobs::{JobManager, JobTask};
use registrar_types::{
    EnrollmentError, EnrollmentKind, EnrollmentRecord, Program, ResultFormat, WriteMethod,
    WriteOutcome, ENROLLMENT_WRITE_MAX_SIZE,
};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// A program that exists and accepts enrollment operations.
pub struct EnrollmentProgram {
    pub program: Program,
    pub details: ProgramDetails,
}

pub struct EnrollmentService {
    ctx: Arc<EnrollmentContext>,
    jobs: Arc<JobManager>,
    course_role_management: bool,
}

impl EnrollmentService {
    pub fn new(ctx: Arc<EnrollmentContext>, jobs: Arc<JobManager>) -> Self {
        Self {
            ctx,
            jobs,
            course_role_management: false,
        }
    }

    /// Accept and report `course_staff` on course-run enrollments.
    pub fn with_course_role_management(mut self, enabled: bool) -> Self {
        self.course_role_management = enabled;
        self
    }

    pub fn context(&self) -> &Arc<EnrollmentContext> {
        &self.ctx
    }

    pub fn jobs(&self) -> &Arc<JobManager> {
        &self.jobs
    }

    /// The program for `program_key`, if it exists and enrollment is enabled for it.
    pub async fn enrollment_program(
        &self,
        program_key: &str,
    ) -> Result<EnrollmentProgram, EnrollmentError> {
        let program = self
            .ctx
            .directory
            .get_program(program_key)
            .await
            .ok_or_else(|| EnrollmentError::ProgramNotFound(program_key.to_string()))?;
        let details = self
            .ctx
            .programs
            .get_program_details(&program.discovery_uuid)
            .await;
        if !details.is_enrollment_enabled() {
            tracing::debug!(
                program_key = %program_key,
                program_uuid = %details.uuid(),
                program_type = details.program_type().unwrap_or("unknown"),
                "enrollment disabled for program"
            );
            return Err(EnrollmentError::EnrollmentDisabled(program_key.to_string()));
        }
        Ok(EnrollmentProgram { program, details })
    }

    fn course_run(ep: &EnrollmentProgram, course_id: &str) -> Result<CourseRun, EnrollmentError> {
        ep.details
            .find_course_run(course_id)
            .ok_or_else(|| EnrollmentError::CourseNotFound(course_id.to_string()))
    }

    /// Validate a write request body: a list of at most [`ENROLLMENT_WRITE_MAX_SIZE`]
    /// objects with string `student_key` and `status`. `course_staff` is read for
    /// course runs only, must be a boolean, and needs course role management.
    pub fn parse_write_request(
        &self,
        body: &Value,
        kind: EnrollmentKind,
    ) -> Result<Vec<EnrollmentRecord>, EnrollmentError> {
        let items = body.as_array().ok_or_else(|| {
            EnrollmentError::InvalidInput("expected request body type: List".to_string())
        })?;
        if items.len() > ENROLLMENT_WRITE_MAX_SIZE {
            return Err(EnrollmentError::TooManyRecords(ENROLLMENT_WRITE_MAX_SIZE));
        }
        let mut records = Vec::with_capacity(items.len());
        for item in items {
            let obj = item.as_object().ok_or_else(|| {
                EnrollmentError::InvalidInput(
                    "expected items in request to be of type Dict".to_string(),
                )
            })?;
            let text = |field: &str| {
                obj.get(field).and_then(Value::as_str).ok_or_else(|| {
                    EnrollmentError::InvalidInput(format!(
                        "expected request dicts to have string value for \"{}\"",
                        field
                    ))
                })
            };
            let mut record = EnrollmentRecord::new(text("student_key")?, text("status")?);
            if kind == EnrollmentKind::CourseRun {
                match obj.get("course_staff") {
                    None | Some(Value::Null) => {}
                    Some(Value::Bool(b)) => {
                        if !self.course_role_management {
                            return Err(EnrollmentError::CourseStaffNotAllowed);
                        }
                        record.course_staff = Some(*b);
                    }
                    Some(_) => {
                        return Err(EnrollmentError::InvalidInput(
                            "expected request dicts to have boolean value for \"course_staff\""
                                .to_string(),
                        ))
                    }
                }
            }
            records.push(record);
        }
        Ok(records)
    }

    /// Synchronous program enrollment write.
    pub async fn write_program_enrollments(
        &self,
        program_key: &str,
        method: WriteMethod,
        body: &Value,
    ) -> Result<WriteOutcome, EnrollmentError> {
        let ep = self.enrollment_program(program_key).await?;
        let records = self.parse_write_request(body, EnrollmentKind::Program)?;
        let curriculum_uuid = ep
            .details
            .active_curriculum_id()
            .ok_or_else(|| EnrollmentError::NoActiveCurriculum(program_key.to_string()))?;
        let outcome = write_program(
            &self.ctx,
            method,
            &ep.program.discovery_uuid,
            &curriculum_uuid,
            &records,
        )
        .await?;
        tracing::info!(
            program_key = %program_key,
            method = %method,
            records = records.len(),
            status = outcome.status_code(),
            "wrote program enrollments"
        );
        Ok(outcome)
    }

    /// Synchronous course-run enrollment write; `course_id` is internal or external.
    pub async fn write_course_run_enrollments(
        &self,
        program_key: &str,
        course_id: &str,
        method: WriteMethod,
        body: &Value,
    ) -> Result<WriteOutcome, EnrollmentError> {
        let ep = self.enrollment_program(program_key).await?;
        let run = Self::course_run(&ep, course_id)?;
        let records = self.parse_write_request(body, EnrollmentKind::CourseRun)?;
        let outcome = write_course_run(
            &self.ctx,
            method,
            &ep.program.discovery_uuid,
            &run.key,
            &records,
        )
        .await?;
        tracing::info!(
            program_key = %program_key,
            course_key = %run.key,
            method = %method,
            records = records.len(),
            status = outcome.status_code(),
            "wrote course run enrollments"
        );
        Ok(outcome)
    }

    /// Start a program enrollment read job; returns the job id.
    pub async fn start_program_read(
        &self,
        owner: &str,
        program_key: &str,
        fmt: Option<&str>,
        include_username_email: bool,
    ) -> Result<String, EnrollmentError> {
        let format = parse_format(fmt)?;
        let ep = self.enrollment_program(program_key).await?;
        let task = ListProgramEnrollments {
            ctx: self.ctx.clone(),
            program_key: ep.program.key,
            format,
            include_username_email,
        };
        Ok(self.jobs.start_job(owner, Arc::new(task)).await?)
    }

    /// Start a read job for one course run; `course_id` is internal or external.
    pub async fn start_course_run_read(
        &self,
        owner: &str,
        program_key: &str,
        course_id: &str,
        fmt: Option<&str>,
    ) -> Result<String, EnrollmentError> {
        let format = parse_format(fmt)?;
        let ep = self.enrollment_program(program_key).await?;
        let run = Self::course_run(&ep, course_id)?;
        let task = ListCourseRunEnrollments {
            ctx: self.ctx.clone(),
            program_key: ep.program.key,
            internal_course_key: run.key,
            external_course_key: run.external_key,
            format,
            course_role_management: self.course_role_management,
        };
        Ok(self.jobs.start_job(owner, Arc::new(task)).await?)
    }

    /// Start a read job for the grades of one course run, addressed by either key.
    pub async fn start_course_run_grades_read(
        &self,
        owner: &str,
        program_key: &str,
        course_id: &str,
        fmt: Option<&str>,
    ) -> Result<String, EnrollmentError> {
        let format = parse_format(fmt)?;
        let ep = self.enrollment_program(program_key).await?;
        let run = Self::course_run(&ep, course_id)?;
        let task = ListCourseRunGrades {
            ctx: self.ctx.clone(),
            program_key: ep.program.key,
            internal_course_key: run.key,
            format,
        };
        Ok(self.jobs.start_job(owner, Arc::new(task)).await?)
    }

    /// Start a read job over every course run in the program's active curriculum.
    pub async fn start_all_course_runs_read(
        &self,
        owner: &str,
        program_key: &str,
        fmt: Option<&str>,
    ) -> Result<String, EnrollmentError> {
        let format = parse_format(fmt)?;
        let ep = self.enrollment_program(program_key).await?;
        let task = ListAllCourseRunEnrollments {
            ctx: self.ctx.clone(),
            program_key: ep.program.key,
            format,
            course_role_management: self.course_role_management,
        };
        Ok(self.jobs.start_job(owner, Arc::new(task)).await?)
    }

    /// Start a bulk program enrollment write from a CSV upload
    /// (`student_key,status` columns).
    pub async fn start_program_upload(
        &self,
        owner: &str,
        program_key: &str,
        csv: &[u8],
    ) -> Result<String, EnrollmentError> {
        let ep = self.admit_upload(program_key, csv).await?;
        let rows = parse_upload(csv, &["student_key", "status"], &[])?;
        let requests = rows
            .into_iter()
            .map(|mut row| UploadedEnrollment {
                student_key: row.remove("student_key").unwrap_or_default(),
                status: row.remove("status").unwrap_or_default(),
                course_id: None,
                course_staff: None,
            })
            .collect::<Vec<_>>();
        let upload_path = self.store_upload(&requests).await?;
        let task = WriteProgramEnrollments {
            ctx: self.ctx.clone(),
            program_key: ep.program.key.clone(),
            upload_path: upload_path.clone(),
        };
        self.start_upload_job(owner, &ep.program.key, &upload_path, Arc::new(task))
            .await
    }

    /// Start a bulk course-run enrollment write from a CSV upload
    /// (`student_key,course_id,status` columns, optional `course_staff`).
    pub async fn start_course_run_upload(
        &self,
        owner: &str,
        program_key: &str,
        csv: &[u8],
    ) -> Result<String, EnrollmentError> {
        let ep = self.admit_upload(program_key, csv).await?;
        let rows = parse_upload(csv, &["student_key", "course_id", "status"], &["course_staff"])?;
        let mut requests = Vec::with_capacity(rows.len());
        for mut row in rows {
            let course_staff = match row.remove("course_staff") {
                Some(flag) => parse_csv_bool(&flag)?,
                None => None,
            };
            if course_staff.is_some() && !self.course_role_management {
                return Err(EnrollmentError::CourseStaffNotAllowed);
            }
            requests.push(UploadedEnrollment {
                student_key: row.remove("student_key").unwrap_or_default(),
                status: row.remove("status").unwrap_or_default(),
                course_id: row.remove("course_id"),
                course_staff,
            });
        }
        let upload_path = self.store_upload(&requests).await?;
        let task = WriteCourseRunEnrollments {
            ctx: self.ctx.clone(),
            program_key: ep.program.key.clone(),
            upload_path: upload_path.clone(),
        };
        self.start_upload_job(owner, &ep.program.key, &upload_path, Arc::new(task))
            .await
    }

    /// Size limit, program checks and the one-job-per-program rule.
    async fn admit_upload(
        &self,
        program_key: &str,
        csv: &[u8],
    ) -> Result<EnrollmentProgram, EnrollmentError> {
        let ep = self.enrollment_program(program_key).await?;
        if csv.len() > UPLOAD_FILE_MAX_SIZE {
            return Err(EnrollmentError::UploadTooLarge(UPLOAD_FILE_MAX_SIZE));
        }
        if is_enrollment_job_processing(&self.jobs, program_key).await? {
            return Err(EnrollmentError::JobInProgress(program_key.to_string()));
        }
        Ok(ep)
    }

    /// Start the write job unless another job for the program got in first, in which
    /// case the stored upload is dropped.
    async fn start_upload_job(
        &self,
        owner: &str,
        program_key: &str,
        upload_path: &str,
        task: Arc<dyn JobTask>,
    ) -> Result<String, EnrollmentError> {
        let started = self
            .jobs
            .start_exclusive_job(owner, &enrollment_job_prefix(program_key), task)
            .await?;
        match started {
            Some(job_id) => Ok(job_id),
            None => {
                if let Err(e) = self.ctx.uploads.delete(upload_path).await {
                    tracing::warn!(path = %upload_path, error = %e, "could not remove unused upload");
                }
                Err(EnrollmentError::JobInProgress(program_key.to_string()))
            }
        }
    }

    async fn store_upload(&self, requests: &[UploadedEnrollment]) -> Result<String, EnrollmentError> {
        let path = format!("{}.json", Uuid::new_v4());
        let body = serde_json::to_vec(requests)
            .map_err(|e| EnrollmentError::InvalidInput(e.to_string()))?;
        self.ctx.uploads.store(&path, &body).await?;
        Ok(path)
    }
}

fn parse_format(fmt: Option<&str>) -> Result<ResultFormat, EnrollmentError> {
    match fmt {
        None => Ok(ResultFormat::Json),
        Some(f) => ResultFormat::parse(f)
            .ok_or_else(|| EnrollmentError::UnsupportedFormat(f.to_string())),
    }
}

fn parse_upload(
    csv: &[u8],
    required: &[&str],
    optional: &[&str],
) -> Result<Vec<CsvRecord>, EnrollmentError> {
    let text = std::str::from_utf8(csv)
        .map_err(|_| EnrollmentError::InvalidInput("Invalid csv: not UTF-8".to_string()))?;
    load_records_from_csv(text, required, optional)
}

fn parse_csv_bool(value: &str) -> Result<Option<bool>, EnrollmentError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "" => Ok(None),
        "true" => Ok(Some(true)),
        "false" => Ok(Some(false)),
        other => Err(EnrollmentError::InvalidInput(format!(
            "Invalid value for course_staff: {}",
            other
        ))),
    }
}
