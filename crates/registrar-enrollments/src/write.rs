//! Enrollment writes: status screening and the bulk write jobs.

use crate::context::{enrollment_job_name, EnrollmentContext, JobAccess};
use async_trait::async_trait;
use registrar_jobs::{JobContext, JobError, JobTask};
use registrar_lms::{enrollment_results_to_csv, serialize_to_csv};
use registrar_types::{
    EnrollmentError, EnrollmentKind, EnrollmentOutcome, EnrollmentRecord, LmsError, WriteMethod,
    WriteOutcome,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Split off records whose status is outside the vocabulary of `kind`.
///
/// Only student keys that occur once are screened; repeated keys go through so the
/// synchronizer tags them `duplicated`. The returned outcome holds the screened keys
/// as `invalid-status`.
pub fn screen_statuses(
    records: &[EnrollmentRecord],
    kind: EnrollmentKind,
) -> (Vec<EnrollmentRecord>, WriteOutcome) {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for r in records {
        *counts.entry(r.student_key.as_str()).or_default() += 1;
    }
    let mut rejected = WriteOutcome::default();
    let mut accepted = Vec::with_capacity(records.len());
    for r in records {
        if counts[r.student_key.as_str()] == 1 && !kind.is_valid_status(&r.status) {
            rejected
                .results
                .insert(r.student_key.clone(), EnrollmentOutcome::InvalidStatus);
            rejected.bad = true;
        } else {
            accepted.push(r.clone());
        }
    }
    (accepted, rejected)
}

/// Write program enrollments with status screening.
pub(crate) async fn write_program(
    ctx: &EnrollmentContext,
    method: WriteMethod,
    program_uuid: &str,
    curriculum_uuid: &str,
    records: &[EnrollmentRecord],
) -> Result<WriteOutcome, LmsError> {
    let (accepted, rejected) = screen_statuses(records, EnrollmentKind::Program);
    let mut outcome = ctx
        .lms
        .write_program_enrollments(method, program_uuid, curriculum_uuid, &accepted)
        .await?;
    outcome.merge(rejected);
    Ok(outcome)
}

/// Write course-run enrollments with status screening.
pub(crate) async fn write_course_run(
    ctx: &EnrollmentContext,
    method: WriteMethod,
    program_uuid: &str,
    course_key: &str,
    records: &[EnrollmentRecord],
) -> Result<WriteOutcome, LmsError> {
    let (accepted, rejected) = screen_statuses(records, EnrollmentKind::CourseRun);
    let mut outcome = ctx
        .lms
        .write_course_run_enrollments(method, program_uuid, course_key, &accepted)
        .await?;
    outcome.merge(rejected);
    Ok(outcome)
}

/// A request row of an uploaded enrollment file, as stored for the bulk jobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedEnrollment {
    pub student_key: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_staff: Option<bool>,
}

impl UploadedEnrollment {
    fn to_record(&self) -> EnrollmentRecord {
        EnrollmentRecord {
            course_staff: self.course_staff,
            ..EnrollmentRecord::new(&self.student_key, &self.status)
        }
    }
}

/// Load the stored upload; fails the job when it is missing or not valid JSON.
async fn load_uploaded(
    ctx: &EnrollmentContext,
    job: &JobContext,
    program_key: &str,
    path: &str,
) -> Result<Option<Vec<UploadedEnrollment>>, JobError> {
    let Some(bytes) = ctx.uploads.retrieve(path).await? else {
        job.ledger
            .post_job_failure(
                &job.job_id,
                &format!(
                    "Enrollment file for program_key={} not found at {}",
                    program_key, path
                ),
            )
            .await?;
        return Ok(None);
    };
    match serde_json::from_slice(&bytes) {
        Ok(requests) => Ok(Some(requests)),
        Err(e) => {
            tracing::warn!(job_id = %job.job_id, error = %e, "unreadable enrollment upload");
            job.ledger
                .post_job_failure(
                    &job.job_id,
                    &format!(
                        "Enrollment file for program_key={} at {} is not valid JSON",
                        program_key, path
                    ),
                )
                .await?;
            Ok(None)
        }
    }
}

fn retryable(e: LmsError) -> JobError {
    JobError::Retryable(e.to_string())
}

/// Upsert program enrollments from an uploaded file and store a results CSV.
pub struct WriteProgramEnrollments {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    /// Path of the stored upload in the uploads store.
    pub upload_path: String,
}

#[async_trait]
impl JobTask for WriteProgramEnrollments {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Write, "WriteProgramEnrollments")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let Some(requests) =
            load_uploaded(&self.ctx, job, &self.program_key, &self.upload_path).await?
        else {
            return Ok(());
        };
        let details = self
            .ctx
            .programs
            .get_program_details(&program.discovery_uuid)
            .await;
        let Some(curriculum_uuid) = details.active_curriculum_id() else {
            let err = EnrollmentError::NoActiveCurriculum(self.program_key.clone());
            return job.ledger.post_job_failure(&job.job_id, &err.to_string()).await;
        };
        let records: Vec<EnrollmentRecord> =
            requests.iter().map(UploadedEnrollment::to_record).collect();
        let outcome = write_program(
            &self.ctx,
            WriteMethod::Put,
            &program.discovery_uuid,
            &curriculum_uuid,
            &records,
        )
        .await
        .map_err(retryable)?;

        let csv = enrollment_results_to_csv(&outcome.results);
        job.ledger
            .post_job_success(
                &job.job_id,
                csv.as_bytes(),
                "csv",
                Some(outcome.job_status_text().to_string()),
            )
            .await?;
        Ok(())
    }
}

/// Upsert course-run enrollments from an uploaded file and store a results CSV.
///
/// Rows name their course run by internal or external key; rows for a course run
/// not in the program come back as `course-not-found`.
pub struct WriteCourseRunEnrollments {
    pub ctx: Arc<EnrollmentContext>,
    pub program_key: String,
    pub upload_path: String,
}

#[async_trait]
impl JobTask for WriteCourseRunEnrollments {
    fn name(&self) -> String {
        enrollment_job_name(&self.program_key, JobAccess::Write, "WriteCourseRunEnrollments")
    }

    async fn run(&self, job: &JobContext) -> Result<(), JobError> {
        let Some(program) = self.ctx.program_for_job(job, &self.program_key).await? else {
            return Ok(());
        };
        let Some(requests) =
            load_uploaded(&self.ctx, job, &self.program_key, &self.upload_path).await?
        else {
            return Ok(());
        };
        let details = self
            .ctx
            .programs
            .get_program_details(&program.discovery_uuid)
            .await;

        let include_course_staff = requests.iter().any(|r| r.course_staff.is_some());
        let mut staff_by_student: HashMap<String, Option<bool>> = HashMap::new();
        let mut by_course: Vec<(String, Vec<EnrollmentRecord>)> = Vec::new();
        for request in &requests {
            let course_id = request.course_id.clone().unwrap_or_default();
            staff_by_student.insert(request.student_key.clone(), request.course_staff);
            match by_course.iter_mut().find(|(c, _)| *c == course_id) {
                Some((_, records)) => records.push(request.to_record()),
                None => by_course.push((course_id, vec![request.to_record()])),
            }
        }

        let mut total = WriteOutcome::default();
        let mut rows: Vec<Vec<String>> = Vec::new();
        for (course_id, records) in &by_course {
            let Some(course_key) = details.get_course_key(course_id) else {
                for r in records {
                    rows.push(result_row(
                        course_id,
                        &r.student_key,
                        EnrollmentOutcome::COURSE_NOT_FOUND,
                        staff_by_student.get(&r.student_key).copied().flatten(),
                        include_course_staff,
                    ));
                }
                total.bad = true;
                continue;
            };
            let outcome = write_course_run(
                &self.ctx,
                WriteMethod::Put,
                &program.discovery_uuid,
                &course_key,
                records,
            )
            .await
            .map_err(retryable)?;
            for (student_key, result) in &outcome.results {
                rows.push(result_row(
                    course_id,
                    student_key,
                    result.as_str(),
                    staff_by_student.get(student_key).copied().flatten(),
                    include_course_staff,
                ));
            }
            total.good |= outcome.good;
            total.bad |= outcome.bad;
        }

        let mut headers = vec!["course_id", "student_key", "status"];
        if include_course_staff {
            headers.push("course_staff");
        }
        let csv = serialize_to_csv(Some(&headers[..]), rows);
        job.ledger
            .post_job_success(
                &job.job_id,
                csv.as_bytes(),
                "csv",
                Some(total.job_status_text().to_string()),
            )
            .await?;
        Ok(())
    }
}

fn result_row(
    course_id: &str,
    student_key: &str,
    status: &str,
    course_staff: Option<bool>,
    include_course_staff: bool,
) -> Vec<String> {
    let mut row = vec![
        course_id.to_string(),
        student_key.to_string(),
        status.to_string(),
    ];
    if include_course_staff {
        row.push(match course_staff {
            Some(true) => "True".to_string(),
            Some(false) => "False".to_string(),
            None => String::new(),
        });
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(key: &str, status: &str) -> EnrollmentRecord {
        EnrollmentRecord::new(key, status)
    }

    #[test]
    fn screening_tags_only_single_occurrences() {
        let records = vec![
            rec("a", "enrolled"),
            rec("b", "active"),
            rec("c", "bogus"),
            rec("c", "enrolled"),
        ];
        let (accepted, rejected) = screen_statuses(&records, EnrollmentKind::Program);
        let keys: Vec<&str> = accepted.iter().map(|r| r.student_key.as_str()).collect();
        assert_eq!(keys, vec!["a", "c", "c"]);
        assert_eq!(rejected.results.len(), 1);
        assert_eq!(rejected.results["b"], EnrollmentOutcome::InvalidStatus);
        assert!(rejected.bad);
        assert!(!rejected.good);
    }

    #[test]
    fn screening_uses_course_vocabulary() {
        let (accepted, rejected) =
            screen_statuses(&[rec("a", "active"), rec("b", "enrolled")], EnrollmentKind::CourseRun);
        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected.results["b"], EnrollmentOutcome::InvalidStatus);
    }

    #[test]
    fn course_staff_column() {
        assert_eq!(
            result_row("cs-101", "abc", "active", Some(true), true),
            vec!["cs-101", "abc", "active", "True"]
        );
        assert_eq!(
            result_row("cs-101", "abc", "active", Some(true), false),
            vec!["cs-101", "abc", "active"]
        );
    }
}
