//! Enrollment reads and writes against the LMS program enrollments API.

use crate::grades::parse_grade;
use crate::paginate::{get_all_paginated_responses, get_all_paginated_results};
use crate::sync::EnrollmentSynchronizer;
use registrar_types::{
    CourseEnrollment, CourseRunGrades, EnrollmentKind, EnrollmentRecord, LmsError, LmsTransport,
    ProgramEnrollment, WriteMethod, WriteOutcome,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;

/// URL builder for the LMS enrollment endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LmsEndpoints {
    base_url: String,
}

impl LmsEndpoints {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn program_enrollments(&self, program_uuid: &str) -> String {
        self.join(&format!(
            "api/program_enrollments/v1/programs/{}/enrollments/",
            program_uuid
        ))
    }

    pub fn course_run_enrollments(&self, program_uuid: &str, course_key: &str) -> String {
        self.join(&format!(
            "api/program_enrollments/v1/programs/{}/courses/{}/enrollments/",
            program_uuid, course_key
        ))
    }

    pub fn course_run_grades(&self, program_uuid: &str, course_key: &str) -> String {
        self.join(&format!(
            "api/program_enrollments/v1/programs/{}/courses/{}/grades/",
            program_uuid, course_key
        ))
    }

    fn join(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

/// Program and course-run enrollment operations in the LMS.
pub struct LmsInterop {
    transport: Arc<dyn LmsTransport>,
    endpoints: LmsEndpoints,
    synchronizer: EnrollmentSynchronizer,
}

impl LmsInterop {
    pub fn new(transport: Arc<dyn LmsTransport>, endpoints: LmsEndpoints) -> Self {
        let synchronizer = EnrollmentSynchronizer::new(transport.clone());
        Self {
            transport,
            endpoints,
            synchronizer,
        }
    }

    pub fn with_synchronizer(mut self, synchronizer: EnrollmentSynchronizer) -> Self {
        self.synchronizer = synchronizer;
        self
    }

    pub fn endpoints(&self) -> &LmsEndpoints {
        &self.endpoints
    }

    /// All program enrollments, validated against the program status vocabulary.
    ///
    /// `username` and `email` are required and kept only when `include_username_email`.
    pub async fn get_program_enrollments(
        &self,
        program_uuid: &str,
        include_username_email: bool,
    ) -> Result<Vec<ProgramEnrollment>, LmsError> {
        let url = self.endpoints.program_enrollments(program_uuid);
        let raw = get_all_paginated_results(self.transport.as_ref(), &url).await?;
        raw.into_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut e: ProgramEnrollment = parse_item(i, item)?;
                check_status(i, EnrollmentKind::Program, &e.status)?;
                if include_username_email {
                    require(i, "username", e.username.is_some())?;
                    require(i, "email", e.email.is_some())?;
                } else {
                    e.username = None;
                    e.email = None;
                }
                Ok(e)
            })
            .collect()
    }

    /// All enrollments in one course run, tagged with `external_course_key` when
    /// known and `internal_course_key` otherwise.
    ///
    /// `course_staff` is required and kept only when course role management is on.
    pub async fn get_course_run_enrollments(
        &self,
        program_uuid: &str,
        internal_course_key: &str,
        external_course_key: Option<&str>,
        course_role_management: bool,
    ) -> Result<Vec<CourseEnrollment>, LmsError> {
        let url = self
            .endpoints
            .course_run_enrollments(program_uuid, internal_course_key);
        let raw = get_all_paginated_results(self.transport.as_ref(), &url).await?;
        let course_id = external_course_key.unwrap_or(internal_course_key);
        raw.into_iter()
            .enumerate()
            .map(|(i, item)| {
                let mut e: CourseEnrollment = parse_item(i, item)?;
                check_status(i, EnrollmentKind::CourseRun, &e.status)?;
                if course_role_management {
                    require(i, "course_staff", e.course_staff.is_some())?;
                } else {
                    e.course_staff = None;
                }
                e.course_id = course_id.to_string();
                Ok(e)
            })
            .collect()
    }

    /// All grades in one course run. Pages answered with 422 count as failures; a 204
    /// page means there is nothing to report.
    pub async fn get_course_run_grades(
        &self,
        program_uuid: &str,
        internal_course_key: &str,
    ) -> Result<CourseRunGrades, LmsError> {
        let url = self.endpoints.course_run_grades(program_uuid, internal_course_key);
        let pages = get_all_paginated_responses(self.transport.as_ref(), &url, &[422]).await?;
        let mut grades = CourseRunGrades::default();
        let mut raw = Vec::new();
        for page in pages {
            match page.status {
                204 => return Ok(CourseRunGrades::default()),
                200 => grades.any_successes = true,
                207 => {
                    grades.any_successes = true;
                    grades.any_failures = true;
                }
                _ => grades.any_failures = true,
            }
            raw.extend(page.results);
        }
        grades.grades = raw
            .into_iter()
            .enumerate()
            .map(|(i, item)| parse_grade(i, item))
            .collect::<Result<_, _>>()?;
        Ok(grades)
    }

    /// Write program enrollments, stamping each record with the active curriculum.
    pub async fn write_program_enrollments(
        &self,
        method: WriteMethod,
        program_uuid: &str,
        curriculum_uuid: &str,
        records: &[EnrollmentRecord],
    ) -> Result<WriteOutcome, LmsError> {
        let url = self.endpoints.program_enrollments(program_uuid);
        let stamped: Vec<EnrollmentRecord> = records
            .iter()
            .cloned()
            .map(|mut r| {
                r.curriculum_uuid = Some(curriculum_uuid.to_string());
                r
            })
            .collect();
        self.synchronizer.write(method, &url, &stamped).await
    }

    /// Write enrollments for one course run, identified by its internal key.
    pub async fn write_course_run_enrollments(
        &self,
        method: WriteMethod,
        program_uuid: &str,
        course_key: &str,
        records: &[EnrollmentRecord],
    ) -> Result<WriteOutcome, LmsError> {
        let url = self.endpoints.course_run_enrollments(program_uuid, course_key);
        self.synchronizer.write(method, &url, records).await
    }
}

fn parse_item<T: DeserializeOwned>(index: usize, item: Value) -> Result<T, LmsError> {
    serde_json::from_value(item)
        .map_err(|e| LmsError::InvalidData(format!("item {}: {}", index, e)))
}

fn check_status(index: usize, kind: EnrollmentKind, status: &str) -> Result<(), LmsError> {
    if kind.is_valid_status(status) {
        Ok(())
    } else {
        Err(LmsError::InvalidData(format!(
            "item {}: \"{}\" is not a valid choice for status",
            index, status
        )))
    }
}

fn require(index: usize, field: &str, present: bool) -> Result<(), LmsError> {
    if present {
        Ok(())
    } else {
        Err(LmsError::InvalidData(format!(
            "item {}: {} is required",
            index, field
        )))
    }
}
