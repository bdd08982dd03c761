//! Read-only view over a program payload from the catalog.

use serde_json::Value;
use std::sync::Arc;

/// Program type for which enrollment writes are enabled.
const ENROLLMENT_ENABLED_PROGRAM_TYPE: &str = "Masters";

/// A course run in a program's active curriculum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseRun {
    /// Internal course key, e.g. `course-v1:ABCx+Subject-101+Term`.
    pub key: String,
    pub external_key: Option<String>,
}

/// Catalog details of one program. Empty when the catalog could not provide them.
#[derive(Debug, Clone)]
pub struct ProgramDetails {
    uuid: String,
    data: Arc<Value>,
}

impl ProgramDetails {
    pub fn new(uuid: impl Into<String>, data: Arc<Value>) -> Self {
        Self {
            uuid: uuid.into(),
            data,
        }
    }

    pub fn empty(uuid: impl Into<String>) -> Self {
        Self::new(uuid, Arc::new(Value::Object(Default::default())))
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn is_empty(&self) -> bool {
        self.data.as_object().map_or(true, |o| o.is_empty())
    }

    pub fn program_type(&self) -> Option<&str> {
        self.data.get("type").and_then(Value::as_str)
    }

    /// Enrollment is enabled only for Master's degree programs.
    pub fn is_enrollment_enabled(&self) -> bool {
        self.program_type() == Some(ENROLLMENT_ENABLED_PROGRAM_TYPE)
    }

    /// First curriculum flagged `is_active`.
    pub fn active_curriculum(&self) -> Option<&Value> {
        self.data
            .get("curricula")
            .and_then(Value::as_array)?
            .iter()
            .find(|c| c.get("is_active").and_then(Value::as_bool).unwrap_or(false))
    }

    /// UUID of the active curriculum in hyphenated form, or `None` if there is no
    /// active curriculum or its uuid is malformed.
    pub fn active_curriculum_id(&self) -> Option<String> {
        let raw = self.active_curriculum()?.get("uuid")?.as_str()?;
        uuid::Uuid::parse_str(raw).ok().map(|u| u.to_string())
    }

    /// Course runs of every course in the active curriculum, in catalog order.
    pub fn course_runs(&self) -> Vec<CourseRun> {
        let Some(curriculum) = self.active_curriculum() else {
            return Vec::new();
        };
        let courses = curriculum
            .get("courses")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        courses
            .iter()
            .filter_map(|course| course.get("course_runs").and_then(Value::as_array))
            .flatten()
            .filter_map(|run| {
                let key = run.get("key").and_then(Value::as_str)?;
                Some(CourseRun {
                    key: key.to_string(),
                    external_key: run
                        .get("external_key")
                        .and_then(Value::as_str)
                        .map(String::from),
                })
            })
            .collect()
    }

    /// Course run whose internal key or external key equals `course_id`.
    pub fn find_course_run(&self, course_id: &str) -> Option<CourseRun> {
        self.course_runs()
            .into_iter()
            .find(|run| run.key == course_id || run.external_key.as_deref() == Some(course_id))
    }

    /// Internal key of the course run identified by `course_id` (internal or external).
    pub fn get_course_key(&self, course_id: &str) -> Option<String> {
        self.find_course_run(course_id).map(|run| run.key)
    }

    /// External key of the course run identified by `course_id` (internal or external).
    pub fn get_external_course_key(&self, course_id: &str) -> Option<String> {
        self.find_course_run(course_id).and_then(|run| run.external_key)
    }
}

#[cfg(test)]
pub(crate) fn sample_program(program_type: &str) -> Value {
    serde_json::json!({
        "title": "Master's in Computer Science",
        "type": program_type,
        "curricula": [
            {"uuid": "00000000-0000-0000-0000-000000000001", "is_active": false, "courses": []},
            {
                "uuid": "77777777-AAAA-BBBB-CCCC-123412341234",
                "is_active": true,
                "courses": [
                    {"course_runs": [
                        {"key": "course-v1:ABCx+CS-101+Fall", "external_key": "cs-101-fall"},
                    ]},
                    {"course_runs": [
                        {"key": "course-v1:ABCx+CS-201+Fall", "external_key": null},
                        {"key": "course-v1:ABCx+CS-201+Spring", "external_key": "cs-201-spring"},
                    ]},
                ],
            },
        ],
    })
}
