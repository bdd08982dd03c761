//! Enrollment records, write outcomes, and read result shapes.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

/// Statuses accepted for program enrollments.
pub const PROGRAM_ENROLLMENT_STATUSES: &[&str] =
    &["enrolled", "pending", "suspended", "canceled", "ended"];

/// Statuses accepted for course-run enrollments.
pub const COURSE_ENROLLMENT_STATUSES: &[&str] = &["active", "inactive"];

/// Largest number of records accepted by a synchronous write request.
pub const ENROLLMENT_WRITE_MAX_SIZE: usize = 25;

/// Largest sub-batch sent to the LMS in one write call.
pub const LMS_ENROLLMENT_WRITE_MAX_SIZE: usize = 25;

/// Which enrollment collection a record belongs to; selects the status vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentKind {
    Program,
    CourseRun,
}

impl EnrollmentKind {
    pub fn statuses(self) -> &'static [&'static str] {
        match self {
            EnrollmentKind::Program => PROGRAM_ENROLLMENT_STATUSES,
            EnrollmentKind::CourseRun => COURSE_ENROLLMENT_STATUSES,
        }
    }

    pub fn is_valid_status(self, status: &str) -> bool {
        self.statuses().contains(&status)
    }
}

/// One learner's desired enrollment state, as sent to the LMS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentRecord {
    pub student_key: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_staff: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curriculum_uuid: Option<String>,
}

impl EnrollmentRecord {
    pub fn new(student_key: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            student_key: student_key.into(),
            status: status.into(),
            course_staff: None,
            curriculum_uuid: None,
        }
    }
}

/// Write semantics requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteMethod {
    /// Create enrollments.
    Post,
    /// Update existing enrollments.
    Patch,
    /// Create or update.
    Put,
}

impl WriteMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteMethod::Post => "POST",
            WriteMethod::Patch => "PATCH",
            WriteMethod::Put => "PUT",
        }
    }
}

impl std::fmt::Display for WriteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-student result of a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnrollmentOutcome {
    /// Status reported by the LMS.
    Status(String),
    /// The student key appeared more than once in the request.
    Duplicated,
    /// The requested status is not in the vocabulary.
    InvalidStatus,
    /// The record was sent but no attributable response came back.
    InternalError,
    /// The course id in a bulk course-run write did not match any course run.
    CourseNotFound,
}

impl EnrollmentOutcome {
    pub const DUPLICATED: &'static str = "duplicated";
    pub const INVALID_STATUS: &'static str = "invalid-status";
    pub const INTERNAL_ERROR: &'static str = "internal-error";
    pub const COURSE_NOT_FOUND: &'static str = "course-not-found";

    pub fn as_str(&self) -> &str {
        match self {
            EnrollmentOutcome::Status(s) => s.as_str(),
            EnrollmentOutcome::Duplicated => Self::DUPLICATED,
            EnrollmentOutcome::InvalidStatus => Self::INVALID_STATUS,
            EnrollmentOutcome::InternalError => Self::INTERNAL_ERROR,
            EnrollmentOutcome::CourseNotFound => Self::COURSE_NOT_FOUND,
        }
    }
}

impl From<&str> for EnrollmentOutcome {
    fn from(s: &str) -> Self {
        match s {
            Self::DUPLICATED => EnrollmentOutcome::Duplicated,
            Self::INVALID_STATUS => EnrollmentOutcome::InvalidStatus,
            Self::INTERNAL_ERROR => EnrollmentOutcome::InternalError,
            Self::COURSE_NOT_FOUND => EnrollmentOutcome::CourseNotFound,
            other => EnrollmentOutcome::Status(other.to_string()),
        }
    }
}

impl std::fmt::Display for EnrollmentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnrollmentOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnrollmentOutcome {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(EnrollmentOutcome::from(s.as_str()))
    }
}

/// Mapping from student key to outcome, ordered by student key.
pub type WriteResults = BTreeMap<String, EnrollmentOutcome>;

/// Aggregated result of a batched write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteOutcome {
    /// At least one record was written.
    pub good: bool,
    /// At least one record was not written.
    pub bad: bool,
    pub results: WriteResults,
    /// Plain-text error bodies returned by the LMS for batches it rejected wholesale.
    pub messages: Vec<String>,
}

impl WriteOutcome {
    /// HTTP status for a synchronous write: 200, 207 or 422.
    pub fn status_code(&self) -> u16 {
        match (self.good, self.bad) {
            (true, false) => 200,
            (true, true) => 207,
            (false, _) => 422,
        }
    }

    /// Status string recorded on bulk write jobs; `204` when nothing was written or rejected.
    pub fn job_status_text(&self) -> &'static str {
        match (self.good, self.bad) {
            (true, true) => "207",
            (true, false) => "200",
            (false, true) => "422",
            (false, false) => "204",
        }
    }

    /// Fold another outcome into this one.
    pub fn merge(&mut self, other: WriteOutcome) {
        self.good |= other.good;
        self.bad |= other.bad;
        self.results.extend(other.results);
        self.messages.extend(other.messages);
    }
}

/// File format of an enrollment read result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultFormat {
    #[default]
    Json,
    Csv,
}

impl ResultFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ResultFormat::Json => "json",
            ResultFormat::Csv => "csv",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(ResultFormat::Json),
            "csv" => Some(ResultFormat::Csv),
            _ => None,
        }
    }
}

/// Program enrollment as read from the LMS. Fields are declared in key order so
/// JSON output is key-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramEnrollment {
    pub account_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub status: String,
    pub student_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

/// Course-run enrollment as read from the LMS, tagged with the course id it was read for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseEnrollment {
    #[serde(default)]
    pub course_id: String,
    pub student_key: String,
    pub status: String,
    pub account_exists: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub course_staff: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_round_trips_through_tags() {
        assert_eq!(EnrollmentOutcome::from("duplicated"), EnrollmentOutcome::Duplicated);
        assert_eq!(
            EnrollmentOutcome::from("internal-error"),
            EnrollmentOutcome::InternalError
        );
        assert_eq!(
            EnrollmentOutcome::from("enrolled"),
            EnrollmentOutcome::Status("enrolled".to_string())
        );
        let mut results = WriteResults::new();
        results.insert("b".to_string(), EnrollmentOutcome::InvalidStatus);
        results.insert("a".to_string(), EnrollmentOutcome::Status("pending".to_string()));
        assert_eq!(
            serde_json::to_string(&results).unwrap(),
            r#"{"a":"pending","b":"invalid-status"}"#
        );
    }

    #[test]
    fn status_code_derivation() {
        let outcome = |good, bad| WriteOutcome {
            good,
            bad,
            ..WriteOutcome::default()
        };
        assert_eq!(outcome(true, false).status_code(), 200);
        assert_eq!(outcome(true, true).status_code(), 207);
        assert_eq!(outcome(false, true).status_code(), 422);
        assert_eq!(outcome(false, false).job_status_text(), "204");
    }

    #[test]
    fn status_vocabularies() {
        assert!(EnrollmentKind::Program.is_valid_status("enrolled"));
        assert!(!EnrollmentKind::Program.is_valid_status("active"));
        assert!(EnrollmentKind::CourseRun.is_valid_status("inactive"));
        assert!(!EnrollmentKind::CourseRun.is_valid_status("pending"));
    }

    #[test]
    fn program_enrollment_json_is_key_sorted() {
        let e = ProgramEnrollment {
            account_exists: true,
            email: None,
            status: "enrolled".to_string(),
            student_key: "abcd".to_string(),
            username: None,
        };
        assert_eq!(
            serde_json::to_string(&e).unwrap(),
            r#"{"account_exists":true,"status":"enrolled","student_key":"abcd"}"#
        );
    }
}
