//! Course-run grades as read from the LMS.

use serde::Serialize;

/// One student's grade in a course run. Serializes as
/// `{student_key, letter_grade, percent, passed}` or `{student_key, error}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CourseGrade {
    pub student_key: String,
    #[serde(flatten)]
    pub outcome: GradeOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GradeOutcome {
    Graded {
        letter_grade: Option<String>,
        /// Fraction with three decimal places, e.g. `"0.950"`.
        percent: String,
        passed: bool,
    },
    Error {
        error: String,
    },
}

/// All grades of a course run, plus whether any LMS page reported successes or failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CourseRunGrades {
    pub any_successes: bool,
    pub any_failures: bool,
    pub grades: Vec<CourseGrade>,
}

impl CourseRunGrades {
    /// 200, 204, 207 or 422, recorded as the read job's result text.
    pub fn status_code(&self) -> u16 {
        match (self.any_successes, self.any_failures) {
            (true, true) => 207,
            (false, false) => 204,
            (true, false) => 200,
            (false, true) => 422,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_wire_shape() {
        let graded = CourseGrade {
            student_key: "alice".to_string(),
            outcome: GradeOutcome::Graded {
                letter_grade: None,
                percent: "0.950".to_string(),
                passed: true,
            },
        };
        assert_eq!(
            serde_json::to_string(&graded).unwrap(),
            r#"{"student_key":"alice","letter_grade":null,"percent":"0.950","passed":true}"#
        );
        let errored = CourseGrade {
            student_key: "bob".to_string(),
            outcome: GradeOutcome::Error {
                error: "timeout".to_string(),
            },
        };
        assert_eq!(
            serde_json::to_string(&errored).unwrap(),
            r#"{"student_key":"bob","error":"timeout"}"#
        );
    }

    #[test]
    fn read_status_codes() {
        let status = |any_successes, any_failures| {
            CourseRunGrades {
                any_successes,
                any_failures,
                grades: Vec::new(),
            }
            .status_code()
        };
        assert_eq!(status(true, false), 200);
        assert_eq!(status(true, true), 207);
        assert_eq!(status(false, true), 422);
        assert_eq!(status(false, false), 204);
    }
}
