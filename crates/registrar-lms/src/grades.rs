//! Validation and CSV output for course-run grades read from the LMS.

use crate::format::serialize_to_csv;
use registrar_types::{CourseGrade, GradeOutcome, LmsError};
use serde_json::{Map, Value};

const GRADE_FIELDS: [&str; 3] = ["letter_grade", "percent", "passed"];

const EXCLUSIVE_FIELDS_MESSAGE: &str = "Either ['error'] or ['letter_grade', 'percent', 'passed'] \
     are required, but they are mutually exclusive";

fn invalid(index: usize, message: impl std::fmt::Display) -> LmsError {
    LmsError::InvalidData(format!("item {}: {}", index, message))
}

/// Validate one grade item. An item carries either an `error` or all of
/// `letter_grade` (nullable), `percent` and `passed`.
pub(crate) fn parse_grade(index: usize, item: Value) -> Result<CourseGrade, LmsError> {
    let Value::Object(fields) = item else {
        return Err(invalid(index, "expected an object"));
    };
    let student_key = text(&fields, "student_key")
        .ok_or_else(|| invalid(index, "student_key is required"))?;

    let has_error = fields.contains_key("error");
    let present = GRADE_FIELDS
        .iter()
        .filter(|f| fields.contains_key(**f))
        .count();
    let outcome = match (has_error, present) {
        (true, 0) => GradeOutcome::Error {
            error: text(&fields, "error").ok_or_else(|| invalid(index, "error must be a string"))?,
        },
        (false, n) if n == GRADE_FIELDS.len() => GradeOutcome::Graded {
            letter_grade: letter_grade(&fields["letter_grade"])
                .ok_or_else(|| invalid(index, "letter_grade must be a string or null"))?,
            percent: percent(&fields["percent"]).ok_or_else(|| {
                invalid(index, "percent must be below 10 with at most 3 decimal places")
            })?,
            passed: passed(&fields["passed"])
                .ok_or_else(|| invalid(index, "passed must be a boolean"))?,
        },
        _ => return Err(invalid(index, EXCLUSIVE_FIELDS_MESSAGE)),
    };
    Ok(CourseGrade {
        student_key,
        outcome,
    })
}

/// Strings and numbers; booleans and null are rejected.
fn text(fields: &Map<String, Value>, name: &str) -> Option<String> {
    match fields.get(name)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn letter_grade(value: &Value) -> Option<Option<String>> {
    match value {
        Value::Null => Some(None),
        Value::String(s) => Some(Some(s.clone())),
        Value::Number(n) => Some(Some(n.to_string())),
        _ => None,
    }
}

/// Decimal with at most 4 digits, 3 of them after the point; rendered with exactly 3.
fn percent(value: &Value) -> Option<String> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !raw.is_finite() || raw.abs() >= 10.0 {
        return None;
    }
    let thousandths = raw * 1000.0;
    if (thousandths - thousandths.round()).abs() > 1e-6 {
        return None;
    }
    Some(format!("{:.3}", thousandths.round() / 1000.0))
}

fn passed(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64()? {
            1 => Some(true),
            0 => Some(false),
            _ => None,
        },
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "1" => Some(true),
            "false" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// `student_key,letter_grade,percent,passed,error` with a header row; absent and null
/// fields are empty.
pub fn course_grades_to_csv(grades: &[CourseGrade]) -> String {
    serialize_to_csv(
        Some(&["student_key", "letter_grade", "percent", "passed", "error"][..]),
        grades.iter().map(|g| {
            let mut row = vec![g.student_key.clone()];
            match &g.outcome {
                GradeOutcome::Graded {
                    letter_grade,
                    percent,
                    passed,
                } => row.extend([
                    letter_grade.clone().unwrap_or_default(),
                    percent.clone(),
                    if *passed { "True" } else { "False" }.to_string(),
                    String::new(),
                ]),
                GradeOutcome::Error { error } => {
                    row.extend([String::new(), String::new(), String::new(), error.clone()])
                }
            }
            row
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn graded_items() {
        let g = parse_grade(
            0,
            json!({"student_key": "alice", "letter_grade": "A", "percent": 0.95, "passed": true}),
        )
        .unwrap();
        assert_eq!(
            g.outcome,
            GradeOutcome::Graded {
                letter_grade: Some("A".to_string()),
                percent: "0.950".to_string(),
                passed: true,
            }
        );

        let g = parse_grade(
            1,
            json!({"student_key": "daryl", "letter_grade": null, "percent": "0.200", "passed": "false"}),
        )
        .unwrap();
        assert_eq!(
            g.outcome,
            GradeOutcome::Graded {
                letter_grade: None,
                percent: "0.200".to_string(),
                passed: false,
            }
        );
    }

    #[test]
    fn error_items() {
        let g = parse_grade(0, json!({"student_key": "bob", "error": "not enrolled"})).unwrap();
        assert_eq!(
            g.outcome,
            GradeOutcome::Error {
                error: "not enrolled".to_string()
            }
        );
    }

    #[test]
    fn rejects_invalid_items() {
        for item in [
            json!({"letter_grade": true, "passed": "probably not"}),
            json!({"student_key": "a"}),
            json!({"student_key": "a", "error": "x", "passed": true}),
            json!({"student_key": "a", "letter_grade": "A", "percent": 0.9}),
            json!({"student_key": "a", "letter_grade": true, "percent": 0.9, "passed": true}),
            json!({"student_key": "a", "letter_grade": "A", "percent": 0.9512, "passed": true}),
            json!({"student_key": "a", "letter_grade": "A", "percent": 12.5, "passed": true}),
            json!({"student_key": "a", "letter_grade": "A", "percent": 0.9, "passed": "maybe"}),
            json!(["a"]),
        ] {
            let err = parse_grade(3, item.clone()).unwrap_err();
            assert!(matches!(err, LmsError::InvalidData(ref m) if m.starts_with("item 3:")), "{item}");
        }
    }

    #[test]
    fn csv_rows() {
        let grades = vec![
            parse_grade(
                0,
                json!({"student_key": "alice", "letter_grade": "A", "percent": 0.95, "passed": true}),
            )
            .unwrap(),
            parse_grade(1, json!({"student_key": "bob", "error": "timeout, retry"})).unwrap(),
        ];
        assert_eq!(
            course_grades_to_csv(&grades),
            "student_key,letter_grade,percent,passed,error\r\n\
             alice,A,0.950,True,\r\n\
             bob,,,,\"timeout, retry\"\r\n"
        );
    }
}
