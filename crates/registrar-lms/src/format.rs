//! Result file formats for enrollment jobs.

use registrar_types::{CourseEnrollment, ProgramEnrollment, WriteResults};
use serde::Serialize;

/// Pretty-printed JSON with a four-space indent.
pub fn to_pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
    value.serialize(&mut ser)?;
    // serde_json only emits valid UTF-8.
    Ok(String::from_utf8_lossy(&out).into_owned())
}

/// CSV with CRLF line endings; a field is quoted only when it contains a comma,
/// a quote or a line break.
pub fn serialize_to_csv<R, F>(headers: Option<&[&str]>, rows: R) -> String
where
    R: IntoIterator<Item = Vec<F>>,
    F: AsRef<str>,
{
    let mut out = String::new();
    if let Some(headers) = headers {
        write_row(&mut out, headers.iter());
    }
    for row in rows {
        write_row(&mut out, row.iter());
    }
    out
}

fn write_row<I, F>(out: &mut String, fields: I)
where
    I: Iterator<Item = F>,
    F: AsRef<str>,
{
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(',');
        }
        let field = field.as_ref();
        if field.contains([',', '"', '\r', '\n']) {
            out.push('"');
            out.push_str(&field.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(field);
        }
    }
    out.push_str("\r\n");
}

fn bool_field(b: bool) -> String {
    let s = if b { "True" } else { "False" };
    s.to_string()
}

/// `student_key,status,account_exists[,username,email]` rows, no header.
pub fn program_enrollments_to_csv(
    enrollments: &[ProgramEnrollment],
    include_username_email: bool,
) -> String {
    serialize_to_csv(
        None,
        enrollments.iter().map(|e| {
            let mut row = vec![
                e.student_key.clone(),
                e.status.clone(),
                bool_field(e.account_exists),
            ];
            if include_username_email {
                row.push(e.username.clone().unwrap_or_default());
                row.push(e.email.clone().unwrap_or_default());
            }
            row
        }),
    )
}

/// `course_id,student_key,status,account_exists[,course_staff]` rows, no header.
pub fn course_enrollments_to_csv(enrollments: &[CourseEnrollment], include_course_staff: bool) -> String {
    serialize_to_csv(
        None,
        enrollments.iter().map(|e| {
            let mut row = vec![
                e.course_id.clone(),
                e.student_key.clone(),
                e.status.clone(),
                bool_field(e.account_exists),
            ];
            if include_course_staff {
                row.push(e.course_staff.map(bool_field).unwrap_or_default());
            }
            row
        }),
    )
}

/// `student_key,status` with a header row, ordered by student key.
pub fn enrollment_results_to_csv(results: &WriteResults) -> String {
    serialize_to_csv(
        Some(&["student_key", "status"][..]),
        results
            .iter()
            .map(|(key, outcome)| vec![key.as_str(), outcome.as_str()]),
    )
}
