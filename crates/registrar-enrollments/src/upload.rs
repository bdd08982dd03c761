//! Reading uploaded enrollment CSV files.

use registrar_types::EnrollmentError;
use std::collections::BTreeMap;

/// Largest accepted upload, in bytes.
pub const UPLOAD_FILE_MAX_SIZE: usize = 5 * 1024 * 1024;

/// One CSV row, keyed by column name.
pub type CsvRecord = BTreeMap<String, String>;

/// Parse a CSV file with a header row into records holding the `required` and
/// `optional` columns. Other columns are ignored; blank lines are skipped.
pub fn load_records_from_csv(
    text: &str,
    required: &[&str],
    optional: &[&str],
) -> Result<Vec<CsvRecord>, EnrollmentError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut rows = parse_rows(text)?.into_iter();
    let header = rows
        .next()
        .ok_or_else(|| EnrollmentError::InvalidInput("Invalid csv: file is empty".to_string()))?;
    let header: Vec<String> = header.into_iter().map(|h| h.trim().to_string()).collect();

    let missing: Vec<&str> = required
        .iter()
        .copied()
        .filter(|f| !header.iter().any(|h| h == f))
        .collect();
    if !missing.is_empty() {
        return Err(EnrollmentError::InvalidInput(format!(
            "Invalid csv headers: missing {}",
            missing.join(", ")
        )));
    }

    let mut records = Vec::new();
    for (line, row) in rows.enumerate() {
        if row.len() != header.len() {
            return Err(EnrollmentError::InvalidInput(format!(
                "Invalid csv: row {} has {} fields, expected {}",
                line + 2,
                row.len(),
                header.len()
            )));
        }
        let record: CsvRecord = header
            .iter()
            .zip(row)
            .filter(|(h, _)| required.contains(&h.as_str()) || optional.contains(&h.as_str()))
            .map(|(h, v)| (h.clone(), v))
            .collect();
        records.push(record);
    }
    Ok(records)
}

/// Split CSV text into rows of fields. Accepts CRLF or LF line endings and
/// double-quoted fields with `""` escapes.
fn parse_rows(text: &str) -> Result<Vec<Vec<String>>, EnrollmentError> {
    let mut rows = Vec::new();
    let mut row: Vec<String> = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }
        match c {
            '"' if field.is_empty() => in_quotes = true,
            ',' => row.push(std::mem::take(&mut field)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                row.push(std::mem::take(&mut field));
                push_row(&mut rows, std::mem::take(&mut row));
            }
            _ => field.push(c),
        }
    }
    if in_quotes {
        return Err(EnrollmentError::InvalidInput(
            "Invalid csv: unterminated quoted field".to_string(),
        ));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        push_row(&mut rows, row);
    }
    Ok(rows)
}

fn push_row(rows: &mut Vec<Vec<String>>, row: Vec<String>) {
    let blank = row.len() == 1 && row[0].trim().is_empty();
    if !blank {
        rows.push(row);
    }
}
