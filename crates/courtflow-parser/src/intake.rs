//! Structural checks run on an uploaded file before any row is validated.

use std::collections::HashSet;
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::Serialize;

use crate::errors::ParserError;
use crate::model::RawCaseRow;
use crate::schema::{is_known_column, REQUIRED_COLUMNS};

const ALLOWED_CONTENT_TYPES: [&str; 4] = [
    "text/csv",
    "application/csv",
    "application/vnd.ms-excel",
    "text/plain",
];

#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub filename: &'a str,
    pub content_type: Option<&'a str>,
    pub contents: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeLimits {
    pub max_file_size_bytes: u64,
    pub max_rows: usize,
    pub sample_rows: usize,
}

impl Default for IntakeLimits {
    fn default() -> Self {
        Self {
            max_file_size_bytes: 10 * 1024 * 1024,
            max_rows: 50_000,
            sample_rows: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    FileType,
    FileSize,
    Encoding,
    MissingColumn,
    DuplicateColumn,
    UnknownColumn,
    UnterminatedQuote,
    ColumnCount,
    RowCount,
    Malformed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuralIssue {
    pub kind: IssueKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub message: String,
    pub suggestion: String,
}

impl StructuralIssue {
    fn new(kind: IssueKind, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            kind,
            line: None,
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileValidationReport {
    pub is_valid: bool,
    pub errors: Vec<StructuralIssue>,
    pub warnings: Vec<StructuralIssue>,
    pub header: Vec<String>,
    pub data_row_count: usize,
    pub sample_rows: Vec<RawCaseRow>,
}

impl FileValidationReport {
    fn finish(mut self) -> Self {
        self.is_valid = self.errors.is_empty();
        self
    }
}

/// Checks file type, size, encoding, header and a bounded sample of rows.
///
/// Every structural problem found is reported together; row-level schema
/// validation is never attempted here.
pub fn validate_file(upload: &Upload<'_>, limits: &IntakeLimits) -> FileValidationReport {
    let mut report = FileValidationReport::default();

    check_file_type(upload, &mut report);

    let size = upload.contents.len() as u64;
    if size == 0 {
        report.errors.push(StructuralIssue::new(
            IssueKind::FileSize,
            "File is empty",
            "Upload a CSV file that contains a header row and at least one data row",
        ));
        return report.finish();
    }
    if size > limits.max_file_size_bytes {
        report.errors.push(StructuralIssue::new(
            IssueKind::FileSize,
            format!(
                "File is {} bytes, above the {} byte limit",
                size, limits.max_file_size_bytes
            ),
            "Split the file into smaller uploads",
        ));
        return report.finish();
    }

    let text = match decode(upload.contents) {
        Ok(text) => text,
        Err(err) => {
            report.errors.push(StructuralIssue::new(
                IssueKind::Encoding,
                format!("File is not valid UTF-8: {err}"),
                "Save the file as CSV UTF-8 and upload it again",
            ));
            return report.finish();
        }
    };

    let unterminated = find_unterminated_quote(text);
    if let Some(line) = unterminated {
        report.errors.push(
            StructuralIssue::new(
                IssueKind::UnterminatedQuote,
                format!("Quoted field opened on line {line} is never closed"),
                "Close the quote or escape embedded quotes by doubling them (\"\")",
            )
            .at_line(line),
        );
    }

    let mut reader = csv_reader(text);
    let headers = match reader.headers() {
        Ok(headers) => headers.clone(),
        Err(err) => {
            report.errors.push(StructuralIssue::new(
                IssueKind::Malformed,
                format!("Header row could not be read: {err}"),
                "Make sure the first line lists the column names separated by commas",
            ));
            return report.finish();
        }
    };
    report.header = headers.iter().map(str::to_string).collect();
    let header_ok = check_header(&headers, &mut report);

    if unterminated.is_some() {
        return report.finish();
    }

    for (idx, record) in reader.records().enumerate() {
        let row_number = idx + 1;
        let record = match record {
            Ok(record) => record,
            Err(err) => {
                report.errors.push(StructuralIssue::new(
                    IssueKind::Malformed,
                    format!("Data row {row_number} could not be read: {err}"),
                    "Check the row for stray delimiters or invalid characters",
                ));
                break;
            }
        };
        report.data_row_count = row_number;

        if row_number > limits.max_rows {
            report.errors.push(StructuralIssue::new(
                IssueKind::RowCount,
                format!("File has more than {} data rows", limits.max_rows),
                format!("Split the file so each upload has at most {} rows", limits.max_rows),
            ));
            break;
        }

        if row_number <= limits.sample_rows {
            sample_record(&record, &headers, header_ok, row_number, &mut report);
        }
    }

    if report.data_row_count == 0 && report.errors.is_empty() {
        report.errors.push(StructuralIssue::new(
            IssueKind::RowCount,
            "File has a header but no data rows",
            "Add at least one data row below the header",
        ));
    }

    report.finish()
}

/// Parses every data row of an already accepted file.
pub fn read_rows(contents: &[u8]) -> Result<Vec<RawCaseRow>, ParserError> {
    let text = decode(contents)?;
    let mut reader = csv_reader(text);
    let headers = reader.headers()?.clone();
    if headers.iter().all(|h| h.is_empty()) {
        return Err(ParserError::InvalidHeader {
            message: "header row is empty".to_string(),
        });
    }

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let row_number = idx as u32 + 1;
        let record = record?;
        let row = record
            .deserialize::<RawCaseRow>(Some(&headers))
            .map_err(|err| ParserError::DataRow {
                row_number,
                message: err.to_string(),
            })?;
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(ParserError::EmptyData);
    }
    Ok(rows)
}

fn decode(contents: &[u8]) -> Result<&str, std::str::Utf8Error> {
    let text = std::str::from_utf8(contents)?;
    Ok(text.strip_prefix('\u{feff}').unwrap_or(text))
}

fn csv_reader(text: &str) -> csv::Reader<&[u8]> {
    ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes())
}

fn check_file_type(upload: &Upload<'_>, report: &mut FileValidationReport) {
    let is_csv = Path::new(upload.filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if !is_csv {
        report.errors.push(StructuralIssue::new(
            IssueKind::FileType,
            format!("'{}' does not have a .csv extension", upload.filename),
            "Export the spreadsheet as CSV before uploading",
        ));
    }

    if let Some(content_type) = upload.content_type {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !ALLOWED_CONTENT_TYPES.contains(&essence.as_str()) {
            report.errors.push(StructuralIssue::new(
                IssueKind::FileType,
                format!("Content type '{content_type}' is not a CSV type"),
                "Upload a CSV file (text/csv)",
            ));
        }
    }
}

/// Returns true when rows can be mapped onto the header by name.
fn check_header(headers: &StringRecord, report: &mut FileValidationReport) -> bool {
    let mut seen = HashSet::new();
    let mut duplicates = false;

    for name in headers.iter() {
        if !seen.insert(name) {
            duplicates = true;
            report.errors.push(
                StructuralIssue::new(
                    IssueKind::DuplicateColumn,
                    format!("Column '{name}' appears more than once"),
                    format!("Remove the duplicate '{name}' column"),
                )
                .at_line(1),
            );
        } else if !name.is_empty() && !is_known_column(name) {
            report.warnings.push(
                StructuralIssue::new(
                    IssueKind::UnknownColumn,
                    format!("Column '{name}' is not recognized and will be ignored"),
                    "Remove the column or check its spelling",
                )
                .at_line(1),
            );
        }
    }

    for required in REQUIRED_COLUMNS {
        if !seen.contains(required) {
            report.errors.push(
                StructuralIssue::new(
                    IssueKind::MissingColumn,
                    format!("Required column '{required}' is missing"),
                    format!("Add a '{required}' column to the header row"),
                )
                .at_line(1),
            );
        }
    }

    !duplicates
}

fn sample_record(
    record: &StringRecord,
    headers: &StringRecord,
    header_ok: bool,
    row_number: usize,
    report: &mut FileValidationReport,
) {
    let line = record.position().map(|pos| pos.line());

    if record.len() != headers.len() {
        let mut issue = StructuralIssue::new(
            IssueKind::ColumnCount,
            format!(
                "Data row {row_number} has {} columns, expected {}",
                record.len(),
                headers.len()
            ),
            "Check the row for missing or extra commas",
        );
        issue.line = line;
        report.errors.push(issue);
        return;
    }

    if !header_ok {
        return;
    }

    match record.deserialize::<RawCaseRow>(Some(headers)) {
        Ok(row) => report.sample_rows.push(row),
        Err(err) => {
            let mut issue = StructuralIssue::new(
                IssueKind::Malformed,
                format!("Data row {row_number} could not be parsed: {err}"),
                "Check the row for invalid characters",
            );
            issue.line = line;
            report.errors.push(issue);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QuoteState {
    FieldStart,
    Unquoted,
    Quoted { opened_on: u64 },
    // A quote inside a quoted field: either the closing quote or the first
    // half of a `""` escape.
    QuoteInQuoted { opened_on: u64 },
}

/// Line (1-based) of a quote that opens a field and is never closed.
/// Quotes in the middle of an unquoted field are literal text.
fn find_unterminated_quote(text: &str) -> Option<u64> {
    use QuoteState::*;

    let mut line = 1u64;
    let mut state = FieldStart;

    for ch in text.chars() {
        state = match (state, ch) {
            (FieldStart, '"') => Quoted { opened_on: line },
            (FieldStart | Unquoted | QuoteInQuoted { .. }, ',' | '\n' | '\r') => FieldStart,
            (FieldStart | Unquoted, _) => Unquoted,
            (Quoted { opened_on }, '"') => QuoteInQuoted { opened_on },
            (Quoted { .. }, _) => state,
            (QuoteInQuoted { opened_on }, '"') => Quoted { opened_on },
            (QuoteInQuoted { .. }, _) => Unquoted,
        };
        if ch == '\n' {
            line += 1;
        }
    }

    match state {
        Quoted { opened_on } => Some(opened_on),
        _ => None,
    }
}
