//! Maps validation, structural and storage failures onto reportable
//! [`ImportErrorDetail`]s with a category and a suggested fix.

use courtflow_parser::{EarlyAbort, FieldError, FieldErrorKind, IssueKind, ParserError, StructuralIssue};

use crate::error::{ConstraintKind, PersistenceError};
use crate::model::{ErrorType, ImportErrorDetail, Severity};

/// Where a storage failure happened.
#[derive(Debug, Clone, Copy)]
pub struct RowContext<'a> {
    pub row_number: u32,
    pub case_number: Option<&'a str>,
    pub development_mode: bool,
}

pub fn error_type_for(kind: FieldErrorKind) -> ErrorType {
    match kind {
        FieldErrorKind::Missing => ErrorType::MissingField,
        FieldErrorKind::OutOfRange => ErrorType::InvalidRange,
        FieldErrorKind::InvalidFormat => ErrorType::InvalidFormat,
        FieldErrorKind::InvalidCharacters => ErrorType::InvalidCharacters,
        FieldErrorKind::InvalidChoice => ErrorType::InvalidValue,
        FieldErrorKind::InvalidDate => ErrorType::InvalidDate,
    }
}

pub fn handle_validation_error(errors: &[FieldError], row_number: u32) -> Vec<ImportErrorDetail> {
    errors
        .iter()
        .map(|error| {
            ImportErrorDetail::new(
                row_number,
                error_type_for(error.kind),
                error.message.clone(),
                error.suggestion.clone(),
            )
            .with_field(error.field.clone())
            .with_raw_value(error.value.clone())
        })
        .collect()
}

pub fn handle_database_error(err: &PersistenceError, context: &RowContext<'_>) -> ImportErrorDetail {
    let case = context
        .case_number
        .map(|number| format!("case {number}"))
        .unwrap_or_else(|| "this row".to_string());

    let (error_type, severity, message, suggestion) = match err {
        PersistenceError::ConstraintViolation {
            kind: ConstraintKind::Unique,
            ..
        } => (
            ErrorType::DuplicateError,
            Severity::Warning,
            format!("An activity for {case} on this date with the same purpose already exists"),
            "Remove the row, or check whether this return was imported in an earlier batch",
        ),
        PersistenceError::ConstraintViolation {
            kind: ConstraintKind::ForeignKey,
            ..
        } => (
            ErrorType::ForeignKeyError,
            Severity::Error,
            format!("Data for {case} refers to a record that does not exist"),
            "Check the court and judge names against the registry",
        ),
        PersistenceError::ConstraintViolation { .. } => (
            ErrorType::ConstraintError,
            Severity::Error,
            format!("A value for {case} was rejected by the database"),
            "Check that counts are not negative and required columns are filled",
        ),
        PersistenceError::Connection(_) | PersistenceError::Timeout(_) => (
            ErrorType::ConnectionError,
            Severity::Critical,
            format!("The database became unavailable while saving {case}"),
            "Retry the import once the database is reachable; rows already saved will be reported as duplicates",
        ),
        PersistenceError::NotFound(_) | PersistenceError::Other(_) => (
            ErrorType::DatabaseError,
            Severity::Error,
            format!("{} could not be saved", capitalize(&case)),
            "Retry the import; contact support if the problem persists",
        ),
    };

    let message = if context.development_mode {
        format!("{message} ({err})")
    } else {
        message
    };

    ImportErrorDetail::new(context.row_number, error_type, message, suggestion).with_severity(severity)
}

pub fn duplicate_row(row_number: u32, first_seen: u32) -> ImportErrorDetail {
    ImportErrorDetail::new(
        row_number,
        ErrorType::DuplicateRow,
        format!("Row {row_number} repeats row {first_seen}"),
        "Remove the repeated row from the file",
    )
    .with_severity(Severity::Warning)
}

pub fn structural_errors(issues: &[StructuralIssue]) -> Vec<ImportErrorDetail> {
    issues
        .iter()
        .map(|issue| {
            let detail = ImportErrorDetail::new(
                0,
                ErrorType::StructuralError,
                issue.message.clone(),
                issue.suggestion.clone(),
            )
            .with_severity(Severity::Critical);
            match issue.kind {
                IssueKind::MissingColumn | IssueKind::DuplicateColumn | IssueKind::UnknownColumn => {
                    detail.with_field("header")
                }
                _ => detail,
            }
        })
        .collect()
}

pub fn parse_failure(err: &ParserError) -> ImportErrorDetail {
    let row_number = match err {
        ParserError::DataRow { row_number, .. } => *row_number,
        _ => 0,
    };
    ImportErrorDetail::new(
        row_number,
        ErrorType::StructuralError,
        format!("File could not be parsed: {err}"),
        "Save the file as CSV UTF-8 with the standard header and upload it again",
    )
    .with_severity(Severity::Critical)
}

pub fn early_termination(abort: &EarlyAbort) -> ImportErrorDetail {
    ImportErrorDetail::new(
        abort.at_row,
        ErrorType::EarlyTermination,
        format!(
            "Too many consecutive validation errors: rows {}-{} all failed",
            abort.at_row as usize + 1 - abort.consecutive,
            abort.at_row
        ),
        "Check that the file uses the court returns template and its columns are in the expected format",
    )
    .with_severity(Severity::Critical)
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(development_mode: bool) -> RowContext<'static> {
        RowContext {
            row_number: 7,
            case_number: Some("CMCC 101"),
            development_mode,
        }
    }

    fn unique() -> PersistenceError {
        PersistenceError::ConstraintViolation {
            kind: ConstraintKind::Unique,
            constraint: Some("case_activities_case_id_activity_date_coming_for_key".into()),
            detail: "duplicate key value violates unique constraint".into(),
        }
    }

    #[test]
    fn maps_each_persistence_category() {
        let cases = [
            (unique(), ErrorType::DuplicateError, Severity::Warning),
            (
                PersistenceError::ConstraintViolation {
                    kind: ConstraintKind::ForeignKey,
                    constraint: None,
                    detail: "fk".into(),
                },
                ErrorType::ForeignKeyError,
                Severity::Error,
            ),
            (
                PersistenceError::ConstraintViolation {
                    kind: ConstraintKind::Check,
                    constraint: None,
                    detail: "check".into(),
                },
                ErrorType::ConstraintError,
                Severity::Error,
            ),
            (
                PersistenceError::Timeout("pool".into()),
                ErrorType::ConnectionError,
                Severity::Critical,
            ),
            (
                PersistenceError::Other("boom".into()),
                ErrorType::DatabaseError,
                Severity::Error,
            ),
        ];

        for (err, error_type, severity) in cases {
            let detail = handle_database_error(&err, &context(false));
            assert_eq!(detail.error_type, error_type, "{err}");
            assert_eq!(detail.severity, severity, "{err}");
            assert_eq!(detail.row_number, 7);
            assert!(!detail.suggestion.is_empty());
        }
    }

    #[test]
    fn driver_text_only_in_development_mode() {
        let hidden = handle_database_error(&unique(), &context(false));
        assert!(hidden.message.contains("CMCC 101"));
        assert!(!hidden.message.contains("case_activities_case_id"));

        let shown = handle_database_error(&unique(), &context(true));
        assert!(shown.message.contains("case_activities_case_id"));
    }

    #[test]
    fn validation_errors_keep_field_and_value() {
        let errors = vec![FieldError {
            field: "date_dd".into(),
            kind: FieldErrorKind::OutOfRange,
            message: "Day in 'date_dd' is out of range".into(),
            suggestion: "Day must be between 1-31. Found: 45".into(),
            value: Some("45".into()),
        }];

        let details = handle_validation_error(&errors, 3);
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].row_number, 3);
        assert_eq!(details[0].field.as_deref(), Some("date_dd"));
        assert_eq!(details[0].error_type, ErrorType::InvalidRange);
        assert_eq!(details[0].raw_value.as_deref(), Some("45"));
        assert_eq!(details[0].suggestion, "Day must be between 1-31. Found: 45");
    }

    #[test]
    fn early_termination_names_the_failing_run() {
        let detail = early_termination(&EarlyAbort {
            at_row: 6,
            consecutive: 5,
            threshold: 5,
        });
        assert_eq!(detail.error_type, ErrorType::EarlyTermination);
        assert_eq!(detail.severity, Severity::Critical);
        assert!(detail.message.starts_with("Too many consecutive validation errors"));
        assert!(detail.message.contains("rows 2-6"));
    }
}
