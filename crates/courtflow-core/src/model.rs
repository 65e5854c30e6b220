use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cleaned,
}

impl BatchStatus {
    pub const ALL: [BatchStatus; 5] = [
        BatchStatus::Pending,
        BatchStatus::Processing,
        BatchStatus::Completed,
        BatchStatus::Failed,
        BatchStatus::Cleaned,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "PENDING",
            BatchStatus::Processing => "PROCESSING",
            BatchStatus::Completed => "COMPLETED",
            BatchStatus::Failed => "FAILED",
            BatchStatus::Cleaned => "CLEANED",
        }
    }

    /// Status moves only forward; CLEANED is final.
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cleaned)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cleaned)
                | (Completed, Cleaned)
                | (Failed, Cleaned)
        )
    }

    /// Statuses that may move to `next`.
    pub fn sources_of(next: BatchStatus) -> Vec<BatchStatus> {
        Self::ALL
            .into_iter()
            .filter(|status| status.can_transition_to(next))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::Failed | BatchStatus::Cleaned
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| format!("unknown batch status '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    MissingField,
    InvalidRange,
    InvalidFormat,
    InvalidCharacters,
    InvalidValue,
    InvalidDate,
    DuplicateRow,
    DuplicateError,
    ForeignKeyError,
    ConstraintError,
    ConnectionError,
    DatabaseError,
    StructuralError,
    EarlyTermination,
}

impl ErrorType {
    pub const ALL: [ErrorType; 14] = [
        ErrorType::MissingField,
        ErrorType::InvalidRange,
        ErrorType::InvalidFormat,
        ErrorType::InvalidCharacters,
        ErrorType::InvalidValue,
        ErrorType::InvalidDate,
        ErrorType::DuplicateRow,
        ErrorType::DuplicateError,
        ErrorType::ForeignKeyError,
        ErrorType::ConstraintError,
        ErrorType::ConnectionError,
        ErrorType::DatabaseError,
        ErrorType::StructuralError,
        ErrorType::EarlyTermination,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::MissingField => "missing_field",
            ErrorType::InvalidRange => "invalid_range",
            ErrorType::InvalidFormat => "invalid_format",
            ErrorType::InvalidCharacters => "invalid_characters",
            ErrorType::InvalidValue => "invalid_value",
            ErrorType::InvalidDate => "invalid_date",
            ErrorType::DuplicateRow => "duplicate_row",
            ErrorType::DuplicateError => "duplicate_error",
            ErrorType::ForeignKeyError => "foreign_key_error",
            ErrorType::ConstraintError => "constraint_error",
            ErrorType::ConnectionError => "connection_error",
            ErrorType::DatabaseError => "database_error",
            ErrorType::StructuralError => "structural_error",
            ErrorType::EarlyTermination => "early_termination",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value.trim())
            .ok_or_else(|| format!("unknown error type '{value}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// One reportable problem. `row_number` is 0 for file-level problems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportErrorDetail {
    pub row_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub error_type: ErrorType,
    pub message: String,
    pub suggestion: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
}

impl ImportErrorDetail {
    pub fn new(
        row_number: u32,
        error_type: ErrorType,
        message: impl Into<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self {
            row_number,
            field: None,
            error_type,
            message: message.into(),
            suggestion: suggestion.into(),
            severity: Severity::Error,
            raw_value: None,
        }
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_raw_value(mut self, value: Option<String>) -> Self {
        self.raw_value = value;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportBatch {
    pub id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub checksum: String,
    pub file_path: String,
    pub total_records: i32,
    pub successful_records: i32,
    pub failed_records: i32,
    pub status: BatchStatus,
    pub error_log: Value,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct NewBatch {
    pub filename: String,
    pub file_size: i64,
    pub checksum: String,
    pub file_path: String,
    pub created_by: String,
}

/// Final figures written when a batch leaves PROCESSING.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub total_records: i32,
    pub successful_records: i32,
    pub failed_records: i32,
    pub error_log: Value,
}

/// Records written for one imported row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportedRow {
    pub case_id: Uuid,
    pub activity_id: Uuid,
    pub case_created: bool,
}

/// Records a batch actually left in the database.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedCounts {
    pub activities: i64,
    pub cases_created: i64,
    pub judge_assignments: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingMode {
    Sync,
    Async,
    DryRun,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

fn clamp_paging(page: u32, limit: u32) -> (u32, u32) {
    (page.max(1), limit.clamp(1, MAX_PAGE_SIZE))
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchFilter {
    pub page: u32,
    pub limit: u32,
    pub status: Option<BatchStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for BatchFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_SIZE,
            status: None,
            from: None,
            to: None,
        }
    }
}

impl BatchFilter {
    pub fn normalized(mut self) -> Self {
        (self.page, self.limit) = clamp_paging(self.page, self.limit);
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn matches(&self, batch: &ImportBatch) -> bool {
        self.status.map_or(true, |status| batch.status == status)
            && self.from.map_or(true, |from| batch.created_at >= from)
            && self.to.map_or(true, |to| batch.created_at <= to)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorFilter {
    pub page: u32,
    pub limit: u32,
    pub error_type: Option<ErrorType>,
    pub severity: Option<Severity>,
}

impl Default for ErrorFilter {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 50,
            error_type: None,
            severity: None,
        }
    }
}

impl ErrorFilter {
    pub fn normalized(mut self) -> Self {
        (self.page, self.limit) = clamp_paging(self.page, self.limit);
        self
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.limit)
    }

    pub fn matches(&self, detail: &ImportErrorDetail) -> bool {
        self.error_type.map_or(true, |kind| detail.error_type == kind)
            && self.severity.map_or(true, |severity| detail.severity == severity)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    pub fn total_pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(u64::from(self.limit))
    }
}

/// Result of one run of the row loop, returned to callers and persisted
/// (in condensed form) as the batch error log.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    pub dry_run: bool,
    pub status: BatchStatus,
    pub total_records: usize,
    pub successful_records: usize,
    pub failed_records: usize,
    pub errors_by_type: BTreeMap<ErrorType, usize>,
    /// First errors in row order; the full list is in the error store.
    pub errors: Vec<ImportErrorDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
}

impl ImportSummary {
    pub fn error_count(&self) -> usize {
        self.errors_by_type.values().sum()
    }

    pub fn error_log(&self) -> Value {
        serde_json::json!({
            "errorsByType": self.errors_by_type,
            "preview": self.errors,
            "abortReason": self.abort_reason,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub batch_id: Uuid,
    pub status: BatchStatus,
    pub total_records: i32,
    pub successful_records: i32,
    pub failed_records: i32,
    pub imported: ImportedCounts,
    pub counts_balanced: bool,
    pub activities_match: bool,
    /// Every case a batch created came with at least one of its activities.
    pub cases_within_activities: bool,
    pub is_consistent: bool,
}

impl VerificationReport {
    pub fn new(batch: &ImportBatch, imported: ImportedCounts) -> Self {
        let counts_balanced =
            batch.successful_records + batch.failed_records == batch.total_records;
        let activities_match = imported.activities == i64::from(batch.successful_records);
        let cases_within_activities =
            imported.cases_created >= 0 && imported.cases_created <= imported.activities;
        Self {
            batch_id: batch.id,
            status: batch.status,
            total_records: batch.total_records,
            successful_records: batch.successful_records,
            failed_records: batch.failed_records,
            imported,
            counts_balanced,
            activities_match,
            cases_within_activities,
            is_consistent: counts_balanced && activities_match && cases_within_activities,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_transitions_only_move_forward() {
        use BatchStatus::*;

        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Completed));
        assert!(Processing.can_transition_to(Failed));
        assert!(Completed.can_transition_to(Cleaned));

        assert!(!Completed.can_transition_to(Processing));
        assert!(!Failed.can_transition_to(Completed));
        assert!(!Processing.can_transition_to(Pending));
        for next in BatchStatus::ALL {
            assert!(!Cleaned.can_transition_to(next));
        }
        assert_eq!(BatchStatus::sources_of(Completed), vec![Processing]);
    }

    #[test]
    fn status_parses_case_insensitively() {
        assert_eq!("completed".parse::<BatchStatus>(), Ok(BatchStatus::Completed));
        assert_eq!(" PENDING ".parse::<BatchStatus>(), Ok(BatchStatus::Pending));
        assert!("done".parse::<BatchStatus>().is_err());
        assert_eq!(
            serde_json::to_value(BatchStatus::Processing).unwrap(),
            serde_json::json!("PROCESSING")
        );
    }

    #[test]
    fn error_types_round_trip_through_text() {
        for kind in ErrorType::ALL {
            assert_eq!(kind.as_str().parse::<ErrorType>(), Ok(kind));
            assert_eq!(serde_json::to_value(kind).unwrap(), serde_json::json!(kind.as_str()));
        }
    }

    #[test]
    fn paging_is_clamped() {
        let filter = BatchFilter {
            page: 0,
            limit: 1_000,
            ..BatchFilter::default()
        }
        .normalized();
        assert_eq!(filter.page, 1);
        assert_eq!(filter.limit, MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);

        let third = ErrorFilter {
            page: 3,
            limit: 25,
            ..ErrorFilter::default()
        }
        .normalized();
        assert_eq!(third.offset(), 50);
    }

    #[test]
    fn summary_error_log_uses_camel_case_keys() {
        let mut errors_by_type = BTreeMap::new();
        errors_by_type.insert(ErrorType::InvalidRange, 2);
        let summary = ImportSummary {
            batch_id: None,
            dry_run: true,
            status: BatchStatus::Completed,
            total_records: 4,
            successful_records: 2,
            failed_records: 2,
            errors_by_type,
            errors: Vec::new(),
            abort_reason: None,
        };

        let log = summary.error_log();
        assert_eq!(log["errorsByType"]["invalid_range"], 2);
        assert!(log["abortReason"].is_null());
        assert_eq!(summary.error_count(), 2);
    }

    #[test]
    fn verification_flags_more_cases_than_activities() {
        let now = Utc::now();
        let batch = ImportBatch {
            id: Uuid::new_v4(),
            filename: "returns.csv".into(),
            file_size: 512,
            checksum: "abc".into(),
            file_path: "uploads/abc.csv".into(),
            total_records: 4,
            successful_records: 3,
            failed_records: 1,
            status: BatchStatus::Completed,
            error_log: serde_json::json!({}),
            created_by: "clerk".into(),
            created_at: now,
            updated_at: now,
            completed_at: Some(now),
        };

        let sound = VerificationReport::new(
            &batch,
            ImportedCounts {
                activities: 3,
                cases_created: 2,
                judge_assignments: 3,
            },
        );
        assert!(sound.cases_within_activities);
        assert!(sound.is_consistent);

        let orphaned = VerificationReport::new(
            &batch,
            ImportedCounts {
                activities: 3,
                cases_created: 5,
                judge_assignments: 3,
            },
        );
        assert!(orphaned.counts_balanced);
        assert!(orphaned.activities_match);
        assert!(!orphaned.cases_within_activities);
        assert!(!orphaned.is_consistent);
    }
}
