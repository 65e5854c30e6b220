//! Persistence seam for import batches, their error details, and the
//! case records a batch writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courtflow_parser::CaseReturnRow;
use uuid::Uuid;

use crate::error::{ConstraintKind, PersistenceError};
use crate::model::{
    BatchFilter, BatchOutcome, BatchStatus, ErrorFilter, ImportBatch, ImportErrorDetail,
    ImportedCounts, ImportedRow, NewBatch, Page,
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Statuses whose batches block a byte-identical re-upload.
pub const BLOCKING_STATUSES: [BatchStatus; 2] = [BatchStatus::Completed, BatchStatus::Processing];

#[async_trait]
pub trait ImportStore: Send + Sync {
    /// A batch with this checksum that already imported rows, if any.
    async fn find_blocking_duplicate(
        &self,
        checksum: &str,
    ) -> Result<Option<ImportBatch>, PersistenceError>;

    async fn create_batch(&self, batch: NewBatch) -> Result<ImportBatch, PersistenceError>;

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>, PersistenceError>;

    /// Moves the batch to `to` only when its current status is one of `from`.
    /// Returns false when the batch was in some other status.
    async fn set_status(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> Result<bool, PersistenceError>;

    /// PENDING to PROCESSING, recording the row count.
    async fn start_processing(&self, id: Uuid, total_records: i32) -> Result<bool, PersistenceError>;

    async fn update_progress(
        &self,
        id: Uuid,
        successful_records: i32,
        failed_records: i32,
    ) -> Result<(), PersistenceError>;

    /// Writes final counters and status for a PENDING or PROCESSING batch.
    /// Returns false when the batch was cancelled or cleaned meanwhile.
    async fn finish_batch(&self, id: Uuid, outcome: BatchOutcome) -> Result<bool, PersistenceError>;

    async fn record_errors(
        &self,
        batch_id: Uuid,
        errors: &[ImportErrorDetail],
    ) -> Result<(), PersistenceError>;

    /// Writes one validated row atomically: court and judges are looked up
    /// or created, the case is looked up or created, then the activity and
    /// its judge assignments are inserted.
    async fn import_row(
        &self,
        batch_id: Uuid,
        row: &CaseReturnRow,
    ) -> Result<ImportedRow, PersistenceError>;

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<ImportBatch>, PersistenceError>;

    async fn list_errors(
        &self,
        batch_id: Uuid,
        filter: &ErrorFilter,
    ) -> Result<Page<ImportErrorDetail>, PersistenceError>;

    async fn imported_counts(&self, batch_id: Uuid) -> Result<ImportedCounts, PersistenceError>;

    /// PENDING batches created before `cutoff`, oldest first.
    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportBatch>, PersistenceError>;

    /// Staged file paths still needed by PENDING or PROCESSING batches.
    async fn active_file_paths(&self) -> Result<Vec<String>, PersistenceError>;
}

/// Row counts converted to the signed 32-bit columns they are stored in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StoredCounts {
    pub male_applicant: i32,
    pub female_applicant: i32,
    pub organization_applicant: i32,
    pub male_defendant: i32,
    pub female_defendant: i32,
    pub organization_defendant: i32,
    pub applicant_witnesses: i32,
    pub defendant_witnesses: i32,
    pub custody: i32,
}

impl StoredCounts {
    pub fn from_row(row: &CaseReturnRow) -> Result<Self, PersistenceError> {
        let parties = &row.parties;
        Ok(Self {
            male_applicant: to_db_count("male_applicant", parties.male_applicant)?,
            female_applicant: to_db_count("female_applicant", parties.female_applicant)?,
            organization_applicant: to_db_count(
                "organization_applicant",
                parties.organization_applicant,
            )?,
            male_defendant: to_db_count("male_defendant", parties.male_defendant)?,
            female_defendant: to_db_count("female_defendant", parties.female_defendant)?,
            organization_defendant: to_db_count(
                "organization_defendant",
                parties.organization_defendant,
            )?,
            applicant_witnesses: to_db_count("applicant_witness", row.applicant_witnesses)?,
            defendant_witnesses: to_db_count("defendant_witness", row.defendant_witnesses)?,
            custody: to_db_count("custody", row.custody)?,
        })
    }
}

fn to_db_count(field: &'static str, value: u32) -> Result<i32, PersistenceError> {
    i32::try_from(value).map_err(|_| PersistenceError::ConstraintViolation {
        kind: ConstraintKind::Check,
        constraint: Some(format!("{field}_range")),
        detail: format!("{field} value {value} does not fit a 32-bit count"),
    })
}
