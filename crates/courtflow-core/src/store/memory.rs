use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use courtflow_parser::CaseReturnRow;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{ImportStore, StoredCounts, BLOCKING_STATUSES};
use crate::error::{ConstraintKind, PersistenceError};
use crate::model::{
    BatchFilter, BatchOutcome, BatchStatus, ErrorFilter, ImportBatch, ImportErrorDetail,
    ImportedCounts, ImportedRow, NewBatch, Page,
};

#[derive(Debug, Clone)]
struct StoredCase {
    id: Uuid,
    batch_id: Uuid,
}

#[derive(Debug, Clone)]
struct StoredActivity {
    case_id: Uuid,
    activity_date: NaiveDate,
    coming_for: String,
    batch_id: Uuid,
    judges: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    batches: HashMap<Uuid, ImportBatch>,
    errors: Vec<(Uuid, ImportErrorDetail)>,
    courts: HashMap<String, Uuid>,
    judges: HashMap<String, Uuid>,
    cases: HashMap<(Uuid, String), StoredCase>,
    activities: Vec<StoredActivity>,
    row_failures: HashMap<String, PersistenceError>,
    progress_failure: Option<PersistenceError>,
    cancel_after_rows: Option<usize>,
}

/// In-process store with the same constraints as the Postgres schema.
/// Used by tests and by `import --dry-run` style tooling.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every later `import_row` for `court` fails with `err`.
    pub async fn fail_rows_for_court(&self, court: &str, err: PersistenceError) {
        self.state
            .lock()
            .await
            .row_failures
            .insert(court.to_string(), err);
    }

    /// Every later `update_progress` fails with `err`.
    pub async fn fail_progress_updates(&self, err: PersistenceError) {
        self.state.lock().await.progress_failure = Some(err);
    }

    /// Drops the failures installed by `fail_rows_for_court` and
    /// `fail_progress_updates`.
    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.row_failures.clear();
        state.progress_failure = None;
    }

    /// Moves the importing batch to FAILED, as a cancel request would,
    /// once `rows` more rows have been written.
    pub async fn cancel_after_rows(&self, rows: usize) {
        self.state.lock().await.cancel_after_rows = Some(rows);
    }

    pub async fn activity_count(&self) -> usize {
        self.state.lock().await.activities.len()
    }

    pub async fn case_count(&self) -> usize {
        self.state.lock().await.cases.len()
    }

    pub async fn batch_count(&self) -> usize {
        self.state.lock().await.batches.len()
    }

    pub async fn error_count(&self) -> usize {
        self.state.lock().await.errors.len()
    }

    /// Overrides a batch's creation time, for age-based admin queries.
    pub async fn backdate(&self, id: Uuid, created_at: DateTime<Utc>) {
        if let Some(batch) = self.state.lock().await.batches.get_mut(&id) {
            batch.created_at = created_at;
        }
    }
}

fn paginate<T: Clone>(items: Vec<T>, page: u32, limit: u32, offset: u64) -> Page<T> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();
    Page {
        items,
        page,
        limit,
        total,
    }
}

#[async_trait]
impl ImportStore for MemoryStore {
    async fn find_blocking_duplicate(
        &self,
        checksum: &str,
    ) -> Result<Option<ImportBatch>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .values()
            .filter(|batch| {
                batch.checksum == checksum
                    && BLOCKING_STATUSES.contains(&batch.status)
                    && batch.successful_records > 0
            })
            .max_by_key(|batch| batch.created_at)
            .cloned())
    }

    async fn create_batch(&self, batch: NewBatch) -> Result<ImportBatch, PersistenceError> {
        let now = Utc::now();
        let created = ImportBatch {
            id: Uuid::new_v4(),
            filename: batch.filename,
            file_size: batch.file_size,
            checksum: batch.checksum,
            file_path: batch.file_path,
            total_records: 0,
            successful_records: 0,
            failed_records: 0,
            status: BatchStatus::Pending,
            error_log: serde_json::json!({}),
            created_by: batch.created_by,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.state
            .lock()
            .await
            .batches
            .insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_batch(&self, id: Uuid) -> Result<Option<ImportBatch>, PersistenceError> {
        Ok(self.state.lock().await.batches.get(&id).cloned())
    }

    async fn set_status(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
    ) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let Some(batch) = state.batches.get_mut(&id) else {
            return Ok(false);
        };
        if !from.contains(&batch.status) || !batch.status.can_transition_to(to) {
            return Ok(false);
        }

        let now = Utc::now();
        batch.status = to;
        batch.updated_at = now;
        if matches!(to, BatchStatus::Failed | BatchStatus::Cleaned) {
            batch.completed_at.get_or_insert(now);
        }
        Ok(true)
    }

    async fn start_processing(&self, id: Uuid, total_records: i32) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        match state.batches.get_mut(&id) {
            Some(batch) if batch.status == BatchStatus::Pending => {
                batch.status = BatchStatus::Processing;
                batch.total_records = total_records;
                batch.successful_records = 0;
                batch.failed_records = 0;
                batch.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_progress(
        &self,
        id: Uuid,
        successful_records: i32,
        failed_records: i32,
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        if let Some(err) = &state.progress_failure {
            return Err(err.clone());
        }
        if let Some(batch) = state.batches.get_mut(&id) {
            batch.successful_records = successful_records;
            batch.failed_records = failed_records;
            batch.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn finish_batch(&self, id: Uuid, outcome: BatchOutcome) -> Result<bool, PersistenceError> {
        let mut state = self.state.lock().await;
        let Some(batch) = state.batches.get_mut(&id) else {
            return Ok(false);
        };
        if !batch.status.can_transition_to(outcome.status) {
            return Ok(false);
        }

        let now = Utc::now();
        batch.status = outcome.status;
        batch.total_records = outcome.total_records;
        batch.successful_records = outcome.successful_records;
        batch.failed_records = outcome.failed_records;
        batch.error_log = outcome.error_log;
        batch.updated_at = now;
        batch.completed_at = Some(now);
        Ok(true)
    }

    async fn record_errors(
        &self,
        batch_id: Uuid,
        errors: &[ImportErrorDetail],
    ) -> Result<(), PersistenceError> {
        let mut state = self.state.lock().await;
        state
            .errors
            .extend(errors.iter().cloned().map(|error| (batch_id, error)));
        Ok(())
    }

    async fn import_row(
        &self,
        batch_id: Uuid,
        row: &CaseReturnRow,
    ) -> Result<ImportedRow, PersistenceError> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.row_failures.get(&row.court) {
            return Err(err.clone());
        }
        StoredCounts::from_row(row)?;

        // Work on copies so a failed row leaves nothing behind.
        let court_id = state.courts.get(&row.court).copied().unwrap_or_else(Uuid::new_v4);
        let case_key = (court_id, row.case_number());
        let existing_case = state.cases.get(&case_key).cloned();
        let case_id = existing_case
            .as_ref()
            .map(|case| case.id)
            .unwrap_or_else(Uuid::new_v4);

        let conflict = state.activities.iter().any(|activity| {
            activity.case_id == case_id
                && activity.activity_date == row.activity_date
                && activity.coming_for == row.coming_for
        });
        if conflict {
            return Err(PersistenceError::ConstraintViolation {
                kind: ConstraintKind::Unique,
                constraint: Some("case_activities_case_id_activity_date_coming_for_key".into()),
                detail: format!(
                    "activity for case {} on {} already exists",
                    row.case_number(),
                    row.activity_date
                ),
            });
        }

        state.courts.insert(row.court.clone(), court_id);
        let unique_judges: HashSet<&String> = row.judges.iter().collect();
        for judge in &unique_judges {
            if !state.judges.contains_key(*judge) {
                state.judges.insert((*judge).clone(), Uuid::new_v4());
            }
        }
        if existing_case.is_none() {
            state.cases.insert(case_key, StoredCase { id: case_id, batch_id });
        }
        let activity_id = Uuid::new_v4();
        state.activities.push(StoredActivity {
            case_id,
            activity_date: row.activity_date,
            coming_for: row.coming_for.clone(),
            batch_id,
            judges: unique_judges.len(),
        });

        if let Some(remaining) = state.cancel_after_rows.as_mut() {
            *remaining = remaining.saturating_sub(1);
            if *remaining == 0 {
                state.cancel_after_rows = None;
                if let Some(batch) = state.batches.get_mut(&batch_id) {
                    let now = Utc::now();
                    batch.status = BatchStatus::Failed;
                    batch.updated_at = now;
                    batch.completed_at = Some(now);
                }
            }
        }

        Ok(ImportedRow {
            case_id,
            activity_id,
            case_created: existing_case.is_none(),
        })
    }

    async fn list_batches(&self, filter: &BatchFilter) -> Result<Page<ImportBatch>, PersistenceError> {
        let filter = filter.clone().normalized();
        let state = self.state.lock().await;
        let mut batches: Vec<ImportBatch> = state
            .batches
            .values()
            .filter(|batch| filter.matches(batch))
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(paginate(batches, filter.page, filter.limit, filter.offset()))
    }

    async fn list_errors(
        &self,
        batch_id: Uuid,
        filter: &ErrorFilter,
    ) -> Result<Page<ImportErrorDetail>, PersistenceError> {
        let filter = filter.clone().normalized();
        let state = self.state.lock().await;
        let mut errors: Vec<ImportErrorDetail> = state
            .errors
            .iter()
            .filter(|(id, error)| *id == batch_id && filter.matches(error))
            .map(|(_, error)| error.clone())
            .collect();
        errors.sort_by_key(|error| error.row_number);
        Ok(paginate(errors, filter.page, filter.limit, filter.offset()))
    }

    async fn imported_counts(&self, batch_id: Uuid) -> Result<ImportedCounts, PersistenceError> {
        let state = self.state.lock().await;
        let activities: Vec<&StoredActivity> = state
            .activities
            .iter()
            .filter(|activity| activity.batch_id == batch_id)
            .collect();
        Ok(ImportedCounts {
            activities: activities.len() as i64,
            cases_created: state
                .cases
                .values()
                .filter(|case| case.batch_id == batch_id)
                .count() as i64,
            judge_assignments: activities.iter().map(|activity| activity.judges as i64).sum(),
        })
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<ImportBatch>, PersistenceError> {
        let state = self.state.lock().await;
        let mut batches: Vec<ImportBatch> = state
            .batches
            .values()
            .filter(|batch| batch.status == BatchStatus::Pending && batch.created_at < cutoff)
            .cloned()
            .collect();
        batches.sort_by_key(|batch| batch.created_at);
        Ok(batches)
    }

    async fn active_file_paths(&self) -> Result<Vec<String>, PersistenceError> {
        let state = self.state.lock().await;
        Ok(state
            .batches
            .values()
            .filter(|batch| {
                matches!(batch.status, BatchStatus::Pending | BatchStatus::Processing)
            })
            .map(|batch| batch.file_path.clone())
            .collect())
    }
}
