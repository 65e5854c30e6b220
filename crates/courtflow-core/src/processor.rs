use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use courtflow_parser::{read_rows, validate_rows, RowOutcome, RowValidator};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::classify::{self, RowContext};
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::model::{BatchOutcome, BatchStatus, ErrorType, ImportErrorDetail, ImportSummary};
use crate::queue::ImportJob;
use crate::store::ImportStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOptions {
    pub dry_run: bool,
    pub early_failure_threshold: Option<usize>,
}

impl ProcessOptions {
    pub fn for_job(job: &ImportJob) -> Self {
        Self {
            dry_run: false,
            early_failure_threshold: job.early_failure_threshold,
        }
    }

    pub fn dry_run(early_failure_threshold: Option<usize>) -> Self {
        Self {
            dry_run: true,
            early_failure_threshold,
        }
    }
}

/// Accumulates counters and error details over one run of the row loop.
struct RunTracker {
    batch_id: Option<Uuid>,
    dry_run: bool,
    preview_limit: usize,
    total: usize,
    successful: usize,
    failed: usize,
    errors_by_type: BTreeMap<ErrorType, usize>,
    preview: Vec<ImportErrorDetail>,
    unflushed: Vec<ImportErrorDetail>,
    abort_reason: Option<String>,
}

impl RunTracker {
    fn new(batch_id: Option<Uuid>, dry_run: bool, preview_limit: usize) -> Self {
        Self {
            batch_id,
            dry_run,
            preview_limit,
            total: 0,
            successful: 0,
            failed: 0,
            errors_by_type: BTreeMap::new(),
            preview: Vec::new(),
            unflushed: Vec::new(),
            abort_reason: None,
        }
    }

    fn record(&mut self, details: impl IntoIterator<Item = ImportErrorDetail>) {
        for detail in details {
            *self.errors_by_type.entry(detail.error_type).or_default() += 1;
            if self.preview.len() < self.preview_limit {
                self.preview.push(detail.clone());
            }
            if !self.dry_run {
                self.unflushed.push(detail);
            }
        }
    }

    fn summary(&self, status: BatchStatus) -> ImportSummary {
        ImportSummary {
            batch_id: self.batch_id,
            dry_run: self.dry_run,
            status,
            total_records: self.total,
            successful_records: self.successful,
            failed_records: self.failed,
            errors_by_type: self.errors_by_type.clone(),
            errors: self.preview.clone(),
            abort_reason: self.abort_reason.clone(),
        }
    }
}

/// Drives the row loop for one batch. Shared by the synchronous executor
/// and the queue worker.
pub struct ImportProcessor {
    store: Arc<dyn ImportStore>,
    config: ImportConfig,
    current_year: Option<i32>,
}

impl ImportProcessor {
    pub fn new(store: Arc<dyn ImportStore>, config: ImportConfig) -> Self {
        Self {
            store,
            config,
            current_year: None,
        }
    }

    /// Pins the year used for "not in the future" checks.
    pub fn with_current_year(mut self, year: i32) -> Self {
        self.current_year = Some(year);
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    fn validator(&self) -> RowValidator {
        RowValidator::new(self.current_year.unwrap_or_else(|| Utc::now().year()))
    }

    /// Imports the staged file named by `job`. A dry run performs the same
    /// validation and control flow but never touches the store.
    ///
    /// An error from the store or the file system still marks the batch
    /// FAILED (best effort) before it is returned, so a failed run never
    /// leaves its batch PENDING or PROCESSING.
    #[tracing::instrument(skip(self, job), fields(batch_id = %job.batch_id, dry_run = options.dry_run))]
    pub async fn process_import(
        &self,
        job: &ImportJob,
        options: ProcessOptions,
    ) -> Result<ImportSummary, ImportError> {
        let mut tracker = RunTracker::new(
            (!options.dry_run).then_some(job.batch_id),
            options.dry_run,
            self.config.error_preview_limit,
        );

        match self.run(job, options, &mut tracker).await {
            Ok(summary) => Ok(summary),
            Err(err @ (ImportError::InvalidState { .. } | ImportError::BatchNotFound(_))) => Err(err),
            Err(err) => {
                self.fail_after_error(&mut tracker, &err).await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        job: &ImportJob,
        options: ProcessOptions,
        tracker: &mut RunTracker,
    ) -> Result<ImportSummary, ImportError> {
        let dry_run = options.dry_run;
        let batch_id = job.batch_id;

        let contents = tokio::fs::read(&job.file_path).await?;
        let rows = match read_rows(&contents) {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "staged file could not be parsed");
                tracker.abort_reason = Some(err.to_string());
                tracker.record([classify::parse_failure(&err)]);
                return self.finish(tracker, BatchStatus::Failed).await;
            }
        };
        tracker.total = rows.len();

        if !dry_run && !self.store.start_processing(batch_id, rows.len() as i32).await? {
            let status = self.current_status(batch_id).await?;
            return Err(ImportError::InvalidState {
                batch_id,
                status,
                action: "start processing",
            });
        }

        let policy = self.config.early_failure_policy(options.early_failure_threshold);
        let validation = validate_rows(&rows, &self.validator(), policy);

        if let Some(abort) = validation.aborted {
            info!(
                at_row = abort.at_row,
                consecutive = abort.consecutive,
                "stopping after consecutive validation failures"
            );
            tracker.failed = validation.failed_count();
            tracker.abort_reason = Some(format!(
                "{} consecutive rows failed validation (threshold {})",
                abort.consecutive, abort.threshold
            ));
            tracker.record([classify::early_termination(&abort)]);
            return self.finish(tracker, BatchStatus::Failed).await;
        }

        let interval = self.config.progress_interval.max(1);
        for (idx, outcome) in validation.outcomes.into_iter().enumerate() {
            if !dry_run && idx > 0 {
                let status = self.current_status(batch_id).await?;
                if matches!(status, BatchStatus::Failed | BatchStatus::Cleaned) {
                    info!(%status, processed = idx, "batch was cancelled, stopping");
                    self.flush(tracker).await?;
                    return Ok(tracker.summary(status));
                }
            }

            match outcome {
                RowOutcome::Valid(row) => {
                    if dry_run {
                        tracker.successful += 1;
                    } else {
                        match self.store.import_row(batch_id, &row).await {
                            Ok(_) => tracker.successful += 1,
                            Err(err) => {
                                let case_number = row.case_number();
                                let context = RowContext {
                                    row_number: row.row_number,
                                    case_number: Some(case_number.as_str()),
                                    development_mode: self.config.development_mode,
                                };
                                tracker.failed += 1;
                                tracker.record([classify::handle_database_error(&err, &context)]);

                                if err.is_connection_class() {
                                    warn!(row = row.row_number, error = %err, "lost database connection, aborting batch");
                                    tracker.abort_reason = Some(format!(
                                        "database unavailable at row {}",
                                        row.row_number
                                    ));
                                    return self.finish(tracker, BatchStatus::Failed).await;
                                }
                            }
                        }
                    }
                }
                RowOutcome::Invalid { row_number, errors } => {
                    tracker.failed += 1;
                    tracker.record(classify::handle_validation_error(&errors, row_number));
                }
                RowOutcome::Duplicate {
                    row_number,
                    first_seen,
                } => {
                    tracker.failed += 1;
                    tracker.record([classify::duplicate_row(row_number, first_seen)]);
                }
            }

            if !dry_run && (idx + 1) % interval == 0 {
                self.flush(tracker).await?;
            }
        }

        self.finish(tracker, BatchStatus::Completed).await
    }

    async fn current_status(&self, batch_id: Uuid) -> Result<BatchStatus, ImportError> {
        self.store
            .get_batch(batch_id)
            .await?
            .map(|batch| batch.status)
            .ok_or(ImportError::BatchNotFound(batch_id))
    }

    async fn flush(&self, tracker: &mut RunTracker) -> Result<(), ImportError> {
        let Some(batch_id) = tracker.batch_id else {
            return Ok(());
        };
        if !tracker.unflushed.is_empty() {
            self.store.record_errors(batch_id, &tracker.unflushed).await?;
            tracker.unflushed.clear();
        }
        self.store
            .update_progress(batch_id, tracker.successful as i32, tracker.failed as i32)
            .await?;
        Ok(())
    }

    async fn finish(
        &self,
        tracker: &mut RunTracker,
        status: BatchStatus,
    ) -> Result<ImportSummary, ImportError> {
        let summary = tracker.summary(status);
        let Some(batch_id) = tracker.batch_id else {
            return Ok(summary);
        };

        if !tracker.unflushed.is_empty() {
            self.store.record_errors(batch_id, &tracker.unflushed).await?;
            tracker.unflushed.clear();
        }

        if self.store.finish_batch(batch_id, batch_outcome(&summary)).await? {
            info!(
                %status,
                total = summary.total_records,
                successful = summary.successful_records,
                failed = summary.failed_records,
                "import batch finished"
            );
            Ok(summary)
        } else {
            let current = self.current_status(batch_id).await?;
            warn!(%current, "batch changed status before it could be finished");
            Ok(tracker.summary(current))
        }
    }

    async fn fail_after_error(&self, tracker: &mut RunTracker, err: &ImportError) {
        let Some(batch_id) = tracker.batch_id else {
            return;
        };
        tracker.abort_reason = Some(format!("import stopped by an internal error: {err}"));

        if !tracker.unflushed.is_empty() {
            match self.store.record_errors(batch_id, &tracker.unflushed).await {
                Ok(()) => tracker.unflushed.clear(),
                Err(record_err) => {
                    warn!(error = %record_err, "could not record row errors for a failed batch")
                }
            }
        }

        let summary = tracker.summary(BatchStatus::Failed);
        match self.store.finish_batch(batch_id, batch_outcome(&summary)).await {
            Ok(true) => warn!(error = %err, "batch marked failed after an internal error"),
            Ok(false) => {}
            Err(finish_err) => error!(
                error = %err,
                finish_error = %finish_err,
                "batch could not be marked failed and needs manual cleanup"
            ),
        }
    }
}

fn batch_outcome(summary: &ImportSummary) -> BatchOutcome {
    BatchOutcome {
        status: summary.status,
        total_records: summary.total_records as i32,
        successful_records: summary.successful_records as i32,
        failed_records: summary.failed_records as i32,
        error_log: summary.error_log(),
    }
}
