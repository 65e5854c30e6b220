use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::checksum::file_checksum;
use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::executor::{select_executor, ExecutionOutcome, ImmediateExecutor, ImportExecutor};
use crate::model::{
    BatchFilter, BatchStatus, ErrorFilter, ImportBatch, ImportErrorDetail, ImportSummary, NewBatch,
    Page, ProcessingMode, VerificationReport,
};
use crate::processor::{ImportProcessor, ProcessOptions};
use crate::queue::{ImportJob, JobQueue};
use crate::store::ImportStore;
use crate::uploads;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    pub early_failure_threshold: Option<usize>,
    /// Process in-request even when the queue is reachable.
    pub force_sync: bool,
}

#[derive(Debug, Clone)]
pub struct InitiateImport {
    pub file_path: PathBuf,
    pub filename: String,
    pub file_size: u64,
    pub user_id: String,
    pub options: ImportOptions,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportStarted {
    pub batch_id: Uuid,
    pub processing_mode: ProcessingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ImportSummary>,
}

/// Entry point for every import operation. Collaborators are injected so
/// the same service runs against Postgres and Redis or fully in memory.
pub struct ImportService {
    store: Arc<dyn ImportStore>,
    queue: Option<Arc<dyn JobQueue>>,
    processor: Arc<ImportProcessor>,
    config: ImportConfig,
}

impl ImportService {
    pub fn new(
        store: Arc<dyn ImportStore>,
        queue: Option<Arc<dyn JobQueue>>,
        config: ImportConfig,
    ) -> Self {
        let processor = Arc::new(ImportProcessor::new(Arc::clone(&store), config.clone()));
        Self::with_processor(store, queue, processor)
    }

    pub fn with_processor(
        store: Arc<dyn ImportStore>,
        queue: Option<Arc<dyn JobQueue>>,
        processor: Arc<ImportProcessor>,
    ) -> Self {
        let config = processor.config().clone();
        Self {
            store,
            queue,
            processor,
            config,
        }
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn processor(&self) -> Arc<ImportProcessor> {
        Arc::clone(&self.processor)
    }

    pub fn queue(&self) -> Option<&Arc<dyn JobQueue>> {
        self.queue.as_ref()
    }

    /// Registers a staged file as a new batch and runs or enqueues it.
    #[tracing::instrument(
        skip(self, request),
        fields(filename = %request.filename, user = %request.user_id)
    )]
    pub async fn initiate_import(
        &self,
        request: InitiateImport,
    ) -> Result<ImportStarted, ImportError> {
        let contents = tokio::fs::read(&request.file_path).await?;
        let checksum = file_checksum(&contents);

        if let Some(existing) = self.store.find_blocking_duplicate(&checksum).await? {
            info!(duplicate_of = %existing.id, "rejecting re-upload of an imported file");
            return Err(ImportError::Duplicate {
                batch_id: existing.id,
            });
        }

        let file_path = request.file_path.to_string_lossy().into_owned();
        let batch = self
            .store
            .create_batch(NewBatch {
                filename: request.filename.clone(),
                file_size: request.file_size as i64,
                checksum,
                file_path: file_path.clone(),
                created_by: request.user_id.clone(),
            })
            .await?;

        let job = ImportJob::new(
            batch.id,
            file_path,
            request.filename,
            request.user_id,
            request.options.early_failure_threshold,
        );

        let executor: Arc<dyn ImportExecutor> = if request.options.force_sync {
            Arc::new(ImmediateExecutor::new(self.processor()))
        } else {
            select_executor(
                self.queue.as_ref(),
                &self.processor,
                self.config.queue_probe_timeout(),
            )
            .await
        };

        let mode = executor.mode();
        let outcome = match executor.execute(job.clone()).await {
            Ok(outcome) => outcome,
            Err(ImportError::Queue(err)) => {
                warn!(
                    batch_id = %batch.id,
                    error = %err,
                    "enqueue failed, processing synchronously"
                );
                ImmediateExecutor::new(self.processor()).execute(job).await?
            }
            Err(err) => return Err(err),
        };

        let started = match outcome {
            ExecutionOutcome::Processed(summary) => ImportStarted {
                batch_id: batch.id,
                processing_mode: ProcessingMode::Sync,
                job_id: None,
                summary: Some(summary),
            },
            ExecutionOutcome::Queued { job_id } => ImportStarted {
                batch_id: batch.id,
                processing_mode: mode,
                job_id: Some(job_id),
                summary: None,
            },
        };
        info!(batch_id = %batch.id, mode = ?started.processing_mode, "import started");
        Ok(started)
    }

    /// Validates a staged file through the full row loop without writing anything.
    pub async fn preview_import(
        &self,
        file_path: PathBuf,
        filename: &str,
        user_id: &str,
        early_failure_threshold: Option<usize>,
    ) -> Result<ImportSummary, ImportError> {
        let job = ImportJob::new(
            Uuid::nil(),
            file_path.to_string_lossy().into_owned(),
            filename,
            user_id,
            early_failure_threshold,
        );
        self.processor
            .process_import(&job, ProcessOptions::dry_run(early_failure_threshold))
            .await
    }

    pub async fn get_batch(&self, id: Uuid) -> Result<ImportBatch, ImportError> {
        self.store
            .get_batch(id)
            .await?
            .ok_or(ImportError::BatchNotFound(id))
    }

    pub async fn list_batches(&self, filter: BatchFilter) -> Result<Page<ImportBatch>, ImportError> {
        Ok(self.store.list_batches(&filter.normalized()).await?)
    }

    pub async fn list_errors(
        &self,
        batch_id: Uuid,
        filter: ErrorFilter,
    ) -> Result<Page<ImportErrorDetail>, ImportError> {
        self.get_batch(batch_id).await?;
        Ok(self.store.list_errors(batch_id, &filter.normalized()).await?)
    }

    /// Recounts what a completed batch left in the database.
    pub async fn verify_batch(&self, id: Uuid) -> Result<VerificationReport, ImportError> {
        let batch = self.get_batch(id).await?;
        if batch.status != BatchStatus::Completed {
            return Err(ImportError::InvalidState {
                batch_id: id,
                status: batch.status,
                action: "verify",
            });
        }
        let imported = self.store.imported_counts(id).await?;
        Ok(VerificationReport::new(&batch, imported))
    }

    /// Marks a PENDING or PROCESSING batch FAILED. A running batch stops
    /// after its current row.
    pub async fn cancel_batch(&self, id: Uuid) -> Result<ImportBatch, ImportError> {
        self.transition(
            id,
            &[BatchStatus::Pending, BatchStatus::Processing],
            BatchStatus::Failed,
            "cancel",
        )
        .await
    }

    /// Marks a batch CLEANED and removes its staged file.
    pub async fn cleanup_batch(&self, id: Uuid) -> Result<ImportBatch, ImportError> {
        let batch = self
            .transition(
                id,
                &BatchStatus::sources_of(BatchStatus::Cleaned),
                BatchStatus::Cleaned,
                "clean up",
            )
            .await?;
        uploads::remove_staged(std::path::Path::new(&batch.file_path)).await?;
        Ok(batch)
    }

    /// Re-enqueues PENDING batches older than `cutoff`, for jobs lost when
    /// the queue was flushed or a worker died before dequeuing.
    pub async fn requeue_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Uuid>, ImportError> {
        let Some(queue) = self.queue.as_ref() else {
            return Ok(Vec::new());
        };
        let mut requeued = Vec::new();
        for batch in self.store.stale_pending(cutoff).await? {
            let job = ImportJob::new(
                batch.id,
                batch.file_path,
                batch.filename,
                batch.created_by,
                None,
            );
            queue.enqueue(&job).await?;
            requeued.push(batch.id);
        }
        Ok(requeued)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[BatchStatus],
        to: BatchStatus,
        action: &'static str,
    ) -> Result<ImportBatch, ImportError> {
        if !self.store.set_status(id, from, to).await? {
            let batch = self.get_batch(id).await?;
            return Err(ImportError::InvalidState {
                batch_id: id,
                status: batch.status,
                action,
            });
        }
        info!(batch_id = %id, status = %to, "batch status changed");
        self.get_batch(id).await
    }
}
