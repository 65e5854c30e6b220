use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use courtflow_core::config::ImportConfig;
use courtflow_core::error::{ConstraintKind, ImportError, PersistenceError};
use courtflow_core::import::{ImportOptions, ImportService, InitiateImport};
use courtflow_core::model::{
    BatchFilter, BatchStatus, ErrorFilter, ErrorType, ProcessingMode, Severity,
};
use courtflow_core::processor::ImportProcessor;
use courtflow_core::queue::{JobQueue, MemoryJobQueue};
use courtflow_core::store::{ImportStore, MemoryStore};
use courtflow_core::uploads::stage_upload;
use courtflow_core::worker::run_worker;
use tempfile::TempDir;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../courtflow-parser/tests/data")
        .join(name);
    std::fs::read(path).expect("read fixture")
}

struct Harness {
    store: Arc<MemoryStore>,
    queue: Option<Arc<MemoryJobQueue>>,
    service: ImportService,
    uploads: TempDir,
}

impl Harness {
    fn new(queue: Option<Arc<MemoryJobQueue>>) -> Self {
        let uploads = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(MemoryStore::new());
        let config = ImportConfig {
            upload_dir: uploads.path().to_path_buf(),
            progress_interval: 2,
            ..ImportConfig::default()
        };
        let processor = Arc::new(
            ImportProcessor::new(store.clone() as Arc<dyn ImportStore>, config)
                .with_current_year(2025),
        );
        let service = ImportService::with_processor(
            store.clone(),
            queue.clone().map(|queue| queue as Arc<dyn JobQueue>),
            processor,
        );
        Self {
            store,
            queue,
            service,
            uploads,
        }
    }

    fn sync() -> Self {
        Self::new(None)
    }

    fn queued() -> Self {
        Self::new(Some(Arc::new(MemoryJobQueue::new())))
    }

    async fn stage(&self, contents: &[u8]) -> PathBuf {
        stage_upload(self.uploads.path(), contents).await.expect("stage upload")
    }

    async fn import(&self, name: &str) -> Result<courtflow_core::import::ImportStarted, ImportError> {
        self.import_bytes(name, &fixture(name), ImportOptions::default()).await
    }

    async fn import_bytes(
        &self,
        name: &str,
        contents: &[u8],
        options: ImportOptions,
    ) -> Result<courtflow_core::import::ImportStarted, ImportError> {
        let file_path = self.stage(contents).await;
        self.service
            .initiate_import(InitiateImport {
                file_path,
                filename: name.to_string(),
                file_size: contents.len() as u64,
                user_id: "clerk@judiciary".to_string(),
                options,
            })
            .await
    }
}

#[tokio::test]
async fn sync_import_reports_row_three_and_balances_counters() -> Result<()> {
    let harness = Harness::sync();

    let started = harness.import("row3_bad_day.csv").await?;
    assert_eq!(started.processing_mode, ProcessingMode::Sync);
    let summary = started.summary.expect("sync imports return a summary");
    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.successful_records, 3);
    assert_eq!(summary.failed_records, 1);

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.total_records, 4);
    assert_eq!(batch.successful_records + batch.failed_records, batch.total_records);
    assert_eq!(batch.error_log["errorsByType"]["invalid_range"], 1);
    assert!(batch.completed_at.is_some());

    let errors = harness
        .service
        .list_errors(started.batch_id, ErrorFilter::default())
        .await?;
    assert_eq!(errors.total, 1);
    let error = &errors.items[0];
    assert_eq!(error.row_number, 3);
    assert_eq!(error.field.as_deref(), Some("date_dd"));
    assert_eq!(error.error_type, ErrorType::InvalidRange);
    assert_eq!(error.suggestion, "Day must be between 1-31. Found: 0");

    assert_eq!(harness.store.activity_count().await, 3);
    Ok(())
}

#[tokio::test]
async fn reupload_of_imported_file_names_prior_batch() -> Result<()> {
    let harness = Harness::sync();
    let first = harness.import("valid_returns.csv").await?;

    match harness.import("valid_returns.csv").await {
        Err(ImportError::Duplicate { batch_id }) => assert_eq!(batch_id, first.batch_id),
        other => panic!("expected duplicate rejection, got {other:?}"),
    }
    assert_eq!(harness.store.batch_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn failed_batch_does_not_block_reupload() -> Result<()> {
    let harness = Harness::sync();
    let first = harness.import("consecutive_failures.csv").await?;
    assert_eq!(
        first.summary.as_ref().map(|summary| summary.status),
        Some(BatchStatus::Failed)
    );

    let second = harness.import("consecutive_failures.csv").await?;
    assert_ne!(first.batch_id, second.batch_id);
    Ok(())
}

#[tokio::test]
async fn dry_run_persists_nothing() -> Result<()> {
    let harness = Harness::sync();
    let path = harness.stage(&fixture("row3_bad_day.csv")).await;

    let summary = harness
        .service
        .preview_import(path, "row3_bad_day.csv", "clerk@judiciary", None)
        .await?;

    assert!(summary.dry_run);
    assert_eq!(summary.batch_id, None);
    assert_eq!(summary.total_records, 4);
    assert_eq!(summary.successful_records, 3);
    assert_eq!(summary.failed_records, 1);
    assert_eq!(summary.errors[0].row_number, 3);

    assert_eq!(harness.store.batch_count().await, 0);
    assert_eq!(harness.store.activity_count().await, 0);
    assert_eq!(harness.store.error_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn consecutive_failures_end_in_one_consolidated_error() -> Result<()> {
    let harness = Harness::sync();
    let started = harness.import("consecutive_failures.csv").await?;

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.successful_records, 0);
    // Row 1 validated but was never written; only rows 2-6 failed.
    assert_eq!(batch.failed_records, 5);
    assert_eq!(batch.total_records, 8);

    let errors = harness
        .service
        .list_errors(started.batch_id, ErrorFilter::default())
        .await?;
    assert_eq!(errors.total, 1);
    assert_eq!(errors.items[0].error_type, ErrorType::EarlyTermination);
    assert_eq!(errors.items[0].severity, Severity::Critical);
    assert!(errors.items[0]
        .message
        .starts_with("Too many consecutive validation errors"));
    assert_eq!(harness.store.activity_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn per_upload_threshold_overrides_configuration() -> Result<()> {
    let harness = Harness::sync();
    let started = harness
        .import_bytes(
            "consecutive_failures.csv",
            &fixture("consecutive_failures.csv"),
            ImportOptions {
                early_failure_threshold: Some(0),
                force_sync: false,
            },
        )
        .await?;

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 2);
    assert_eq!(batch.failed_records, 6);

    let judge_errors = harness
        .service
        .list_errors(
            started.batch_id,
            ErrorFilter {
                error_type: Some(ErrorType::InvalidCharacters),
                ..ErrorFilter::default()
            },
        )
        .await?;
    assert_eq!(judge_errors.total, 6);
    assert!(judge_errors
        .items
        .iter()
        .all(|error| error.field.as_deref() == Some("judge_1")));
    Ok(())
}

#[tokio::test]
async fn repeated_rows_are_flagged_and_skipped() -> Result<()> {
    let harness = Harness::sync();
    let started = harness.import("duplicate_rows.csv").await?;

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 2);
    assert_eq!(batch.failed_records, 1);

    let errors = harness
        .service
        .list_errors(started.batch_id, ErrorFilter::default())
        .await?;
    assert_eq!(errors.items[0].error_type, ErrorType::DuplicateRow);
    assert_eq!(errors.items[0].row_number, 3);
    assert_eq!(harness.store.activity_count().await, 2);
    Ok(())
}

#[tokio::test]
async fn rows_already_in_the_database_are_duplicate_errors() -> Result<()> {
    let harness = Harness::sync();
    harness.import("row3_bad_day.csv").await?;

    // Different bytes pass the checksum guard; rows 1 and 2 then collide
    // with activities written by the first batch.
    let second = harness
        .import_bytes(
            "returns-resubmitted.csv",
            &fixture("duplicate_rows.csv"),
            ImportOptions::default(),
        )
        .await?;

    let batch = harness.service.get_batch(second.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 0);
    assert_eq!(batch.failed_records, 3);

    let collisions = harness
        .service
        .list_errors(
            second.batch_id,
            ErrorFilter {
                error_type: Some(ErrorType::DuplicateError),
                ..ErrorFilter::default()
            },
        )
        .await?;
    assert_eq!(collisions.total, 2);
    assert!(collisions.items[0].message.contains("CMCC 101"));
    Ok(())
}

#[tokio::test]
async fn constraint_failures_do_not_stop_the_batch() -> Result<()> {
    let harness = Harness::sync();
    harness
        .store
        .fail_rows_for_court(
            "Kibera Law Courts",
            PersistenceError::ConstraintViolation {
                kind: ConstraintKind::Check,
                constraint: Some("cases_custody_check".into()),
                detail: "new row violates check constraint".into(),
            },
        )
        .await;

    let started = harness.import("valid_returns.csv").await?;
    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 2);
    assert_eq!(batch.failed_records, 1);

    let errors = harness
        .service
        .list_errors(started.batch_id, ErrorFilter::default())
        .await?;
    assert_eq!(errors.items[0].error_type, ErrorType::ConstraintError);
    assert_eq!(errors.items[0].row_number, 2);
    assert!(!errors.items[0].message.contains("cases_custody_check"));
    Ok(())
}

#[tokio::test]
async fn lost_connection_fails_the_batch() -> Result<()> {
    let harness = Harness::sync();
    harness
        .store
        .fail_rows_for_court(
            "Milimani Law Courts",
            PersistenceError::Connection("connection reset by peer".into()),
        )
        .await;

    let started = harness.import("valid_returns.csv").await?;
    let summary = started.summary.expect("summary");
    assert_eq!(summary.status, BatchStatus::Failed);
    assert!(summary.abort_reason.is_some());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].error_type, ErrorType::ConnectionError);
    assert_eq!(summary.errors[0].severity, Severity::Critical);

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(harness.store.activity_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn store_error_mid_import_fails_the_batch() -> Result<()> {
    let harness = Harness::sync();
    harness
        .store
        .fail_progress_updates(PersistenceError::Other("disk full".into()))
        .await;

    match harness.import("valid_returns.csv").await {
        Err(ImportError::Persistence(PersistenceError::Other(_))) => {}
        other => panic!("expected the store error, got {other:?}"),
    }

    let batches = harness.service.list_batches(BatchFilter::default()).await?;
    assert_eq!(batches.total, 1);
    let stranded = &batches.items[0];
    assert_eq!(stranded.status, BatchStatus::Failed);
    assert_eq!(stranded.total_records, 3);
    assert_eq!(stranded.successful_records, 2);
    assert!(stranded.completed_at.is_some());
    assert!(stranded.error_log["abortReason"]
        .as_str()
        .is_some_and(|reason| reason.contains("disk full")));

    // A failed batch must not block the same file from being retried.
    harness.store.clear_failures().await;
    let retry = harness.import("valid_returns.csv").await?;
    assert_ne!(retry.batch_id, stranded.id);
    assert_eq!(
        harness.service.get_batch(retry.batch_id).await?.status,
        BatchStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn worker_fails_batch_when_store_errors() -> Result<()> {
    let harness = Harness::queued();
    let started = harness.import("valid_returns.csv").await?;
    harness
        .store
        .fail_progress_updates(PersistenceError::Other("relation is locked".into()))
        .await;

    let stats = run_worker(
        harness.queue.clone().expect("queue"),
        harness.service.processor(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;
    assert_eq!(stats.failed, 1);

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.error_log["abortReason"].is_string());
    Ok(())
}

#[tokio::test]
async fn unreadable_staged_file_fails_the_pending_batch() -> Result<()> {
    let harness = Harness::queued();
    let started = harness.import("valid_returns.csv").await?;
    let staged = harness.service.get_batch(started.batch_id).await?.file_path;
    std::fs::remove_file(&staged)?;

    let stats = run_worker(
        harness.queue.clone().expect("queue"),
        harness.service.processor(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;
    assert_eq!(stats.failed, 1);
    assert_eq!(
        harness.service.get_batch(started.batch_id).await?.status,
        BatchStatus::Failed
    );
    Ok(())
}

#[tokio::test]
async fn cancel_during_import_stops_the_row_loop() -> Result<()> {
    let harness = Harness::sync();
    harness.store.cancel_after_rows(1).await;

    let started = harness.import("valid_returns.csv").await?;
    let summary = started.summary.expect("summary");
    assert_eq!(summary.status, BatchStatus::Failed);
    assert_eq!(summary.successful_records, 1);
    assert_eq!(summary.failed_records, 0);

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.successful_records, 1);
    assert_eq!(harness.store.activity_count().await, 1);

    // Nothing moves once the batch has been stopped.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let later = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(later.successful_records, 1);
    assert_eq!(later.failed_records, 0);
    assert_eq!(harness.store.activity_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn reachable_queue_defers_to_worker() -> Result<()> {
    let harness = Harness::queued();
    let queue = harness.queue.clone().expect("queue");

    let started = harness.import("valid_returns.csv").await?;
    assert_eq!(started.processing_mode, ProcessingMode::Async);
    assert!(started.job_id.is_some());
    assert!(started.summary.is_none());
    assert_eq!(
        harness.service.get_batch(started.batch_id).await?.status,
        BatchStatus::Pending
    );
    assert_eq!(queue.depth().await?, 1);

    let stats = run_worker(
        queue.clone(),
        harness.service.processor(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;
    assert_eq!(stats.processed, 1);

    let batch = harness.service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 3);
    assert_eq!(queue.depth().await?, 0);
    Ok(())
}

#[tokio::test]
async fn offline_queue_falls_back_to_sync() -> Result<()> {
    let harness = Harness::queued();
    harness.queue.as_ref().expect("queue").set_available(false);

    let started = harness.import("valid_returns.csv").await?;
    assert_eq!(started.processing_mode, ProcessingMode::Sync);
    assert_eq!(
        harness.service.get_batch(started.batch_id).await?.status,
        BatchStatus::Completed
    );
    Ok(())
}

#[tokio::test]
async fn force_sync_skips_the_queue() -> Result<()> {
    let harness = Harness::queued();
    let started = harness
        .import_bytes(
            "valid_returns.csv",
            &fixture("valid_returns.csv"),
            ImportOptions {
                early_failure_threshold: None,
                force_sync: true,
            },
        )
        .await?;

    assert_eq!(started.processing_mode, ProcessingMode::Sync);
    assert_eq!(harness.queue.as_ref().expect("queue").depth().await?, 0);
    Ok(())
}

#[tokio::test]
async fn cancelled_batch_is_skipped_by_worker() -> Result<()> {
    let harness = Harness::queued();
    let queue = harness.queue.clone().expect("queue");
    let started = harness.import("valid_returns.csv").await?;

    let cancelled = harness.service.cancel_batch(started.batch_id).await?;
    assert_eq!(cancelled.status, BatchStatus::Failed);

    let stats = run_worker(
        queue,
        harness.service.processor(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(200)),
    )
    .await;
    assert_eq!(stats.skipped, 1);
    assert_eq!(harness.store.activity_count().await, 0);

    match harness.service.cancel_batch(started.batch_id).await {
        Err(ImportError::InvalidState { status, .. }) => assert_eq!(status, BatchStatus::Failed),
        other => panic!("expected invalid state, got {other:?}"),
    }
    Ok(())
}

#[tokio::test]
async fn cleanup_removes_staged_file() -> Result<()> {
    let harness = Harness::sync();
    let started = harness.import("valid_returns.csv").await?;
    let staged = harness.service.get_batch(started.batch_id).await?.file_path;
    assert!(Path::new(&staged).exists());

    let cleaned = harness.service.cleanup_batch(started.batch_id).await?;
    assert_eq!(cleaned.status, BatchStatus::Cleaned);
    assert!(!Path::new(&staged).exists());

    assert!(matches!(
        harness.service.cleanup_batch(started.batch_id).await,
        Err(ImportError::InvalidState { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn verification_recounts_completed_batches() -> Result<()> {
    let harness = Harness::queued();
    let queued = harness.import("row3_bad_day.csv").await?;
    assert!(matches!(
        harness.service.verify_batch(queued.batch_id).await,
        Err(ImportError::InvalidState {
            status: BatchStatus::Pending,
            ..
        })
    ));

    run_worker(
        harness.queue.clone().expect("queue"),
        harness.service.processor(),
        Duration::from_millis(20),
        tokio::time::sleep(Duration::from_millis(300)),
    )
    .await;

    let report = harness.service.verify_batch(queued.batch_id).await?;
    assert!(report.is_consistent);
    assert!(report.cases_within_activities);
    assert_eq!(report.imported.activities, 3);
    assert_eq!(report.imported.cases_created, 3);
    assert_eq!(report.imported.judge_assignments, 3);
    Ok(())
}

#[tokio::test]
async fn history_filters_by_status() -> Result<()> {
    let harness = Harness::sync();
    harness.import("valid_returns.csv").await?;
    harness.import("consecutive_failures.csv").await?;

    let all = harness.service.list_batches(BatchFilter::default()).await?;
    assert_eq!(all.total, 2);

    let failed = harness
        .service
        .list_batches(BatchFilter {
            status: Some(BatchStatus::Failed),
            ..BatchFilter::default()
        })
        .await?;
    assert_eq!(failed.total, 1);
    assert_eq!(failed.items[0].filename, "consecutive_failures.csv");

    let future = harness
        .service
        .list_batches(BatchFilter {
            from: Some(Utc::now() + chrono::Duration::hours(1)),
            ..BatchFilter::default()
        })
        .await?;
    assert_eq!(future.total, 0);
    Ok(())
}

#[tokio::test]
async fn unknown_batch_is_not_found() -> Result<()> {
    let harness = Harness::sync();
    let id = uuid::Uuid::new_v4();
    assert!(matches!(
        harness.service.get_batch(id).await,
        Err(ImportError::BatchNotFound(missing)) if missing == id
    ));
    assert!(matches!(
        harness.service.list_errors(id, ErrorFilter::default()).await,
        Err(ImportError::BatchNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn stale_pending_batches_are_requeued() -> Result<()> {
    let harness = Harness::queued();
    let queue = harness.queue.clone().expect("queue");
    let started = harness.import("valid_returns.csv").await?;

    // Lose the original job.
    queue.dequeue(Duration::from_millis(10)).await?;
    harness
        .store
        .backdate(started.batch_id, Utc::now() - chrono::Duration::hours(2))
        .await;

    let requeued = harness
        .service
        .requeue_pending(Utc::now() - chrono::Duration::hours(1))
        .await?;
    assert_eq!(requeued, vec![started.batch_id]);
    assert_eq!(queue.depth().await?, 1);
    Ok(())
}
