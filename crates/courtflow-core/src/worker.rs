use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::error::ImportError;
use crate::processor::{ImportProcessor, ProcessOptions};
use crate::queue::{ImportJob, JobQueue};

const BACKEND_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Pulls jobs until `shutdown` resolves. A job already dequeued is always
/// finished before the loop checks for shutdown again.
pub async fn run_worker<F>(
    queue: Arc<dyn JobQueue>,
    processor: Arc<ImportProcessor>,
    poll_timeout: Duration,
    shutdown: F,
) -> WorkerStats
where
    F: Future<Output = ()> + Send,
{
    tokio::pin!(shutdown);
    let mut stats = WorkerStats::default();
    info!(queue = queue.name(), "import worker started");

    loop {
        let next = tokio::select! {
            _ = &mut shutdown => break,
            next = queue.dequeue(poll_timeout) => next,
        };

        match next {
            Ok(Some(job)) => handle_job(&processor, &job, &mut stats).await,
            Ok(None) => continue,
            Err(err) => {
                warn!(error = %err, "failed to dequeue import job, retrying");
                tokio::select! {
                    _ = &mut shutdown => break,
                    _ = tokio::time::sleep(BACKEND_RETRY_DELAY) => {}
                }
            }
        }
    }

    info!(
        processed = stats.processed,
        skipped = stats.skipped,
        failed = stats.failed,
        "import worker stopped"
    );
    stats
}

async fn handle_job(processor: &ImportProcessor, job: &ImportJob, stats: &mut WorkerStats) {
    match processor.process_import(job, ProcessOptions::for_job(job)).await {
        Ok(summary) => {
            stats.processed += 1;
            info!(
                job_id = %job.job_id,
                batch_id = %job.batch_id,
                status = %summary.status,
                successful = summary.successful_records,
                failed = summary.failed_records,
                "import job finished"
            );
        }
        Err(ImportError::InvalidState { status, .. }) => {
            stats.skipped += 1;
            info!(
                job_id = %job.job_id,
                batch_id = %job.batch_id,
                %status,
                "skipping job for batch that is no longer pending"
            );
        }
        Err(ImportError::BatchNotFound(_)) => {
            stats.skipped += 1;
            warn!(job_id = %job.job_id, batch_id = %job.batch_id, "skipping job for unknown batch");
        }
        Err(err) => {
            stats.failed += 1;
            error!(
                job_id = %job.job_id,
                batch_id = %job.batch_id,
                error = %err,
                "import job failed"
            );
        }
    }
}
