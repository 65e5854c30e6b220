use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::ImportError;
use crate::model::{ImportSummary, ProcessingMode};
use crate::processor::{ImportProcessor, ProcessOptions};
use crate::queue::{ImportJob, JobQueue};

#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// The batch was processed before returning.
    Processed(ImportSummary),
    /// The batch waits in the queue for a worker.
    Queued { job_id: Uuid },
}

#[async_trait]
pub trait ImportExecutor: Send + Sync {
    fn mode(&self) -> ProcessingMode;

    async fn execute(&self, job: ImportJob) -> Result<ExecutionOutcome, ImportError>;
}

pub struct ImmediateExecutor {
    processor: Arc<ImportProcessor>,
}

impl ImmediateExecutor {
    pub fn new(processor: Arc<ImportProcessor>) -> Self {
        Self { processor }
    }
}

#[async_trait]
impl ImportExecutor for ImmediateExecutor {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Sync
    }

    async fn execute(&self, job: ImportJob) -> Result<ExecutionOutcome, ImportError> {
        let summary = self
            .processor
            .process_import(&job, ProcessOptions::for_job(&job))
            .await?;
        Ok(ExecutionOutcome::Processed(summary))
    }
}

pub struct QueuedExecutor {
    queue: Arc<dyn JobQueue>,
}

impl QueuedExecutor {
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ImportExecutor for QueuedExecutor {
    fn mode(&self) -> ProcessingMode {
        ProcessingMode::Async
    }

    async fn execute(&self, job: ImportJob) -> Result<ExecutionOutcome, ImportError> {
        self.queue.enqueue(&job).await?;
        debug!(
            job_id = %job.job_id,
            batch_id = %job.batch_id,
            queue = self.queue.name(),
            "import job enqueued"
        );
        Ok(ExecutionOutcome::Queued { job_id: job.job_id })
    }
}

/// Queued execution when the queue answers a ping within `probe_timeout`,
/// otherwise in-request processing.
pub async fn select_executor(
    queue: Option<&Arc<dyn JobQueue>>,
    processor: &Arc<ImportProcessor>,
    probe_timeout: Duration,
) -> Arc<dyn ImportExecutor> {
    if let Some(queue) = queue {
        match tokio::time::timeout(probe_timeout, queue.ping()).await {
            Ok(Ok(())) => return Arc::new(QueuedExecutor::new(Arc::clone(queue))),
            Ok(Err(err)) => {
                warn!(
                    queue = queue.name(),
                    error = %err,
                    "job queue unreachable, processing synchronously"
                )
            }
            Err(_) => {
                warn!(
                    queue = queue.name(),
                    timeout_ms = probe_timeout.as_millis() as u64,
                    "job queue ping timed out, processing synchronously"
                )
            }
        }
    }
    Arc::new(ImmediateExecutor::new(Arc::clone(processor)))
}
