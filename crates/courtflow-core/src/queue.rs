use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify};
use uuid::Uuid;

use crate::error::QueueError;

pub const DEFAULT_QUEUE_KEY: &str = "courtflow:import-jobs";

/// Work item for one PENDING batch. Travels through the queue as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub job_id: Uuid,
    pub batch_id: Uuid,
    pub file_path: String,
    pub filename: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub early_failure_threshold: Option<usize>,
    pub enqueued_at: DateTime<Utc>,
}

impl ImportJob {
    pub fn new(
        batch_id: Uuid,
        file_path: impl Into<String>,
        filename: impl Into<String>,
        user_id: impl Into<String>,
        early_failure_threshold: Option<usize>,
    ) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            batch_id,
            file_path: file_path.into(),
            filename: filename.into(),
            user_id: user_id.into(),
            early_failure_threshold,
            enqueued_at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &'static str;

    /// Succeeds when the backend is reachable right now.
    async fn ping(&self) -> Result<(), QueueError>;

    async fn enqueue(&self, job: &ImportJob) -> Result<(), QueueError>;

    /// Waits up to `timeout` for the oldest job.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<ImportJob>, QueueError>;

    async fn depth(&self) -> Result<u64, QueueError>;
}

/// FIFO job list in Redis: producers `LPUSH`, workers `BRPOP`.
#[derive(Clone)]
pub struct RedisJobQueue {
    conn: ConnectionManager,
    key: String,
}

impl RedisJobQueue {
    pub async fn connect(url: &str) -> Result<Self, QueueError> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self {
            conn,
            key: DEFAULT_QUEUE_KEY.to_string(),
        })
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn ping(&self) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn enqueue(&self, job: &ImportJob) -> Result<(), QueueError> {
        let payload = serde_json::to_string(job)?;
        let mut conn = self.conn.clone();
        conn.lpush::<_, _, ()>(&self.key, payload).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<ImportJob>, QueueError> {
        let mut conn = self.conn.clone();
        // BRPOP takes whole seconds; zero would block forever.
        let seconds = timeout.as_secs().max(1);
        let popped: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(&self.key)
            .arg(seconds)
            .query_async(&mut conn)
            .await?;

        match popped {
            Some((_, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        let mut conn = self.conn.clone();
        let len: u64 = conn.llen(&self.key).await?;
        Ok(len)
    }
}

/// In-process queue with the same FIFO and JSON round trip as Redis.
/// Can be switched offline to exercise the synchronous fallback.
#[derive(Debug)]
pub struct MemoryJobQueue {
    jobs: Mutex<VecDeque<String>>,
    notify: Notify,
    available: AtomicBool,
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self {
            jobs: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            available: AtomicBool::new(true),
        }
    }
}

impl MemoryJobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), QueueError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(QueueError::Unavailable)
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), QueueError> {
        self.check_available()
    }

    async fn enqueue(&self, job: &ImportJob) -> Result<(), QueueError> {
        self.check_available()?;
        let payload = serde_json::to_string(job)?;
        self.jobs.lock().await.push_back(payload);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<ImportJob>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.check_available()?;
            if let Some(payload) = self.jobs.lock().await.pop_front() {
                return Ok(Some(serde_json::from_str(&payload)?));
            }
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return Ok(None);
            }
        }
    }

    async fn depth(&self) -> Result<u64, QueueError> {
        Ok(self.jobs.lock().await.len() as u64)
    }
}
