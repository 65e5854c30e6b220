use std::env;
use std::time::Duration;

use anyhow::Result;
use courtflow_core::queue::{ImportJob, JobQueue, RedisJobQueue};
use uuid::Uuid;

#[tokio::test]
async fn redis_queue_round_trip() -> Result<()> {
    let redis_url = match env::var("COURTFLOW_TEST_REDIS_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("Skipping redis_queue_round_trip because COURTFLOW_TEST_REDIS_URL is not set");
            return Ok(());
        }
    };

    let queue = RedisJobQueue::connect(&redis_url)
        .await?
        .with_key(format!("courtflow:test-jobs:{}", Uuid::new_v4()));
    queue.ping().await?;

    let first = ImportJob::new(Uuid::new_v4(), "/srv/uploads/a.csv", "a.csv", "tester", None);
    let second = ImportJob::new(Uuid::new_v4(), "/srv/uploads/b.csv", "b.csv", "tester", Some(3));
    queue.enqueue(&first).await?;
    queue.enqueue(&second).await?;
    assert_eq!(queue.depth().await?, 2);

    assert_eq!(queue.dequeue(Duration::from_secs(1)).await?, Some(first));
    assert_eq!(queue.dequeue(Duration::from_secs(1)).await?, Some(second));
    assert_eq!(queue.dequeue(Duration::from_secs(1)).await?, None);
    Ok(())
}
