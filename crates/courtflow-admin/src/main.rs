use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use courtflow_core::config::AppConfig;
use courtflow_core::queue::{JobQueue, RedisJobQueue};
use courtflow_core::store::ImportStore;
use courtflow_core::{db, uploads, ImportService};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(author, version, about = "CourtFlow administrative tooling", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Mark a pending or processing batch FAILED
    Cancel(BatchArgs),
    /// Mark a batch CLEANED and delete its staged upload
    Clean(BatchArgs),
    /// Plan (and optionally apply) removal of abandoned staged uploads
    PurgeUploads(PurgeUploadsArgs),
    /// Re-enqueue pending batches whose jobs never reached a worker
    RequeuePending(RequeuePendingArgs),
}

#[derive(Args, Debug)]
struct BatchArgs {
    batch_id: Uuid,
}

#[derive(Args, Debug)]
struct PurgeUploadsArgs {
    /// Only consider files last modified at least this many hours ago
    #[arg(long, default_value_t = 24)]
    older_than_hours: u64,
    /// Apply deletions instead of running in dry-run mode
    #[arg(long)]
    apply: bool,
}

#[derive(Args, Debug)]
struct RequeuePendingArgs {
    /// Only requeue batches created at least this many minutes ago
    #[arg(long, default_value_t = 30)]
    older_than_minutes: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = AppConfig::load().context("failed to load configuration")?;

    match cli.command {
        Command::Cancel(args) => handle_cancel(config, args).await,
        Command::Clean(args) => handle_clean(config, args).await,
        Command::PurgeUploads(args) => handle_purge_uploads(config, args).await,
        Command::RequeuePending(args) => handle_requeue_pending(config, args).await,
    }
}

async fn service(config: &AppConfig, queue: Option<Arc<dyn JobQueue>>) -> Result<ImportService> {
    let store = Arc::new(db::open_store(config, true).await?);
    Ok(ImportService::new(store, queue, config.import.clone()))
}

async fn handle_cancel(config: AppConfig, args: BatchArgs) -> Result<()> {
    let batch = service(&config, None).await?.cancel_batch(args.batch_id).await?;
    println!("Batch {} is now {}.", batch.id, batch.status);
    Ok(())
}

async fn handle_clean(config: AppConfig, args: BatchArgs) -> Result<()> {
    let batch = service(&config, None).await?.cleanup_batch(args.batch_id).await?;
    println!(
        "Batch {} is now {}; removed {}.",
        batch.id, batch.status, batch.file_path
    );
    Ok(())
}

async fn handle_purge_uploads(config: AppConfig, args: PurgeUploadsArgs) -> Result<()> {
    let store = db::open_store(&config, true).await?;
    let in_use = store.active_file_paths().await?;
    let upload_dir = &config.import.upload_dir;
    let older_than = Duration::from_secs(args.older_than_hours.saturating_mul(3600));

    let plan = uploads::plan_purge(upload_dir, &in_use, older_than)
        .await
        .with_context(|| format!("failed to scan {}", upload_dir.display()))?;

    if plan.orphaned.is_empty() {
        println!(
            "No abandoned uploads found in {} ({} in use, {} too recent).",
            upload_dir.display(),
            plan.kept_in_use,
            plan.kept_recent
        );
    } else {
        println!("Found {} abandoned uploads:", plan.orphaned.len());
        for path in &plan.orphaned {
            println!("    {}", path.display());
        }
    }

    if args.apply {
        let removed = uploads::apply_purge(&plan).await?;
        info!(removed, "purged abandoned uploads");
        println!("Removed {removed} abandoned uploads.");
    } else if !plan.orphaned.is_empty() {
        println!("Run again with --apply to delete the abandoned uploads.");
    }

    Ok(())
}

async fn handle_requeue_pending(config: AppConfig, args: RequeuePendingArgs) -> Result<()> {
    let redis_url = config
        .redis_url
        .as_deref()
        .context("REDIS_URL must be set to requeue batches")?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::connect(redis_url).await?);
    let cutoff = chrono::Utc::now() - chrono::Duration::minutes(args.older_than_minutes);

    let requeued = service(&config, Some(queue))
        .await?
        .requeue_pending(cutoff)
        .await?;

    if requeued.is_empty() {
        println!("No pending batches older than {} minutes.", args.older_than_minutes);
    } else {
        println!("Requeued {} batches:", requeued.len());
        for id in &requeued {
            println!("    {id}");
        }
    }
    Ok(())
}
