use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use courtflow::api::{self, AppState};
use courtflow::report;
use courtflow_core::config::AppConfig;
use courtflow_core::import::{ImportOptions, InitiateImport};
use courtflow_core::processor::ProcessOptions;
use courtflow_core::queue::{ImportJob, JobQueue, RedisJobQueue};
use courtflow_core::store::MemoryStore;
use courtflow_core::{db, uploads, worker, ImportProcessor, ImportService};
use courtflow_parser::{validate_file, FileValidationReport, Upload};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const WORKER_POLL_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(author, version, about = "Court returns CSV import service", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP upload API
    Serve(ServeArgs),
    /// Process queued import jobs until interrupted
    Worker,
    /// Apply embedded database migrations
    Migrate,
    /// Import a CSV file from disk
    Import(ImportArgs),
    /// Check a CSV file offline and print every structural and row issue
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Default)]
struct ServeArgs {
    /// Address to listen on, overriding COURTFLOW_BIND
    #[arg(long)]
    bind: Option<String>,
    /// Skip running migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

#[derive(Args, Debug)]
struct ImportArgs {
    file: PathBuf,
    /// Recorded as the batch creator
    #[arg(long, default_value = "cli")]
    user: String,
    /// Validate every row without writing anything
    #[arg(long)]
    dry_run: bool,
    /// Process in this process even when the job queue is reachable
    #[arg(long)]
    sync: bool,
    /// Consecutive failing rows that abort the import (0 disables)
    #[arg(long)]
    threshold: Option<usize>,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    file: PathBuf,
    /// Consecutive failing rows that stop validation (0 disables)
    #[arg(long)]
    threshold: Option<usize>,
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
        Command::Serve(args) => handle_serve(config, args).await,
        Command::Worker => handle_worker(config).await,
        Command::Migrate => handle_migrate(config).await,
        Command::Import(args) => handle_import(config, args).await,
        Command::Validate(args) => handle_validate(config, args).await,
    }
}

/// The queue is optional for the API; without it every upload runs in-request.
async fn connect_queue(config: &AppConfig) -> Option<Arc<dyn JobQueue>> {
    let url = config.redis_url.as_deref()?;
    match RedisJobQueue::connect(url).await {
        Ok(queue) => Some(Arc::new(queue)),
        Err(err) => {
            warn!(error = %err, "job queue unavailable, imports will run synchronously");
            None
        }
    }
}

async fn handle_serve(mut config: AppConfig, args: ServeArgs) -> Result<()> {
    if args.skip_migrations {
        config.database.run_migrations = false;
    }
    let store = Arc::new(db::open_store(&config, false).await?);
    let queue = connect_queue(&config).await;
    tokio::fs::create_dir_all(&config.import.upload_dir)
        .await
        .with_context(|| {
            format!(
                "failed to create upload directory {}",
                config.import.upload_dir.display()
            )
        })?;

    let service = ImportService::new(store, queue, config.import.clone());
    let router = api::router(AppState::new(Arc::new(service)));

    let bind = args.bind.unwrap_or(config.bind_address);
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn handle_worker(config: AppConfig) -> Result<()> {
    let redis_url = config
        .redis_url
        .as_deref()
        .context("REDIS_URL must be set to run a worker")?;
    let queue: Arc<dyn JobQueue> = Arc::new(RedisJobQueue::connect(redis_url).await?);
    let store = Arc::new(db::open_store(&config, false).await?);

    let service = ImportService::new(store, Some(Arc::clone(&queue)), config.import.clone());
    let stats =
        worker::run_worker(queue, service.processor(), WORKER_POLL_TIMEOUT, shutdown_signal()).await;

    println!(
        "Worker stopped: {} processed, {} skipped, {} failed",
        stats.processed, stats.skipped, stats.failed
    );
    Ok(())
}

async fn handle_migrate(config: AppConfig) -> Result<()> {
    db::open_store(&config, true).await?;
    println!("Migrations applied.");
    Ok(())
}

async fn handle_import(config: AppConfig, args: ImportArgs) -> Result<()> {
    let contents = read_file(&args.file).await?;
    let filename = display_name(&args.file);
    let structural = check_structure(&config, &filename, &contents);
    if !structural.is_valid {
        println!("{}", report::structural_table(&structural));
        bail!("{} failed structural validation", args.file.display());
    }

    let store = Arc::new(db::open_store(&config, false).await?);
    let queue = if args.sync || args.dry_run {
        None
    } else {
        connect_queue(&config).await
    };
    let service = ImportService::new(store, queue, config.import.clone());
    let staged = uploads::stage_upload(&config.import.upload_dir, &contents).await?;

    if args.dry_run {
        let result = service
            .preview_import(staged.clone(), &filename, &args.user, args.threshold)
            .await;
        uploads::remove_staged(&staged).await?;
        let summary = result?;
        println!("{}", report::summary_table(&summary));
        if !summary.errors.is_empty() {
            println!("{}", report::row_errors_table(&summary));
        }
        return Ok(());
    }

    let started = service
        .initiate_import(InitiateImport {
            file_path: staged.clone(),
            filename,
            file_size: contents.len() as u64,
            user_id: args.user,
            options: ImportOptions {
                early_failure_threshold: args.threshold,
                force_sync: args.sync,
            },
        })
        .await;
    let started = match started {
        Ok(started) => started,
        Err(err) => {
            uploads::remove_staged(&staged).await?;
            return Err(err.into());
        }
    };

    println!("{}", serde_json::to_string_pretty(&started)?);
    if let Some(summary) = &started.summary {
        println!("{}", report::summary_table(summary));
        if !summary.errors.is_empty() {
            println!("{}", report::row_errors_table(summary));
        }
    }
    Ok(())
}

async fn handle_validate(config: AppConfig, args: ValidateArgs) -> Result<()> {
    let contents = read_file(&args.file).await?;
    let filename = display_name(&args.file);
    let structural = check_structure(&config, &filename, &contents);

    if !structural.errors.is_empty() || !structural.warnings.is_empty() {
        println!("{}", report::structural_table(&structural));
    }
    if !structural.is_valid {
        bail!(
            "{} has {} structural error(s)",
            args.file.display(),
            structural.errors.len()
        );
    }

    // Dry runs never touch the store, so the row checks need no database.
    let processor = ImportProcessor::new(Arc::new(MemoryStore::new()), config.import.clone());
    let job = ImportJob::new(
        Uuid::nil(),
        args.file.to_string_lossy().into_owned(),
        filename,
        "cli",
        args.threshold,
    );
    let summary = processor
        .process_import(&job, ProcessOptions::dry_run(args.threshold))
        .await?;

    println!("{}", report::summary_table(&summary));
    if !summary.errors.is_empty() {
        println!("{}", report::row_errors_table(&summary));
    }
    if summary.failed_records > 0 || summary.abort_reason.is_some() {
        bail!(
            "{} has {} row(s) that would fail to import",
            args.file.display(),
            summary.failed_records
        );
    }
    Ok(())
}

async fn read_file(path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn check_structure(config: &AppConfig, filename: &str, contents: &[u8]) -> FileValidationReport {
    validate_file(
        &Upload {
            filename,
            content_type: None,
            contents,
        },
        &config.import.intake_limits(),
    )
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
