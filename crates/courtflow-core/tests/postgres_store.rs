use std::env;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use courtflow_core::config::{DatabaseConfig, ImportConfig};
use courtflow_core::db;
use courtflow_core::import::{ImportOptions, ImportService, InitiateImport};
use courtflow_core::model::{BatchStatus, ErrorFilter, ErrorType};
use courtflow_core::store::PostgresStore;
use courtflow_core::uploads::stage_upload;
use courtflow_core::ImportError;

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../courtflow-parser/tests/data")
        .join(name);
    std::fs::read(path).expect("read fixture")
}

#[tokio::test]
async fn postgres_import_round_trip() -> Result<()> {
    let database_url = match env::var("COURTFLOW_TEST_DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!(
                "Skipping postgres_import_round_trip because COURTFLOW_TEST_DATABASE_URL is not set"
            );
            return Ok(());
        }
    };

    let pool = db::connect(&database_url, &DatabaseConfig::default()).await?;
    db::run_migrations(&pool).await?;
    sqlx::query(
        "TRUNCATE TABLE case_judge_assignments, case_activities, cases, judges, courts, import_errors, import_batches CASCADE",
    )
    .execute(&pool)
    .await?;

    let uploads = tempfile::tempdir()?;
    let config = ImportConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..ImportConfig::default()
    };
    let service = ImportService::new(Arc::new(PostgresStore::new(pool.clone())), None, config);

    let contents = fixture("row3_bad_day.csv");
    let request = |file_path| InitiateImport {
        file_path,
        filename: "row3_bad_day.csv".into(),
        file_size: contents.len() as u64,
        user_id: "tester".into(),
        options: ImportOptions::default(),
    };

    let started = service
        .initiate_import(request(stage_upload(uploads.path(), &contents).await?))
        .await?;
    let batch = service.get_batch(started.batch_id).await?;
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.successful_records, 3);
    assert_eq!(batch.failed_records, 1);

    let errors = service
        .list_errors(started.batch_id, ErrorFilter::default())
        .await?;
    assert_eq!(errors.total, 1);
    assert_eq!(errors.items[0].error_type, ErrorType::InvalidRange);
    assert_eq!(errors.items[0].row_number, 3);

    let report = service.verify_batch(started.batch_id).await?;
    assert!(report.is_consistent, "{report:?}");
    assert_eq!(report.imported.activities, 3);

    let again = service
        .initiate_import(request(stage_upload(uploads.path(), &contents).await?))
        .await;
    assert!(matches!(again, Err(ImportError::Duplicate { batch_id }) if batch_id == started.batch_id));

    // Same activities under a new checksum hit the unique constraint row by row.
    let resubmitted = fixture("duplicate_rows.csv");
    let second = service
        .initiate_import(InitiateImport {
            file_path: stage_upload(uploads.path(), &resubmitted).await?,
            filename: "duplicate_rows.csv".into(),
            file_size: resubmitted.len() as u64,
            user_id: "tester".into(),
            options: ImportOptions::default(),
        })
        .await?;
    let collisions = service
        .list_errors(
            second.batch_id,
            ErrorFilter {
                error_type: Some(ErrorType::DuplicateError),
                ..ErrorFilter::default()
            },
        )
        .await?;
    assert_eq!(collisions.total, 2);

    Ok(())
}
