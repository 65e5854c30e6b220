use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use courtflow::api::{router, AppState};
use courtflow_core::config::ImportConfig;
use courtflow_core::queue::{JobQueue, MemoryJobQueue};
use courtflow_core::store::MemoryStore;
use courtflow_core::ImportService;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "courtflow-test-boundary";

fn fixture(name: &str) -> Vec<u8> {
    let path = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../courtflow-parser/tests/data")
        .join(name);
    std::fs::read(path).expect("read fixture")
}

struct TestApp {
    router: Router,
    store: Arc<MemoryStore>,
    _uploads: TempDir,
}

fn app(queue: Option<Arc<MemoryJobQueue>>) -> TestApp {
    let uploads = tempfile::tempdir().expect("tempdir");
    let store = Arc::new(MemoryStore::new());
    let config = ImportConfig {
        upload_dir: uploads.path().to_path_buf(),
        ..ImportConfig::default()
    };
    let service = ImportService::new(
        store.clone(),
        queue.map(|queue| queue as Arc<dyn JobQueue>),
        config,
    );
    TestApp {
        router: router(AppState::new(Arc::new(service))),
        store,
        _uploads: uploads,
    }
}

fn multipart_body(filename: &str, contents: &[u8], config: Option<&str>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(config) = config {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"config\"\r\n\r\n{config}\r\n"
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"userId\"\r\n\r\nclerk@judiciary\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: text/csv\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(contents);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn upload(
    router: &Router,
    filename: &str,
    contents: &[u8],
    config: Option<&str>,
) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri("/api/imports")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(filename, contents, config)))?;
    send(router, request).await
}

async fn get(router: &Router, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder().uri(uri).body(Body::empty())?;
    send(router, request).await
}

async fn post(router: &Router, uri: &str) -> Result<(StatusCode, Value)> {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())?;
    send(router, request).await
}

async fn send(router: &Router, request: Request<Body>) -> Result<(StatusCode, Value)> {
    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = response.into_body().collect().await?.to_bytes();
    let body = serde_json::from_slice(&bytes)?;
    Ok((status, body))
}

#[tokio::test]
async fn valid_upload_is_processed_synchronously() -> Result<()> {
    let app = app(None);

    let (status, body) = upload(&app.router, "returns.csv", &fixture("valid_returns.csv"), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["processingMode"], "sync");
    assert_eq!(body["summary"]["status"], "COMPLETED");
    assert_eq!(body["summary"]["successfulRecords"], 3);
    assert_eq!(body["summary"]["failedRecords"], 0);
    assert_eq!(app.store.activity_count().await, 3);

    let batch_id = body["batchId"].as_str().expect("batch id").to_string();
    let (status, body) = get(&app.router, &format!("/api/imports/{batch_id}")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["status"], "COMPLETED");
    assert_eq!(body["batch"]["createdBy"], "clerk@judiciary");
    Ok(())
}

#[tokio::test]
async fn structurally_invalid_upload_lists_every_issue() -> Result<()> {
    let app = app(None);

    let (status, body) =
        upload(&app.router, "returns.csv", &fixture("missing_columns.csv"), None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    let errors = body["errors"].as_array().expect("errors array");
    let missing = errors
        .iter()
        .filter(|issue| issue["kind"] == "missing_column")
        .count();
    assert_eq!(missing, 2);
    assert_eq!(app.store.batch_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn non_csv_upload_is_rejected() -> Result<()> {
    let app = app(None);

    let (status, body) = upload(&app.router, "returns.xlsx", b"not,a\ncsv,file\n", None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["errors"]
        .as_array()
        .expect("errors array")
        .iter()
        .any(|issue| issue["kind"] == "file_type"));
    Ok(())
}

#[tokio::test]
async fn reupload_of_imported_file_conflicts() -> Result<()> {
    let app = app(None);
    let contents = fixture("valid_returns.csv");

    let (_, first) = upload(&app.router, "returns.csv", &contents, None).await?;
    let (status, body) = upload(&app.router, "returns-again.csv", &contents, None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "DUPLICATE_IMPORT");
    assert_eq!(body["duplicateBatchId"], first["batchId"]);
    assert_eq!(app.store.batch_count().await, 1);
    Ok(())
}

#[tokio::test]
async fn dry_run_reports_errors_without_writing() -> Result<()> {
    let app = app(None);

    let (status, body) = upload(
        &app.router,
        "returns.csv",
        &fixture("row3_bad_day.csv"),
        Some(r#"{"dryRun": true}"#),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["processingMode"], "dry_run");
    assert!(body["batchId"].is_null());
    assert_eq!(body["summary"]["dryRun"], true);
    assert_eq!(body["summary"]["failedRecords"], 1);
    assert_eq!(body["summary"]["errors"][0]["rowNumber"], 3);
    assert_eq!(app.store.batch_count().await, 0);
    assert_eq!(app.store.activity_count().await, 0);
    Ok(())
}

#[tokio::test]
async fn malformed_config_field_is_a_bad_request() -> Result<()> {
    let app = app(None);

    let (status, body) = upload(
        &app.router,
        "returns.csv",
        &fixture("valid_returns.csv"),
        Some("{dryRun"),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["suggestion"].is_string());
    Ok(())
}

#[tokio::test]
async fn row_errors_are_paginated_and_filterable() -> Result<()> {
    let app = app(None);

    let (_, body) = upload(&app.router, "returns.csv", &fixture("row3_bad_day.csv"), None).await?;
    let batch_id = body["batchId"].as_str().expect("batch id").to_string();

    let (status, body) = get(&app.router, &format!("/api/imports/{batch_id}/errors")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 1);
    assert_eq!(body["errors"][0]["field"], "date_dd");
    assert_eq!(body["errors"][0]["errorType"], "invalid_range");

    let (_, body) = get(
        &app.router,
        &format!("/api/imports/{batch_id}/errors?errorType=duplicate_error"),
    )
    .await?;
    assert_eq!(body["pagination"]["total"], 0);

    let (status, _) = get(
        &app.router,
        &format!("/api/imports/{batch_id}/errors?severity=fatal"),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn history_lists_batches_and_rejects_unknown_status() -> Result<()> {
    let app = app(None);
    upload(&app.router, "a.csv", &fixture("valid_returns.csv"), None).await?;
    upload(&app.router, "b.csv", &fixture("row3_bad_day.csv"), None).await?;

    let (status, body) = get(&app.router, "/api/imports?status=completed&limit=1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["total"], 2);
    assert_eq!(body["pagination"]["totalPages"], 2);
    assert_eq!(body["batches"].as_array().map(Vec::len), Some(1));

    let (status, body) = get(&app.router, "/api/imports?status=bogus").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "BAD_REQUEST");
    Ok(())
}

#[tokio::test]
async fn completed_batch_verifies_and_cannot_be_cancelled() -> Result<()> {
    let app = app(None);
    let (_, body) = upload(&app.router, "returns.csv", &fixture("valid_returns.csv"), None).await?;
    let batch_id = body["batchId"].as_str().expect("batch id").to_string();

    let (status, body) = get(&app.router, &format!("/api/imports/{batch_id}/verify")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["verification"]["isConsistent"], true);
    assert_eq!(body["verification"]["imported"]["activities"], 3);

    let (status, body) = post(&app.router, &format!("/api/imports/{batch_id}/cancel")).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "INVALID_BATCH_STATE");
    Ok(())
}

#[tokio::test]
async fn queued_upload_is_accepted_and_can_be_cancelled() -> Result<()> {
    let queue = Arc::new(MemoryJobQueue::new());
    let app = app(Some(queue.clone()));

    let (status, body) = upload(&app.router, "returns.csv", &fixture("valid_returns.csv"), None).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["processingMode"], "async");
    assert!(body["jobId"].is_string());
    assert!(body.get("summary").map_or(true, Value::is_null));
    assert_eq!(queue.depth().await?, 1);

    let batch_id = body["batchId"].as_str().expect("batch id").to_string();
    let (status, body) = post(&app.router, &format!("/api/imports/{batch_id}/cancel")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["batch"]["status"], "FAILED");
    Ok(())
}

#[tokio::test]
async fn unknown_batch_is_not_found() -> Result<()> {
    let app = app(None);

    let (status, body) = get(
        &app.router,
        "/api/imports/00000000-0000-0000-0000-000000000000",
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "BATCH_NOT_FOUND");
    assert_eq!(body["success"], false);
    Ok(())
}
