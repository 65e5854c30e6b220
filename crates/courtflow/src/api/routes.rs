use std::path::Path;

use axum::extract::{Multipart, Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use courtflow_core::import::{ImportOptions, InitiateImport};
use courtflow_core::model::{BatchFilter, ErrorFilter, ErrorType, ProcessingMode, Severity};
use courtflow_core::uploads;
use courtflow_core::ImportError;
use courtflow_parser::{validate_file, Upload};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;

/// Optional `config` multipart field.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct UploadConfig {
    dry_run: bool,
    early_failure_threshold: Option<usize>,
}

struct UploadForm {
    contents: Vec<u8>,
    filename: String,
    content_type: Option<String>,
    config: UploadConfig,
    user_id: String,
}

const ANONYMOUS_USER: &str = "anonymous";

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut file: Option<(Vec<u8>, String, Option<String>)> = None;
    let mut config = UploadConfig::default();
    let mut user_id = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "file" => {
                if file.is_some() {
                    return Err(ApiError::bad_request(
                        "Send exactly one field named 'file'",
                    ));
                }
                let filename = field.file_name().unwrap_or("upload.csv").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                file = Some((bytes.to_vec(), filename, content_type));
            }
            "config" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    config = serde_json::from_str(&text).map_err(|err| {
                        ApiError::bad_request(format!("Invalid 'config' field: {err}"))
                            .with_suggestion(
                                "Send JSON such as {\"dryRun\": true, \"earlyFailureThreshold\": 5}",
                            )
                    })?;
                }
            }
            "userId" => {
                let text = field.text().await.map_err(multipart_error)?;
                if !text.trim().is_empty() {
                    user_id = Some(text.trim().to_string());
                }
            }
            _ => {}
        }
    }

    let (contents, filename, content_type) = file.ok_or_else(|| {
        ApiError::bad_request("No file provided")
            .with_suggestion("Attach the CSV in a multipart field named 'file'")
    })?;

    Ok(UploadForm {
        contents,
        filename,
        content_type,
        config,
        user_id: user_id.unwrap_or_else(|| ANONYMOUS_USER.to_string()),
    })
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::new(StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE", err.body_text())
            .with_suggestion("Split the file into smaller uploads")
    } else {
        ApiError::bad_request(format!("Failed to read multipart body: {}", err.body_text()))
    }
}

pub async fn create_import(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let form = read_form(multipart).await?;
    let config = state.config();

    let report = validate_file(
        &Upload {
            filename: &form.filename,
            content_type: form.content_type.as_deref(),
            contents: &form.contents,
        },
        &config.intake_limits(),
    );
    if !report.is_valid {
        let body = json!({
            "success": false,
            "error": "File failed validation",
            "code": "INVALID_FILE",
            "errors": report.errors,
            "warnings": report.warnings,
        });
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Json(body)).into_response());
    }

    let staged = uploads::stage_upload(&config.upload_dir, &form.contents)
        .await
        .map_err(|err| state.error(err))?;

    if form.config.dry_run {
        let result = state
            .service()
            .preview_import(
                staged.clone(),
                &form.filename,
                &form.user_id,
                form.config.early_failure_threshold,
            )
            .await;
        discard(&staged).await;
        let summary = result.map_err(|err| state.error(err))?;
        let body = json!({
            "success": true,
            "batchId": null,
            "processingMode": ProcessingMode::DryRun,
            "summary": summary,
            "warnings": report.warnings,
        });
        return Ok((StatusCode::OK, Json(body)).into_response());
    }

    let started = state
        .service()
        .initiate_import(InitiateImport {
            file_path: staged.clone(),
            filename: form.filename,
            file_size: form.contents.len() as u64,
            user_id: form.user_id,
            options: ImportOptions {
                early_failure_threshold: form.config.early_failure_threshold,
                force_sync: false,
            },
        })
        .await;

    let started = match started {
        Ok(started) => started,
        Err(err) => {
            if matches!(err, ImportError::Duplicate { .. }) {
                discard(&staged).await;
            }
            return Err(state.error(err));
        }
    };

    let status = match started.processing_mode {
        ProcessingMode::Async => StatusCode::ACCEPTED,
        ProcessingMode::Sync | ProcessingMode::DryRun => StatusCode::OK,
    };
    let body = json!({
        "success": true,
        "batchId": started.batch_id,
        "processingMode": started.processing_mode,
        "jobId": started.job_id,
        "summary": started.summary,
        "warnings": report.warnings,
    });
    Ok((status, Json(body)).into_response())
}

async fn discard(path: &Path) {
    if let Err(err) = uploads::remove_staged(path).await {
        warn!(path = %path.display(), error = %err, "failed to remove staged upload");
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    page: Option<u32>,
    limit: Option<u32>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
}

pub async fn list_imports(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let defaults = BatchFilter::default();
    let status = query
        .status
        .as_deref()
        .map(str::parse)
        .transpose()
        .map_err(|err: String| ApiError::bad_request(err))?;
    let filter = BatchFilter {
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
        status,
        from: query.from,
        to: query.to,
    };

    let page = state
        .service()
        .list_batches(filter)
        .await
        .map_err(|err| state.error(err))?;

    Ok(Json(json!({
        "success": true,
        "batches": page.items,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": page.total,
            "totalPages": page.total_pages(),
        },
    })))
}

pub async fn get_import(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch = state
        .service()
        .get_batch(id)
        .await
        .map_err(|err| state.error(err))?;
    Ok(Json(json!({ "success": true, "batch": batch })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorQuery {
    page: Option<u32>,
    limit: Option<u32>,
    error_type: Option<String>,
    severity: Option<String>,
}

pub async fn list_import_errors(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
    Query(query): Query<ErrorQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let defaults = ErrorFilter::default();
    let error_type = query
        .error_type
        .as_deref()
        .map(str::parse::<ErrorType>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let severity = query
        .severity
        .as_deref()
        .map(str::parse::<Severity>)
        .transpose()
        .map_err(ApiError::bad_request)?;
    let filter = ErrorFilter {
        page: query.page.unwrap_or(defaults.page),
        limit: query.limit.unwrap_or(defaults.limit),
        error_type,
        severity,
    };

    let page = state
        .service()
        .list_errors(id, filter)
        .await
        .map_err(|err| state.error(err))?;

    Ok(Json(json!({
        "success": true,
        "errors": page.items,
        "pagination": {
            "page": page.page,
            "limit": page.limit,
            "total": page.total,
            "totalPages": page.total_pages(),
        },
    })))
}

pub async fn verify_import(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .service()
        .verify_batch(id)
        .await
        .map_err(|err| state.error(err))?;
    Ok(Json(json!({ "success": true, "verification": report })))
}

pub async fn cancel_import(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<Uuid>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let batch = state
        .service()
        .cancel_batch(id)
        .await
        .map_err(|err| state.error(err))?;
    Ok(Json(json!({ "success": true, "batch": batch })))
}
