use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use courtflow_core::ImportError;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    success: bool,
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    duplicate_batch_id: Option<Uuid>,
}

/// Every failed request renders as `{success: false, error, code, suggestion}`.
/// Internal details are attached only in development mode.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    suggestion: Option<String>,
    details: Option<String>,
    duplicate_batch_id: Option<Uuid>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            suggestion: None,
            details: None,
            duplicate_batch_id: None,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn from_import(err: ImportError, development_mode: bool) -> Self {
        let mut api = match &err {
            ImportError::Duplicate { batch_id } => {
                let mut api = Self::new(
                    StatusCode::CONFLICT,
                    "DUPLICATE_IMPORT",
                    format!("This file was already imported as batch {batch_id}"),
                )
                .with_suggestion(
                    "Review the earlier batch instead of uploading the same file again",
                );
                api.duplicate_batch_id = Some(*batch_id);
                api
            }
            ImportError::BatchNotFound(_) => {
                Self::new(StatusCode::NOT_FOUND, "BATCH_NOT_FOUND", err.to_string())
            }
            ImportError::InvalidState { .. } => {
                Self::new(StatusCode::CONFLICT, "INVALID_BATCH_STATE", err.to_string())
            }
            ImportError::Parse(_) => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_FILE",
                "The file could not be read as a court returns CSV",
            )
            .with_suggestion("Save the file as CSV UTF-8 and upload it again"),
            ImportError::Persistence(inner) if inner.is_connection_class() => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "DATABASE_UNAVAILABLE",
                "The database is temporarily unavailable",
            )
            .with_suggestion("Wait a moment and retry the upload"),
            ImportError::Io(_)
            | ImportError::Persistence(_)
            | ImportError::Queue(_)
            | ImportError::Config(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "The import could not be processed",
            )
            .with_suggestion("Retry the request; contact support if it keeps failing"),
        };

        if api.status.is_server_error() {
            tracing::error!(error = %err, code = api.code, "import request failed");
        }
        if development_mode {
            api.details = Some(err.to_string());
        }
        api
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.message,
            code: self.code,
            suggestion: self.suggestion,
            details: self.details,
            duplicate_batch_id: self.duplicate_batch_id,
        };
        (self.status, Json(body)).into_response()
    }
}
