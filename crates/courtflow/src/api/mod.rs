mod error;
mod routes;
mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

pub use error::ApiError;
pub use state::AppState;

// Room for multipart framing and the non-file fields.
const MULTIPART_OVERHEAD_BYTES: u64 = 64 * 1024;

pub fn router(state: AppState) -> Router {
    let body_limit = state
        .config()
        .max_file_size_bytes
        .saturating_add(MULTIPART_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/api/imports",
            post(routes::create_import).get(routes::list_imports),
        )
        .route("/api/imports/{id}", get(routes::get_import))
        .route("/api/imports/{id}/errors", get(routes::list_import_errors))
        .route("/api/imports/{id}/verify", get(routes::verify_import))
        .route("/api/imports/{id}/cancel", post(routes::cancel_import))
        .layer(DefaultBodyLimit::max(
            usize::try_from(body_limit).unwrap_or(usize::MAX),
        ))
        .with_state(state)
}
