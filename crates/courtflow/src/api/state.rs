use std::sync::Arc;

use courtflow_core::config::ImportConfig;
use courtflow_core::ImportService;

use super::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    service: Arc<ImportService>,
}

impl AppState {
    pub fn new(service: Arc<ImportService>) -> Self {
        Self { service }
    }

    pub fn service(&self) -> &ImportService {
        &self.service
    }

    pub fn config(&self) -> &ImportConfig {
        self.service.config()
    }

    pub fn error(&self, err: impl Into<courtflow_core::ImportError>) -> ApiError {
        ApiError::from_import(err.into(), self.config().development_mode)
    }
}
