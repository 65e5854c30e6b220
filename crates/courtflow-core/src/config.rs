use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use courtflow_parser::{EarlyFailurePolicy, IntakeLimits};
use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_PATH_ENV: &str = "COURTFLOW_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("{key} has an invalid value '{value}'")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Policy knobs for one import. Every field has a default.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub max_file_size_bytes: u64,
    pub max_rows: usize,
    pub sample_rows: usize,
    /// Consecutive failing rows that stop a batch; 0 never stops.
    pub early_failure_threshold: usize,
    pub progress_interval: usize,
    pub error_preview_limit: usize,
    pub upload_dir: PathBuf,
    pub development_mode: bool,
    pub queue_probe_timeout_ms: u64,
}

impl Default for ImportConfig {
    fn default() -> Self {
        let limits = IntakeLimits::default();
        Self {
            max_file_size_bytes: limits.max_file_size_bytes,
            max_rows: limits.max_rows,
            sample_rows: limits.sample_rows,
            early_failure_threshold: EarlyFailurePolicy::default().threshold,
            progress_interval: 100,
            error_preview_limit: 50,
            upload_dir: PathBuf::from("uploads"),
            development_mode: false,
            queue_probe_timeout_ms: 500,
        }
    }
}

/// Postgres pool sizing, under `[database]` in the config file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    /// Apply embedded migrations when a service starts.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout_secs: 10,
            run_migrations: true,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

impl ImportConfig {
    pub fn intake_limits(&self) -> IntakeLimits {
        IntakeLimits {
            max_file_size_bytes: self.max_file_size_bytes,
            max_rows: self.max_rows,
            sample_rows: self.sample_rows,
        }
    }

    pub fn early_failure_policy(&self, override_threshold: Option<usize>) -> EarlyFailurePolicy {
        EarlyFailurePolicy::new(override_threshold.unwrap_or(self.early_failure_threshold))
    }

    pub fn queue_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.queue_probe_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub bind_address: String,
    pub database: DatabaseConfig,
    pub import: ImportConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            redis_url: None,
            bind_address: "0.0.0.0:8080".to_string(),
            database: DatabaseConfig::default(),
            import: ImportConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the TOML file named by `COURTFLOW_CONFIG`, then the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) if !path.trim().is_empty() => Self::from_file(Path::new(path.trim()))?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Overlays variables returned by `lookup`; unset or blank ones are skipped.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("DATABASE_URL").or_else(|| get("COURTFLOW_DATABASE_URL")) {
            self.database_url = Some(url);
        }
        if let Some(url) = get("REDIS_URL") {
            self.redis_url = Some(url);
        }
        if let Some(bind) = get("COURTFLOW_BIND") {
            self.bind_address = bind;
        }
        if let Some(dir) = get("COURTFLOW_UPLOAD_DIR") {
            self.import.upload_dir = PathBuf::from(dir);
        }
        if let Some(value) = get("COURTFLOW_MAX_FILE_SIZE") {
            self.import.max_file_size_bytes = parse_value("COURTFLOW_MAX_FILE_SIZE", &value)?;
        }
        if let Some(value) = get("COURTFLOW_MAX_ROWS") {
            self.import.max_rows = parse_value("COURTFLOW_MAX_ROWS", &value)?;
        }
        if let Some(value) = get("COURTFLOW_SAMPLE_ROWS") {
            self.import.sample_rows = parse_value("COURTFLOW_SAMPLE_ROWS", &value)?;
        }
        if let Some(value) = get("COURTFLOW_EARLY_FAILURE_THRESHOLD") {
            self.import.early_failure_threshold =
                parse_value("COURTFLOW_EARLY_FAILURE_THRESHOLD", &value)?;
        }
        if let Some(value) = get("COURTFLOW_DB_MAX_CONNECTIONS") {
            self.database.max_connections = parse_value("COURTFLOW_DB_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = get("COURTFLOW_DB_ACQUIRE_TIMEOUT_SECS") {
            self.database.acquire_timeout_secs =
                parse_value("COURTFLOW_DB_ACQUIRE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = get("COURTFLOW_DEV_MODE") {
            self.import.development_mode = parse_flag("COURTFLOW_DEV_MODE", &value)?;
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL or COURTFLOW_DATABASE_URL"))
    }
}

fn parse_value<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_flag(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
