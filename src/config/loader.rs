//! Configuration Loader
//!
//! Environment-aware configuration loading: a base YAML file, an optional
//! per-environment overlay, then process environment overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::TaskQueueConfig;
use config::{Config, Environment, File};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BASE_FILE_STEM: &str = "task-queue";
const ENV_PREFIX: &str = "TASK_QUEUE";

pub struct ConfigManager {
    config: TaskQueueConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        Self::load_from_directory(None)
    }

    /// Load configuration from a specific directory
    pub fn load_from_directory(config_dir: Option<PathBuf>) -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        Self::load_from_directory_with_env(config_dir, &environment)
    }

    /// Load configuration from a specific directory with explicit environment
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);
        let config = Self::build(&config_directory, environment, true)?;

        info!(
            environment = environment,
            config_directory = %config_directory.display(),
            task_types = config.task_types.len(),
            batch_size = config.worker.batch_size,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an already-built configuration (embedding and tests)
    pub fn from_config(config: TaskQueueConfig, environment: &str) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        })
    }

    pub fn config(&self) -> &TaskQueueConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Configuration rendered for display with the database password masked
    pub fn sanitized(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(&self.config).unwrap_or(serde_json::Value::Null);
        if let Some(url) = value.pointer_mut("/database/url") {
            if let Some(raw) = url.as_str() {
                *url = serde_json::Value::String(mask_password(raw));
            }
        }
        value
    }

    /// Get current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("TASK_QUEUE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("TASK_QUEUE_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        include_process_env: bool,
    ) -> ConfigResult<TaskQueueConfig> {
        let base_path = config_directory.join(format!("{BASE_FILE_STEM}.yaml"));
        if !base_path.is_file() {
            return Err(ConfigurationError::ConfigFileNotFound { path: base_path });
        }
        let overlay_path = config_directory.join(format!("{BASE_FILE_STEM}.{environment}.yaml"));

        debug!(
            base = %base_path.display(),
            overlay = %overlay_path.display(),
            overlay_present = overlay_path.is_file(),
            "Loading configuration sources"
        );

        let mut builder = Config::builder()
            .add_source(File::from(base_path))
            .add_source(File::from(overlay_path).required(false));

        if include_process_env {
            builder = builder
                .add_source(
                    Environment::with_prefix(ENV_PREFIX)
                        .separator("__")
                        .try_parsing(true),
                )
                .set_override_option("database.url", env::var("DATABASE_URL").ok())?;
        }

        let config: TaskQueueConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

fn mask_password(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            let credentials = &url[scheme_end + 3..at];
            match credentials.find(':') {
                Some(colon) => format!(
                    "{}{}:***{}",
                    &url[..scheme_end + 3],
                    &credentials[..colon],
                    &url[at..]
                ),
                None => url.to_string(),
            }
        }
        _ => url.to_string(),
    }
}
