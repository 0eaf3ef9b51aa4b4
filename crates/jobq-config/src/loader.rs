//! Configuration loader with layered sources.

use crate::AppConfig;
use config::{Config, Environment, File};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    /// A source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The configuration was read but is not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration loader with runtime reload support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: String,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `JOBQ__` prefix, e.g. `JOBQ__STORE__HOST`
    pub fn new(config_dir: impl Into<String>) -> Result<Self, ConfigurationError> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> Result<Self, ConfigurationError> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    pub async fn reload(&self) -> Result<(), ConfigurationError> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    fn load_config(config_dir: &str) -> Result<AppConfig, ConfigurationError> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var("JOBQ_ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = format!("{config_dir}/{name}.toml");
            if Path::new(&path).exists() {
                debug!("Loading config from: {}", path);
                builder = builder.add_source(File::with_name(&path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("JOBQ")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let app_config: AppConfig = builder.build()?.try_deserialize()?;
        validate_config(&app_config)?;

        Ok(app_config)
    }
}

/// Validates a loaded configuration.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigurationError> {
    let store = &config.store;
    if store.host.is_empty() {
        return Err(ConfigurationError::Invalid("store.host is required".to_string()));
    }
    if store.database.is_empty() {
        return Err(ConfigurationError::Invalid("store.database is required".to_string()));
    }
    if store.max_connections == 0 {
        return Err(ConfigurationError::Invalid(
            "store.max_connections must be at least 1".to_string(),
        ));
    }
    if store.min_connections > store.max_connections {
        return Err(ConfigurationError::Invalid(format!(
            "store.min_connections ({}) exceeds store.max_connections ({})",
            store.min_connections, store.max_connections
        )));
    }

    let queue = &config.queue;
    if queue.max_job_type < 1 {
        return Err(ConfigurationError::Invalid(
            "queue.max_job_type must be at least 1".to_string(),
        ));
    }
    if queue.lock_retry.max_attempts == 0 {
        return Err(ConfigurationError::Invalid(
            "queue.lock_retry.max_attempts must be at least 1".to_string(),
        ));
    }
    for (logical, physical) in queue.naming.entries() {
        let valid = !physical.is_empty()
            && physical
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(ConfigurationError::Invalid(format!(
                "queue.naming: {physical:?} is not a valid name for {logical}"
            )));
        }
    }

    Ok(())
}
