//! Configuration loader with layered sources.

use crate::AppConfig;
use cadence_core::{CadenceError, CadenceResult, LogFormat};
use config::{Config, ConfigError, Environment, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "CADENCE";

/// Configuration loader with runtime refresh support.
#[derive(Clone)]
pub struct ConfigLoader {
    config: Arc<RwLock<AppConfig>>,
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Creates a new configuration loader.
    ///
    /// Configuration is loaded from multiple sources in order:
    /// 1. `config/default.toml` - Default values
    /// 2. `config/{environment}.toml` - Environment-specific overrides
    /// 3. `config/local.toml` - Local overrides
    /// 4. Environment variables with `CADENCE_` prefix, `__` between levels
    pub fn new(config_dir: impl Into<PathBuf>) -> CadenceResult<Self> {
        let config_dir = config_dir.into();
        let config = Self::load_config(&config_dir)?;

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            config_dir,
        })
    }

    /// Loads configuration from the default location (`./config`).
    pub fn from_default_location() -> CadenceResult<Self> {
        Self::new("./config")
    }

    /// Returns the current configuration.
    pub async fn get(&self) -> AppConfig {
        self.config.read().await.clone()
    }

    /// Reloads the configuration from disk.
    ///
    /// The current configuration is kept if the new one fails to load.
    pub async fn reload(&self) -> CadenceResult<()> {
        let new_config = Self::load_config(&self.config_dir)?;
        let mut config = self.config.write().await;
        *config = new_config;
        info!("Configuration reloaded successfully");
        Ok(())
    }

    /// Loads configuration from the specified directory.
    fn load_config(config_dir: &Path) -> CadenceResult<AppConfig> {
        if let Err(e) = dotenvy::dotenv() {
            debug!("No .env file found or error loading it: {}", e);
        }

        let environment =
            std::env::var(format!("{}_ENVIRONMENT", ENV_PREFIX)).unwrap_or_else(|_| "development".to_string());
        info!("Loading configuration for environment: {}", environment);

        let mut builder = Config::builder();

        for name in ["default", environment.as_str(), "local"] {
            let path = config_dir.join(format!("{}.toml", name));
            if path.exists() {
                debug!("Loading config from: {}", path.display());
                builder = builder.add_source(File::from(path).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().map_err(config_error)?;
        let mut app_config: AppConfig = config.try_deserialize().map_err(config_error)?;
        app_config.app.environment = environment;

        Self::validate_config(&app_config)?;
        Ok(app_config)
    }

    /// Validates the configuration.
    fn validate_config(config: &AppConfig) -> CadenceResult<()> {
        config.jobs.validate().map_err(CadenceError::Configuration)?;

        if config.telemetry.service_name.trim().is_empty() {
            return Err(CadenceError::Configuration(
                "telemetry.service_name must not be empty".to_string(),
            ));
        }

        if config.app.is_production() {
            if config.telemetry.format != LogFormat::Json {
                warn!("Plain log format in production; JSON is easier to ingest");
            }
            if config.jobs.worker.debug {
                warn!("Worker debug observers are enabled in production");
            }
            if config.jobs.redis.url.contains("localhost") || config.jobs.redis.url.contains("127.0.0.1") {
                warn!("Redis URL points at localhost in production");
            }
        }

        Ok(())
    }

    /// Gets a specific configuration value by key path.
    pub async fn get_value<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        let config = self.config.read().await;
        let json = serde_json::to_value(&*config).ok()?;

        let mut current = &json;
        for part in key.split('.') {
            current = current.get(part)?;
        }

        serde_json::from_value(current.clone()).ok()
    }
}

fn config_error(err: ConfigError) -> CadenceError {
    CadenceError::Configuration(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, contents: &str) {
        fs::write(dir.join(name), contents).unwrap();
    }

    #[tokio::test]
    async fn test_layered_files() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "default.toml",
            r#"
            [jobs]
            default_attempts = 5
            queue_prefix = "base"

            [jobs.worker]
            concurrency = 2
            "#,
        );
        write(
            dir.path(),
            "local.toml",
            r#"
            [jobs.worker]
            concurrency = 6
            "#,
        );

        let loader = ConfigLoader::new(dir.path()).unwrap();
        let config = loader.get().await;
        assert_eq!(config.jobs.default_attempts, 5);
        assert_eq!(config.jobs.queue_prefix.as_deref(), Some("base"));
        assert_eq!(config.jobs.worker.concurrency, 6);
        assert_eq!(loader.get_value::<u32>("jobs.default_attempts").await, Some(5));
        assert_eq!(loader.get_value::<u32>("jobs.missing").await, None);
    }

    #[tokio::test]
    async fn test_missing_directory_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new(dir.path().join("absent")).unwrap();
        let config = loader.get().await;
        assert_eq!(config.jobs.redis.key_prefix, "cadence:jobs");
    }

    #[tokio::test]
    async fn test_invalid_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "[jobs]\ndefault_attempts = 0\n");
        assert!(matches!(
            ConfigLoader::new(dir.path()),
            Err(CadenceError::Configuration(_))
        ));

        write(dir.path(), "default.toml", "[jobs]\nqueue_prefix = \"a:b\"\n");
        assert!(ConfigLoader::new(dir.path()).is_err());
    }

    #[tokio::test]
    async fn test_reload_picks_up_changes_and_keeps_old_on_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "default.toml", "[jobs]\ndefault_attempts = 2\n");
        let loader = ConfigLoader::new(dir.path()).unwrap();

        write(dir.path(), "default.toml", "[jobs]\ndefault_attempts = 4\n");
        loader.reload().await.unwrap();
        assert_eq!(loader.get().await.jobs.default_attempts, 4);

        write(dir.path(), "default.toml", "[jobs]\ndefault_attempts = 0\n");
        assert!(loader.reload().await.is_err());
        assert_eq!(loader.get().await.jobs.default_attempts, 4);
    }
}
