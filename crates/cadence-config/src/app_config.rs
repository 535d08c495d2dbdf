//! Application configuration structures.

use cadence_core::TelemetryConfig;
use cadence_jobs::JobsConfig;
use serde::{Deserialize, Serialize};

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Application name and metadata.
    #[serde(default)]
    pub app: AppMetadata,

    /// Logging configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Job engine configuration.
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Application metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
    /// Application version.
    pub version: String,
    /// Environment (development, staging, production).
    pub environment: String,
}

impl Default for AppMetadata {
    fn default() -> Self {
        Self {
            name: "cadence".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
        }
    }
}

impl AppMetadata {
    #[must_use]
    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [jobs]
            queue_prefix = "tenant-a"

            [jobs.worker]
            concurrency = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.app.name, "cadence");
        assert_eq!(config.jobs.queue_prefix.as_deref(), Some("tenant-a"));
        assert_eq!(config.jobs.worker.concurrency, 8);
        assert_eq!(config.jobs.default_attempts, 3);
        assert_eq!(config.telemetry.service_name, "cadence-worker");
    }
}
