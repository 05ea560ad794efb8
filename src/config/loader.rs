//! Configuration Loader
//!
//! Environment-aware loading: a base TOML file, an optional per-environment
//! override file, then `PARTITION__SECTION__KEY` environment variables, merged
//! in that order by the `config` crate.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File};
use tracing::{debug, info};

use super::error::{ConfigResult, ConfigurationError};
use super::BatchConfig;

const BASE_FILE_NAME: &str = "partition.toml";
const ENV_PREFIX: &str = "PARTITION";

/// Loaded, validated configuration plus where it came from
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config: BatchConfig,
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

    /// Load configuration from a specific directory with an explicit environment.
    /// Useful for tests that must not touch global environment variables.
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            config_directory = %config_directory.display(),
            "Loading configuration"
        );

        let config = Self::load_and_merge_config(&config_directory, environment)?;
        config.validate()?;

        info!(
            environment = %environment,
            database_url = %config.database.sanitized_url(),
            grid_size = config.job.grid_size,
            request_queue = %config.queues.request_queue,
            "Configuration loaded successfully"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Wrap an in-process configuration, validating it first
    pub fn from_config(config: BatchConfig) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_directory: Self::default_config_directory(),
        }))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Environment name from `PARTITION_ENV`, then `APP_ENV`, default `development`
    pub fn detect_environment() -> String {
        crate::logging::get_environment()
    }

    fn default_config_directory() -> PathBuf {
        std::env::var("PARTITION_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    fn load_and_merge_config(
        config_directory: &Path,
        environment: &str,
    ) -> ConfigResult<BatchConfig> {
        let base_path = config_directory.join(BASE_FILE_NAME);
        let env_path = config_directory.join(format!("partition.{environment}.toml"));

        debug!(
            base = %base_path.display(),
            base_exists = base_path.is_file(),
            environment_override = %env_path.display(),
            environment_override_exists = env_path.is_file(),
            "Resolving configuration sources"
        );

        let merged = Config::builder()
            .add_source(File::from(base_path.as_path()).required(false))
            .add_source(File::from(env_path.as_path()).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| {
                ConfigurationError::load_error(config_directory.display().to_string(), e)
            })?;

        merged
            .try_deserialize::<BatchConfig>()
            .map_err(ConfigurationError::deserialization_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();
        assert_eq!(manager.config().job.grid_size, 4);
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("partition.toml"),
            r#"
[job]
grid_size = 8
poll_interval_ms = 2000

[source]
table = "customer"
column = "id"
"#,
        )
        .unwrap();
        fs::write(
            dir.path().join("partition.test.toml"),
            r#"
[job]
grid_size = 2
"#,
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();
        assert_eq!(manager.config().job.grid_size, 2);
        assert_eq!(manager.config().job.poll_interval_ms, 2000);
        assert_eq!(manager.config_directory(), dir.path());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("partition.toml"),
            r#"
[job]
grid_size = 0
"#,
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("partition.toml"), "[job\ngrid_size = ").unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
    }

    #[test]
    fn test_from_config_validates() {
        let mut config = BatchConfig::default();
        config.worker.concurrency = 0;
        assert!(ConfigManager::from_config(config).is_err());
        assert!(ConfigManager::from_config(BatchConfig::default()).is_ok());
    }
}
