//! Configuration Loader
//!
//! Environment-aware configuration loading. Handles file discovery,
//! environment detection, and layering of environment variable overrides.

use super::error::{ConfigResult, ConfigurationError};
use super::MigrationConfig;
use config::{Config, Environment, File, FileFormat};
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const CONFIG_FILE_STEM: &str = "background_migrations";
const ENV_PREFIX: &str = "BACKGROUND_MIGRATIONS";

/// Loaded configuration together with where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: MigrationConfig,
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
    /// This is useful for testing without modifying global environment variables
    pub fn load_from_directory_with_env(
        config_dir: Option<PathBuf>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.unwrap_or_else(Self::default_config_directory);

        debug!(
            environment = %environment,
            directory = %config_directory.display(),
            "Loading background migration configuration"
        );

        let config = Self::build_config(&config_directory, environment)?;
        config.validate()?;

        crate::logging::log_migration_operation(
            "load_configuration",
            None,
            Some(environment),
            "loaded",
            Some(&format!(
                "sub_batch_size={} pause_ms={}",
                config.batching.default_sub_batch_size, config.batching.default_pause_ms
            )),
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    /// Build a manager around an already constructed configuration
    pub fn from_config(config: MigrationConfig, environment: &str) -> ConfigResult<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: environment.to_string(),
            config_directory: Self::default_config_directory(),
        }))
    }

    /// Get the loaded configuration
    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    /// Detect the current environment
    pub fn detect_environment() -> String {
        env::var("BACKGROUND_MIGRATIONS_ENV")
            .or_else(|_| env::var("RAILS_ENV"))
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
    }

    fn default_config_directory() -> PathBuf {
        env::var("BACKGROUND_MIGRATIONS_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }

    /// Layer base file, environment overlay and environment variables
    fn build_config(config_directory: &Path, environment: &str) -> ConfigResult<MigrationConfig> {
        let base_path = config_directory.join(format!("{CONFIG_FILE_STEM}.yaml"));
        let overlay_path = config_directory
            .join("environments")
            .join(format!("{environment}.yaml"));

        let settings = Config::builder()
            .add_source(Self::yaml_source(&base_path))
            .add_source(Self::yaml_source(&overlay_path))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigurationError::load_error(base_path.display().to_string(), e.to_string()))?;

        settings.try_deserialize::<MigrationConfig>().map_err(|e| {
            ConfigurationError::load_error(base_path.display().to_string(), e.to_string())
        })
    }

    fn yaml_source(path: &Path) -> File<config::FileSourceFile, FileFormat> {
        File::from(path.to_path_buf())
            .format(FileFormat::Yaml)
            .required(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_missing_directory_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().join("absent")), "test")
                .unwrap();

        assert_eq!(manager.environment(), "test");
        assert_eq!(manager.config().batching.default_batch_size, 10_000);
    }

    #[test]
    fn test_environment_overlay_wins_over_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("background_migrations.yaml"),
            "batching:\n  default_sub_batch_size: 250\n  default_pause_ms: 50\n",
        )
        .unwrap();
        fs::create_dir_all(dir.path().join("environments")).unwrap();
        fs::write(
            dir.path().join("environments").join("test.yaml"),
            "batching:\n  default_pause_ms: 0\n",
        )
        .unwrap();

        let manager =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test")
                .unwrap();

        assert_eq!(manager.config().batching.default_sub_batch_size, 250);
        assert_eq!(manager.config().batching.default_pause_ms, 0);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("background_migrations.yaml"),
            "batching:\n  default_sub_batch_size: 0\n",
        )
        .unwrap();

        let result =
            ConfigManager::load_from_directory_with_env(Some(dir.path().to_path_buf()), "test");
        assert!(matches!(result, Err(ConfigurationError::InvalidValue { .. })));
    }
}
