//! # Background Migration Configuration
//!
//! Typed configuration for the batching core and the job coordinators.
//! Every section has working defaults so an empty (or missing) YAML file
//! yields a usable configuration; the loader layers environment overrides
//! on top.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use background_migrations::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load()?;
//! let sub_batch_size = manager.config().batching.default_sub_batch_size;
//! let main = manager.config().tracking_database("main")?;
//! println!("{} jobs go to {}", main.worker_class, main.queue);
//! # let _ = sub_batch_size;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use crate::coordinator::TrackingDatabase;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Root configuration structure mirroring background_migrations.yaml
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Database connection settings
    pub database: DatabaseConfig,

    /// Batch and sub-batch sizing defaults
    pub batching: BatchingConfig,

    /// Worker/queue binding per tracking database
    pub tracking_databases: TrackingDatabasesConfig,

    /// Structured logging output
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    /// Applied per connection; sub-batches that exceed it surface as `StatementTimeout`
    pub statement_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
            statement_timeout_ms: 15_000,
        }
    }
}

impl DatabaseConfig {
    /// Resolve the database URL, preferring `DATABASE_URL` when the file leaves it unset
    pub fn database_url(&self) -> Option<String> {
        self.url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Rows per scheduled job when splitting a table into ranges
    pub default_batch_size: u64,
    /// Rows per inner transaction
    pub default_sub_batch_size: u64,
    pub default_pause_ms: u64,
    /// Lower bound for the spacing between scheduled jobs
    pub minimum_job_interval_seconds: u64,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            default_batch_size: 10_000,
            default_sub_batch_size: 100,
            default_pause_ms: 100,
            minimum_job_interval_seconds: 120,
        }
    }
}

impl BatchingConfig {
    pub fn minimum_job_interval(&self) -> Duration {
        Duration::from_secs(self.minimum_job_interval_seconds)
    }
}

/// Worker class and queue bound to one tracking database
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackingDatabaseConfig {
    pub worker_class: String,
    pub queue: String,
    /// Name of the queue-broker shard holding `queue`
    #[serde(default = "default_queue_shard")]
    pub queue_shard: String,
}

fn default_queue_shard() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TrackingDatabasesConfig(pub HashMap<String, TrackingDatabaseConfig>);

impl Default for TrackingDatabasesConfig {
    fn default() -> Self {
        let mut databases = HashMap::new();
        databases.insert(
            TrackingDatabase::Main.as_str().to_string(),
            TrackingDatabaseConfig {
                worker_class: "BackgroundMigrationWorker".to_string(),
                queue: "background_migration".to_string(),
                queue_shard: default_queue_shard(),
            },
        );
        databases.insert(
            TrackingDatabase::Ci.as_str().to_string(),
            TrackingDatabaseConfig {
                worker_class: "BackgroundMigration::CiDatabaseWorker".to_string(),
                queue: "background_migration_ci".to_string(),
                queue_shard: default_queue_shard(),
            },
        );
        Self(databases)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub directory: String,
    pub json_file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: "log".to_string(),
            json_file: true,
        }
    }
}

impl MigrationConfig {
    /// Worker binding for an allow-listed tracking database
    pub fn tracking_database(&self, name: &str) -> ConfigResult<&TrackingDatabaseConfig> {
        self.tracking_databases
            .0
            .get(name)
            .ok_or_else(|| ConfigurationError::missing_field(format!("tracking_databases.{name}")))
    }

    /// Validate the loaded configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.batching.default_sub_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batching.default_sub_batch_size",
                "0",
                "must be a positive integer",
            ));
        }

        if self.batching.default_batch_size == 0 {
            return Err(ConfigurationError::invalid_value(
                "batching.default_batch_size",
                "0",
                "must be a positive integer",
            ));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "must be a positive integer",
            ));
        }

        for name in self.tracking_databases.0.keys() {
            if name.parse::<TrackingDatabase>().is_err() {
                return Err(ConfigurationError::invalid_value(
                    "tracking_databases",
                    name.clone(),
                    format!("must be one of [{}]", TrackingDatabase::allowed_names()),
                ));
            }
        }

        for database in TrackingDatabase::ALL {
            let binding = self.tracking_database(database.as_str())?;
            if binding.queue.is_empty() || binding.worker_class.is_empty() {
                return Err(ConfigurationError::invalid_value(
                    format!("tracking_databases.{}", database.as_str()),
                    format!("{binding:?}"),
                    "worker_class and queue must not be empty",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = MigrationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batching.default_sub_batch_size, 100);
        assert_eq!(
            config.batching.minimum_job_interval(),
            Duration::from_secs(120)
        );

        let ci = config.tracking_database("ci").unwrap();
        assert_eq!(ci.queue, "background_migration_ci");
        assert_eq!(ci.queue_shard, "default");
    }

    #[test]
    fn test_zero_sub_batch_size_rejected() {
        let mut config = MigrationConfig::default();
        config.batching.default_sub_batch_size = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_unknown_tracking_database_rejected() {
        let mut config = MigrationConfig::default();
        config.tracking_databases.0.insert(
            "geo".to_string(),
            TrackingDatabaseConfig {
                worker_class: "GeoWorker".to_string(),
                queue: "geo".to_string(),
                queue_shard: "default".to_string(),
            },
        );
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must be one of [main, ci]"));
    }

    #[test]
    fn test_missing_allow_listed_database_rejected() {
        let mut config = MigrationConfig::default();
        config.tracking_databases.0.remove("ci");
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::MissingField { .. })
        ));
    }
}
