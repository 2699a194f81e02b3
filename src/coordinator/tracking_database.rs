use crate::config::TrackingDatabaseConfig;
use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Allow-listed databases a coordinator can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingDatabase {
    Main,
    Ci,
}

impl TrackingDatabase {
    pub const ALL: [TrackingDatabase; 2] = [TrackingDatabase::Main, TrackingDatabase::Ci];

    pub fn as_str(&self) -> &'static str {
        match self {
            TrackingDatabase::Main => "main",
            TrackingDatabase::Ci => "ci",
        }
    }

    /// Comma-separated allow-list, for error messages
    pub fn allowed_names() -> String {
        Self::ALL
            .iter()
            .map(TrackingDatabase::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TrackingDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackingDatabase {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|database| database.as_str() == s)
            .ok_or_else(|| MigrationError::UnknownTrackingDatabase {
                name: s.to_string(),
                allowed: Self::allowed_names(),
            })
    }
}

/// The worker a coordinator dispatches through, and where its queue lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerClass {
    pub name: String,
    pub queue: String,
    pub queue_shard: String,
}

impl WorkerClass {
    pub fn new(
        name: impl Into<String>,
        queue: impl Into<String>,
        queue_shard: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            queue: queue.into(),
            queue_shard: queue_shard.into(),
        }
    }
}

impl From<&TrackingDatabaseConfig> for WorkerClass {
    fn from(config: &TrackingDatabaseConfig) -> Self {
        Self::new(&config.worker_class, &config.queue, &config.queue_shard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_allow_list() {
        assert_eq!("main".parse::<TrackingDatabase>().unwrap(), TrackingDatabase::Main);
        assert_eq!("ci".parse::<TrackingDatabase>().unwrap(), TrackingDatabase::Ci);

        let err = "geo".parse::<TrackingDatabase>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Unknown tracking database: geo (must be one of [main, ci])"
        );
    }
}
