use super::job_coordinator::JobCoordinator;
use super::shard::ShardResolver;
use super::tracking_database::{TrackingDatabase, WorkerClass};
use crate::config::MigrationConfig;
use crate::database::{Connection, SharedConnection};
use crate::error::{MigrationError, MigrationResult};
use crate::jobs::JobRegistry;
use crate::tracking::JobTracker;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds (and caches) one coordinator per tracking database
pub struct CoordinatorFactory {
    config: MigrationConfig,
    resolver: Arc<dyn ShardResolver>,
    registry: Arc<JobRegistry>,
    connections: HashMap<TrackingDatabase, Arc<dyn Connection>>,
    shared_connection: SharedConnection,
    tracker: Option<Arc<dyn JobTracker>>,
    coordinators: DashMap<TrackingDatabase, Arc<JobCoordinator>>,
}

impl CoordinatorFactory {
    pub fn new(
        config: MigrationConfig,
        resolver: Arc<dyn ShardResolver>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            config,
            resolver,
            registry,
            connections: HashMap::new(),
            shared_connection: SharedConnection::new(),
            tracker: None,
            coordinators: DashMap::new(),
        }
    }

    /// Connection jobs for `database` run against
    pub fn with_connection(
        mut self,
        database: TrackingDatabase,
        connection: Arc<dyn Connection>,
    ) -> Self {
        self.connections.insert(database, connection);
        self
    }

    /// Ledger every coordinator marks performed jobs in
    pub fn with_tracker(mut self, tracker: Arc<dyn JobTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Slot every coordinator publishes its connection into while performing
    pub fn shared_connection(&self) -> &SharedConnection {
        &self.shared_connection
    }

    /// Coordinator for the allow-listed tracking database `name`
    pub fn for_tracking_database(&self, name: &str) -> MigrationResult<Arc<JobCoordinator>> {
        let database: TrackingDatabase = name.parse()?;

        if let Some(coordinator) = self.coordinators.get(&database) {
            return Ok(coordinator.clone());
        }

        let binding = self.config.tracking_database(database.as_str())?;
        let connection = self.connections.get(&database).cloned().ok_or_else(|| {
            MigrationError::configuration(
                "CoordinatorFactory",
                format!("no connection configured for tracking database {database}"),
            )
        })?;

        let mut coordinator = JobCoordinator::new(
            WorkerClass::from(binding),
            self.resolver.clone(),
            self.registry.clone(),
            connection,
        )
        .with_shared_connection_slot(self.shared_connection.clone());
        if let Some(tracker) = &self.tracker {
            coordinator = coordinator.with_tracker(tracker.clone());
        }
        let coordinator = Arc::new(coordinator);

        info!(
            tracking_database = %database,
            worker = %binding.worker_class,
            queue = %binding.queue,
            "Created job coordinator"
        );

        Ok(self
            .coordinators
            .entry(database)
            .or_insert(coordinator)
            .clone())
    }

    /// Coordinator for the main database
    pub fn main(&self) -> MigrationResult<Arc<JobCoordinator>> {
        self.for_tracking_database(TrackingDatabase::Main.as_str())
    }
}
