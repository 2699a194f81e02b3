//! # Job Coordination
//!
//! Binds migrations to a tracking database's worker and queue shard.
//!
//! ## Key Components
//!
//! - [`tracking_database`] - the [`TrackingDatabase`] allow-list and the
//!   [`WorkerClass`] each one dispatches through
//! - [`shard`] - [`ShardResolver`], which finds the queue backend a worker's
//!   jobs live on
//! - [`job_coordinator`] - [`JobCoordinator`]: enqueue, count, steal, perform
//! - [`factory`] - [`CoordinatorFactory::for_tracking_database`]
//!
//! ## Example Usage
//!
//! ```rust
//! use background_migrations::config::MigrationConfig;
//! use background_migrations::coordinator::{CoordinatorFactory, StaticShardResolver, TrackingDatabase};
//! use background_migrations::jobs::JobRegistry;
//! use background_migrations::queue::MemoryQueue;
//! use background_migrations::test_helpers::InMemoryDatabase;
//! use std::sync::Arc;
//!
//! let resolver = StaticShardResolver::new().with_shard(Arc::new(MemoryQueue::new("default")));
//! let factory = CoordinatorFactory::new(
//!     MigrationConfig::default(),
//!     Arc::new(resolver),
//!     Arc::new(JobRegistry::new()),
//! )
//! .with_connection(TrackingDatabase::Ci, Arc::new(InMemoryDatabase::new("ci")));
//!
//! let coordinator = factory.for_tracking_database("ci").unwrap();
//! assert_eq!(coordinator.queue(), "background_migration_ci");
//! assert!(factory.for_tracking_database("geo").is_err());
//! ```

pub mod factory;
pub mod job_coordinator;
pub mod shard;
pub mod tracking_database;

pub use factory::CoordinatorFactory;
pub use job_coordinator::{JobCoordinator, MigrationCall};
pub use shard::{ShardResolver, StaticShardResolver};
pub use tracking_database::{TrackingDatabase, WorkerClass};
