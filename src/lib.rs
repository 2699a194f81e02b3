#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Background Migrations
//!
//! Batched background-migration runner for live PostgreSQL tables.
//!
//! ## Overview
//!
//! A data migration on a large table is split into ranges of the batch
//! column, one queued job per range. Each job walks its range in small
//! sub-batches with a keyset cursor, runs one bounded statement per
//! sub-batch, records affected rows and timings per operation, and pauses
//! between sub-batches so replicas and vacuum keep up.
//!
//! Jobs are enqueued through a per-shard [`coordinator::JobCoordinator`],
//! which can also count what is left and "steal" queued jobs to run them
//! inline when a deploy must finish a migration before moving on.
//!
//! ## Module Organization
//!
//! - [`batching`] - keyset sub-batch iteration, pauses and per-operation metrics
//! - [`jobs`] - job specs, queue argument decoding, the batched job base and the registry
//! - [`coordinator`] - tracking databases, shard resolution and the job coordinator
//! - [`queue`] - the queue backend abstraction with in-memory and PostgreSQL backends
//! - [`tracking`] - the ledger of scheduled ranges
//! - [`helpers`] - range scheduling, requeue and finalize operations
//! - [`query_builder`] - relations and mutating statements
//! - [`database`] - the connection abstraction jobs run against
//! - [`config`] - YAML configuration with environment overlays
//! - [`error`] - structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use background_migrations::batching::OperationName;
//! use background_migrations::config::ConfigManager;
//! use background_migrations::coordinator::{CoordinatorFactory, StaticShardResolver, TrackingDatabase};
//! use background_migrations::database::PostgresConnection;
//! use background_migrations::jobs::{transform, JobRegistry, JobSpec};
//! use background_migrations::query_builder::Assignment;
//! use background_migrations::queue::PgQueue;
//! use std::sync::Arc;
//!
//! # async fn example() -> background_migrations::MigrationResult<()> {
//! let manager = ConfigManager::load()?;
//! let config = manager.config().clone();
//! let connection = PostgresConnection::connect("main", &config.database).await?;
//!
//! let registry = JobRegistry::new();
//! registry.register_transform(
//!     JobSpec::builder("BackfillProjectFlags")
//!         .operation_name(OperationName::UpdateAll)
//!         .build()?,
//!     transform(|sub_batch, _arguments| async move {
//!         sub_batch.update_all(vec![Assignment::literal("flag", true.into())]).await
//!     }),
//! )?;
//!
//! let queue = PgQueue::new("default", connection.pool().clone());
//! let factory = CoordinatorFactory::new(
//!     config,
//!     Arc::new(StaticShardResolver::new().with_shard(Arc::new(queue))),
//!     Arc::new(registry),
//! )
//! .with_connection(TrackingDatabase::Main, Arc::new(connection));
//!
//! let coordinator = factory.main()?;
//! println!("{} jobs remaining", coordinator.remaining().await?);
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! The [`test_helpers`] module provides an in-memory database and a sleeper
//! that records pauses instead of waiting, so the suite runs without
//! PostgreSQL:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests
//! ```

pub mod batching;
pub mod config;
pub mod coordinator;
pub mod database;
pub mod error;
pub mod helpers;
pub mod jobs;
pub mod logging;
pub mod query_builder;
pub mod queue;
pub mod test_helpers;
pub mod tracking;

pub use batching::{BatchIterator, BatchMetrics, OperationName, SubBatch, SubBatchOptions};
pub use config::{ConfigManager, MigrationConfig};
pub use coordinator::{CoordinatorFactory, JobCoordinator, TrackingDatabase};
pub use error::{MigrationError, MigrationResult};
pub use helpers::MigrationHelpers;
pub use jobs::{BatchedMigrationJob, JobRegistry, JobSpec, MigrationJob};
