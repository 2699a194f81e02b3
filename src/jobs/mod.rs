//! # Migration Jobs
//!
//! The per-migration unit of work and the registry that resolves queued
//! class names to runnable jobs.
//!
//! ## Key Components
//!
//! - [`spec`] - [`JobSpec`], the declarative definition of a migration
//! - [`arguments`] - [`BatchingDescriptor`] (the queued unit) and named
//!   [`JobArguments`]
//! - [`batched_job`] - [`BatchedMigrationJob`], the [`MigrationJob`] trait
//!   and the closure-driven [`TransformMigration`]
//! - [`registry`] - [`JobRegistry`], name → factory
//!
//! ## Example Usage
//!
//! ```rust
//! use background_migrations::batching::OperationName;
//! use background_migrations::jobs::{transform, JobRegistry, JobSpec};
//! use background_migrations::query_builder::Assignment;
//! use serde_json::json;
//!
//! let registry = JobRegistry::new();
//! let spec = JobSpec::builder("ResetIssueWeights")
//!     .job_arguments(["weight"])
//!     .operation_name(OperationName::UpdateAll)
//!     .scope_to(|relation| relation.where_not_null("weight"))
//!     .build()
//!     .unwrap();
//!
//! registry
//!     .register_transform(
//!         spec,
//!         transform(|sub_batch, arguments| async move {
//!             let weight = arguments.get_i64("weight")?;
//!             sub_batch
//!                 .update_all(vec![Assignment::literal("weight", json!(weight))])
//!                 .await
//!         }),
//!     )
//!     .unwrap();
//!
//! assert!(registry.contains("ResetIssueWeights"));
//! ```

pub mod arguments;
pub mod batched_job;
pub mod registry;
pub mod spec;

pub use crate::batching::OperationName;
pub use arguments::{BatchingDescriptor, JobArguments, BATCHING_FIELD_COUNT};
pub use batched_job::{
    transform, BatchedMigrationJob, BatchingArguments, MigrationJob, Transform,
    TransformMigration,
};
pub use registry::{JobFactory, JobRegistry, RegistryStats};
pub use spec::{FeatureCategory, JobSpec, JobSpecBuilder};
