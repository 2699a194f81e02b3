//! # Batching Core
//!
//! Range iteration, sub-batch sizing, pauses and per-operation
//! instrumentation.
//!
//! ## Key Components
//!
//! - [`iterator`] - [`BatchIterator`] and the restartable [`SubBatchCursor`]
//!   that cut `[start_id, end_id]` into bounded [`SubBatch`]es
//! - [`metrics`] - [`BatchMetrics`], the per-job record of affected rows
//! - [`sleeper`] - the injectable pause between sub-batches
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use background_migrations::batching::{BatchIterator, SubBatchOptions, TokioSleeper};
//! use background_migrations::database::Connection;
//! use background_migrations::query_builder::{Assignment, QueryBuilder};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example(db: Arc<dyn Connection>) -> background_migrations::MigrationResult<()> {
//! let iterator = BatchIterator::new(db, Arc::new(TokioSleeper));
//! let options = SubBatchOptions::new(100, 1, 10_000).with_pause(Duration::from_millis(100));
//!
//! iterator
//!     .each_sub_batch(QueryBuilder::new("issues"), "id", &options, |sub_batch| async move {
//!         sub_batch
//!             .update_all(vec![Assignment::literal("confidential", json!(false))])
//!             .await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod iterator;
pub mod metrics;
pub mod sleeper;

pub use iterator::{BatchIterator, RelationFilter, SubBatch, SubBatchCursor, SubBatchOptions};
pub use metrics::{AffectedRows, BatchMetrics, OperationName};
pub use sleeper::{pause_duration, Sleeper, TokioSleeper};
