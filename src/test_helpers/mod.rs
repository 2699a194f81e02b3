//! # Test Helpers
//!
//! In-memory stand-ins for the collaborators the batching core and the
//! coordinators talk to, shared by the unit tests and the integration suite
//! under `tests/`.
//!
//! - [`InMemoryDatabase`] evaluates relations and statements over rows held
//!   in memory
//! - [`RecordingSleeper`] records pauses instead of sleeping
//!
//! The queue and ledger doubles live beside their real implementations:
//! [`MemoryQueue`](crate::queue::MemoryQueue) and
//! [`MemoryJobTracker`](crate::tracking::MemoryJobTracker).
//!
//! ```rust
//! use background_migrations::batching::{BatchIterator, SubBatchOptions};
//! use background_migrations::query_builder::QueryBuilder;
//! use background_migrations::test_helpers::{InMemoryDatabase, RecordingSleeper};
//! use serde_json::json;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let db = InMemoryDatabase::new("main");
//! db.insert_rows("users", (1..=5).map(|id| json!({ "id": id })));
//! let sleeper = Arc::new(RecordingSleeper::new());
//!
//! let iterator = BatchIterator::new(Arc::new(db), sleeper.clone());
//! let options = SubBatchOptions::new(2, 1, 5).with_pause(Duration::from_secs(1));
//! let processed = iterator
//!     .each_sub_batch(QueryBuilder::new("users"), "id", &options, |sub_batch| async move {
//!         sub_batch.pluck("id").await.map(|ids| ids.len() as u64)
//!     })
//!     .await
//!     .unwrap();
//!
//! assert_eq!(processed, 3);
//! assert_eq!(sleeper.total(), Duration::from_secs(3));
//! # });
//! ```

pub mod in_memory_database;
pub mod recording_sleeper;

pub use in_memory_database::InMemoryDatabase;
pub use recording_sleeper::RecordingSleeper;
