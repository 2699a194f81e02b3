//! # Job Queue
//!
//! The queue abstraction the coordinators consume: push, list the four job
//! sets, atomically remove, and count.
//!
//! ## Key Components
//!
//! - [`backend`] - the [`QueueBackend`] trait, one instance per shard
//! - [`entry`] - [`QueueEntry`], [`NewJob`] and the [`JobSet`]s
//! - [`memory`] - [`MemoryQueue`] for inline execution and tests
//! - [`postgres`] - [`PgQueue`], a table-backed queue over sqlx
//! - [`errors`] - [`QueueError`]

pub mod backend;
pub mod entry;
pub mod errors;
pub mod memory;
pub mod postgres;

pub use backend::QueueBackend;
pub use entry::{new_jid, JobSet, NewJob, QueueEntry};
pub use errors::{QueueError, QueueResult};
pub use memory::MemoryQueue;
pub use postgres::PgQueue;
