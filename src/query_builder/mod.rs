//! # Query Builder System
//!
//! The relation abstraction the batching core works against.
//!
//! ## Overview
//!
//! A [`QueryBuilder`] describes a set of rows in one table: range filters
//! over the batch column, additional predicates ANDed on top, ordering,
//! `LIMIT`/`OFFSET` windows and `DISTINCT ON` deduplication. A
//! [`Statement`] wraps a relation into the single mutating verb a sub-batch
//! performs.
//!
//! ## Key Components
//!
//! - [`builder`] - Relation builder with SQL generation
//! - [`conditions`] - WHERE clause building
//! - [`pagination`] - LIMIT/OFFSET windows
//! - [`statement`] - UPDATE/DELETE statements over a relation
//!
//! ## Example Usage
//!
//! ```rust
//! use background_migrations::query_builder::{Assignment, QueryBuilder, Statement};
//! use serde_json::json;
//!
//! let sub_batch = QueryBuilder::new("merge_requests")
//!     .where_between("id", 1, 1_000)
//!     .where_not_null("target_project_id");
//!
//! let update = Statement::update(
//!     sub_batch,
//!     "id",
//!     vec![Assignment::literal("backfilled", json!(true))],
//! );
//! assert!(update.to_sql().starts_with("UPDATE merge_requests SET backfilled = true"));
//! ```

pub mod builder;
pub mod conditions;
pub mod pagination;
pub mod statement;

pub use builder::{Direction, OrderBy, QueryBuilder};
pub use conditions::{Condition, LogicalOperator, WhereClause};
pub use pagination::Pagination;
pub use statement::{Assignment, AssignmentValue, Statement};
