//! # Job Tracking Ledger
//!
//! A persistent record of which migration ranges were scheduled and which
//! have completed, so a later deploy can requeue or finish the stragglers.
//!
//! - [`JobTracker`] - the ledger interface
//! - [`MemoryJobTracker`] - in-process ledger for inline runs and tests
//! - [`PgJobTracker`] - `background_migration_jobs` table over sqlx

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobTracker;
pub use postgres::PgJobTracker;

use crate::error::{MigrationError, MigrationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Succeeded,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Succeeded => "succeeded",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "succeeded" => Ok(JobStatus::Succeeded),
            other => Err(MigrationError::configuration(
                "JobStatus",
                format!("unknown job status `{other}`"),
            )),
        }
    }
}

/// One scheduled range of one migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedJob {
    pub id: i64,
    pub class_name: String,
    /// Full positional queue arguments the job was scheduled with
    pub arguments: Vec<Value>,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait JobTracker: Send + Sync + fmt::Debug {
    /// Record a newly scheduled job as pending
    async fn track(&self, class_name: &str, arguments: Vec<Value>) -> MigrationResult<TrackedJob>;

    /// Pending jobs of `class_name` with `id > after_id`, ascending, at most `limit`
    async fn pending(
        &self,
        class_name: &str,
        after_id: i64,
        limit: u64,
    ) -> MigrationResult<Vec<TrackedJob>>;

    /// Mark every pending job with exactly these arguments as succeeded
    async fn mark_all_as_succeeded(
        &self,
        class_name: &str,
        arguments: &[Value],
    ) -> MigrationResult<u64>;

    /// Delete the jobs of `class_name` in any of `statuses`
    async fn delete(&self, class_name: &str, statuses: &[JobStatus]) -> MigrationResult<u64>;

    async fn count(&self, class_name: &str, status: JobStatus) -> MigrationResult<u64>;
}
