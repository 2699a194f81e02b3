use crate::error::{MigrationError, MigrationResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::time::Instant;

/// The single database verb a migration performs, used to label metrics
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationName {
    Update,
    UpdateAll,
    Insert,
    Delete,
    DeleteAll,
    Upsert,
    Other(String),
}

impl OperationName {
    pub fn as_str(&self) -> &str {
        match self {
            OperationName::Update => "update",
            OperationName::UpdateAll => "update_all",
            OperationName::Insert => "insert",
            OperationName::Delete => "delete",
            OperationName::DeleteAll => "delete_all",
            OperationName::Upsert => "upsert",
            OperationName::Other(name) => name,
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for OperationName {
    fn from(name: &str) -> Self {
        match name {
            "update" => OperationName::Update,
            "update_all" => OperationName::UpdateAll,
            "insert" => OperationName::Insert,
            "delete" => OperationName::Delete,
            "delete_all" => OperationName::DeleteAll,
            "upsert" => OperationName::Upsert,
            other => OperationName::Other(other.to_string()),
        }
    }
}

/// Values a sub-batch block may return that coerce to an affected-row count
pub trait AffectedRows {
    fn affected_rows(&self) -> MigrationResult<u64>;
}

impl AffectedRows for u64 {
    fn affected_rows(&self) -> MigrationResult<u64> {
        Ok(*self)
    }
}

impl AffectedRows for u32 {
    fn affected_rows(&self) -> MigrationResult<u64> {
        Ok(u64::from(*self))
    }
}

impl AffectedRows for usize {
    fn affected_rows(&self) -> MigrationResult<u64> {
        Ok(*self as u64)
    }
}

impl AffectedRows for i64 {
    fn affected_rows(&self) -> MigrationResult<u64> {
        u64::try_from(*self).map_err(|_| {
            MigrationError::configuration(
                "BatchMetrics",
                format!("affected row count must not be negative, got {self}"),
            )
        })
    }
}

impl AffectedRows for i32 {
    fn affected_rows(&self) -> MigrationResult<u64> {
        i64::from(*self).affected_rows()
    }
}

impl AffectedRows for sqlx::postgres::PgQueryResult {
    fn affected_rows(&self) -> MigrationResult<u64> {
        Ok(self.rows_affected())
    }
}

#[derive(Debug, Default)]
struct MetricsState {
    timings: HashMap<OperationName, Vec<f64>>,
    affected_rows: HashMap<OperationName, Vec<u64>>,
}

/// Per-job record of how long each instrumented operation took and how many
/// rows it touched, keyed by operation name in execution order.
#[derive(Debug, Default)]
pub struct BatchMetrics {
    state: Mutex<MetricsState>,
}

impl BatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Await `operation`, record its duration and affected rows under `name`,
    /// and hand back its result untouched. Errors propagate without being
    /// recorded.
    pub async fn instrument<Fut, R>(&self, name: &OperationName, operation: Fut) -> MigrationResult<R>
    where
        Fut: Future<Output = MigrationResult<R>>,
        R: AffectedRows,
    {
        let started = Instant::now();
        let result = operation.await?;
        let elapsed = started.elapsed().as_secs_f64();
        let count = result.affected_rows()?;

        let mut state = self.state.lock();
        state.timings.entry(name.clone()).or_default().push(elapsed);
        state
            .affected_rows
            .entry(name.clone())
            .or_default()
            .push(count);

        Ok(result)
    }

    /// Snapshot of affected-row counts per operation
    pub fn affected_rows(&self) -> HashMap<OperationName, Vec<u64>> {
        self.state.lock().affected_rows.clone()
    }

    /// Snapshot of durations (seconds) per operation
    pub fn timings(&self) -> HashMap<OperationName, Vec<f64>> {
        self.state.lock().timings.clone()
    }

    /// Total rows touched by one operation
    pub fn total_affected(&self, name: &OperationName) -> u64 {
        self.state
            .lock()
            .affected_rows
            .get(name)
            .map(|counts| counts.iter().sum())
            .unwrap_or(0)
    }
}
