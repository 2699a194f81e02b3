use super::{JobStatus, JobTracker, TrackedJob};
use crate::error::MigrationResult;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Debug, Default)]
struct Ledger {
    next_id: i64,
    jobs: Vec<TrackedJob>,
}

#[derive(Debug, Default)]
pub struct MemoryJobTracker {
    ledger: Mutex<Ledger>,
}

impl MemoryJobTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every tracked job, in insertion order
    pub fn jobs(&self) -> Vec<TrackedJob> {
        self.ledger.lock().jobs.clone()
    }
}

#[async_trait]
impl JobTracker for MemoryJobTracker {
    async fn track(&self, class_name: &str, arguments: Vec<Value>) -> MigrationResult<TrackedJob> {
        let mut ledger = self.ledger.lock();
        ledger.next_id += 1;
        let now = Utc::now();
        let job = TrackedJob {
            id: ledger.next_id,
            class_name: class_name.to_string(),
            arguments,
            status: JobStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        ledger.jobs.push(job.clone());
        Ok(job)
    }

    async fn pending(
        &self,
        class_name: &str,
        after_id: i64,
        limit: u64,
    ) -> MigrationResult<Vec<TrackedJob>> {
        Ok(self
            .ledger
            .lock()
            .jobs
            .iter()
            .filter(|job| {
                job.class_name == class_name && job.status == JobStatus::Pending && job.id > after_id
            })
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn mark_all_as_succeeded(
        &self,
        class_name: &str,
        arguments: &[Value],
    ) -> MigrationResult<u64> {
        let now = Utc::now();
        let mut updated = 0;
        for job in self.ledger.lock().jobs.iter_mut() {
            if job.class_name == class_name
                && job.status == JobStatus::Pending
                && job.arguments == arguments
            {
                job.status = JobStatus::Succeeded;
                job.updated_at = now;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, class_name: &str, statuses: &[JobStatus]) -> MigrationResult<u64> {
        let mut ledger = self.ledger.lock();
        let before = ledger.jobs.len();
        ledger
            .jobs
            .retain(|job| !(job.class_name == class_name && statuses.contains(&job.status)));
        Ok((before - ledger.jobs.len()) as u64)
    }

    async fn count(&self, class_name: &str, status: JobStatus) -> MigrationResult<u64> {
        Ok(self
            .ledger
            .lock()
            .jobs
            .iter()
            .filter(|job| job.class_name == class_name && job.status == status)
            .count() as u64)
    }
}
