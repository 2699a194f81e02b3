use super::entry::{JobSet, NewJob, QueueEntry};
use super::errors::QueueResult;
use async_trait::async_trait;
use std::fmt;

/// One shard of the job queue.
///
/// Every introspection and mutation a coordinator performs goes through the
/// backend of its own shard.
#[async_trait]
pub trait QueueBackend: Send + Sync + fmt::Debug {
    /// Shard name
    fn name(&self) -> &str;

    /// Push a job; returns its jid
    async fn push(&self, job: NewJob) -> QueueResult<String>;

    async fn push_bulk(&self, jobs: Vec<NewJob>) -> QueueResult<Vec<String>> {
        let mut jids = Vec::with_capacity(jobs.len());
        for job in jobs {
            jids.push(self.push(job).await?);
        }
        Ok(jids)
    }

    /// Entries of `set` belonging to `queue`, oldest first
    async fn entries(&self, set: JobSet, queue: &str) -> QueueResult<Vec<QueueEntry>>;

    /// Atomically remove an entry. `false` means another consumer already
    /// claimed it.
    async fn remove(&self, set: JobSet, jid: &str) -> QueueResult<bool>;

    /// Number of entries of `set` belonging to `queue`
    async fn size(&self, set: JobSet, queue: &str) -> QueueResult<u64>;
}
