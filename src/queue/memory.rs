//! # In-Memory Queue
//!
//! A [`QueueBackend`] holding the four job sets in process memory. Used for
//! inline execution and throughout the test suite; `retry` and `kill` move
//! entries the way a worker pool would after failed attempts.

use super::backend::QueueBackend;
use super::entry::{JobSet, NewJob, QueueEntry};
use super::errors::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct MemoryQueue {
    name: String,
    sets: Mutex<HashMap<JobSet, Vec<QueueEntry>>>,
    operations: AtomicUsize,
}

impl Default for MemoryQueue {
    fn default() -> Self {
        Self::new("default")
    }
}

impl MemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sets: Mutex::new(HashMap::new()),
            operations: AtomicUsize::new(0),
        }
    }

    /// Every entry of `set` across all queues
    pub fn all(&self, set: JobSet) -> Vec<QueueEntry> {
        self.sets.lock().get(&set).cloned().unwrap_or_default()
    }

    pub fn len(&self, set: JobSet) -> usize {
        self.sets.lock().get(&set).map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.sets.lock().values().all(Vec::is_empty)
    }

    /// Backend calls served so far
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Move a live entry into the retry set after a failed attempt
    pub fn retry(&self, jid: &str, error: &str) -> QueueResult<()> {
        self.transfer(jid, &JobSet::LIVE, JobSet::Retry, error)
    }

    /// Move an entry into the dead set after its retries are exhausted
    pub fn kill(&self, jid: &str, error: &str) -> QueueResult<()> {
        self.transfer(
            jid,
            &[JobSet::Scheduled, JobSet::Enqueued, JobSet::Retry],
            JobSet::Dead,
            error,
        )
    }

    /// Move scheduled entries that are due at `now` into the enqueued set
    pub fn promote_due(&self, now: DateTime<Utc>) -> usize {
        let mut sets = self.sets.lock();
        let scheduled = sets.remove(&JobSet::Scheduled).unwrap_or_default();
        let (due, waiting): (Vec<_>, Vec<_>) = scheduled
            .into_iter()
            .partition(|entry| entry.at.map_or(true, |at| at <= now));
        let promoted = due.len();

        sets.insert(JobSet::Scheduled, waiting);
        sets.entry(JobSet::Enqueued)
            .or_default()
            .extend(due.into_iter().map(|mut entry| {
                entry.job_set = JobSet::Enqueued;
                entry.at = None;
                entry
            }));
        promoted
    }

    fn transfer(&self, jid: &str, from: &[JobSet], to: JobSet, error: &str) -> QueueResult<()> {
        let mut sets = self.sets.lock();
        for set in from {
            let Some(entries) = sets.get_mut(set) else {
                continue;
            };
            if let Some(position) = entries.iter().position(|entry| entry.jid == jid) {
                let mut entry = entries.remove(position);
                entry.job_set = to;
                entry.error_message = Some(error.to_string());
                if to == JobSet::Retry {
                    entry.retry_count += 1;
                    entry.at = Some(Utc::now());
                }
                debug!(jid = %jid, from = %set, to = %to, "Moved queue entry");
                sets.entry(to).or_default().push(entry);
                return Ok(());
            }
        }
        Err(QueueError::job_not_found(jid))
    }

    fn touch(&self) {
        self.operations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl QueueBackend for MemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, job: NewJob) -> QueueResult<String> {
        self.touch();
        let entry = job.into_entry(Utc::now());
        let jid = entry.jid.clone();
        self.sets.lock().entry(entry.job_set).or_default().push(entry);
        Ok(jid)
    }

    async fn entries(&self, set: JobSet, queue: &str) -> QueueResult<Vec<QueueEntry>> {
        self.touch();
        let mut entries: Vec<QueueEntry> = self
            .all(set)
            .into_iter()
            .filter(|entry| entry.queue == queue)
            .collect();
        if set == JobSet::Scheduled {
            entries.sort_by_key(|entry| entry.at);
        }
        Ok(entries)
    }

    async fn remove(&self, set: JobSet, jid: &str) -> QueueResult<bool> {
        self.touch();
        let mut sets = self.sets.lock();
        let Some(entries) = sets.get_mut(&set) else {
            return Ok(false);
        };
        match entries.iter().position(|entry| entry.jid == jid) {
            Some(position) => {
                entries.remove(position);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn size(&self, set: JobSet, queue: &str) -> QueueResult<u64> {
        self.touch();
        Ok(self
            .sets
            .lock()
            .get(&set)
            .map_or(0, |entries| entries.iter().filter(|e| e.queue == queue).count()) as u64)
    }
}
