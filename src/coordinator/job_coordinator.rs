//! # Job Coordinator
//!
//! Per-shard façade over the job queue: enqueue migrations, count what is
//! left, and drain matching jobs inline ("steal") when a caller needs the
//! work finished now.
//!
//! Every queue call goes through the backend of this coordinator's own
//! shard, resolved once and cached.

use super::shard::ShardResolver;
use super::tracking_database::WorkerClass;
use crate::database::{Connection, SharedConnection};
use crate::error::{MigrationError, MigrationResult};
use crate::jobs::JobRegistry;
use crate::logging::{log_error, log_queue_operation};
use crate::queue::{JobSet, NewJob, QueueBackend, QueueEntry};
use crate::tracking::JobTracker;
use chrono::Utc;
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A migration class name with its positional queue arguments
pub type MigrationCall = (String, Vec<Value>);

pub struct JobCoordinator {
    worker: WorkerClass,
    resolver: Arc<dyn ShardResolver>,
    backend: OnceLock<Arc<dyn QueueBackend>>,
    registry: Arc<JobRegistry>,
    connection: Arc<dyn Connection>,
    shared_connection: SharedConnection,
    tracker: Option<Arc<dyn JobTracker>>,
}

impl std::fmt::Debug for JobCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobCoordinator")
            .field("worker", &self.worker)
            .field("database", &self.connection.database_name())
            .field("resolved", &self.backend.get().is_some())
            .finish()
    }
}

impl JobCoordinator {
    pub fn new(
        worker: WorkerClass,
        resolver: Arc<dyn ShardResolver>,
        registry: Arc<JobRegistry>,
        connection: Arc<dyn Connection>,
    ) -> Self {
        Self {
            worker,
            resolver,
            backend: OnceLock::new(),
            registry,
            connection,
            shared_connection: SharedConnection::new(),
            tracker: None,
        }
    }

    /// Mark tracked jobs as succeeded once they perform cleanly
    pub fn with_tracker(mut self, tracker: Arc<dyn JobTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Publish the active connection into `slot` instead of a private one
    pub fn with_shared_connection_slot(mut self, slot: SharedConnection) -> Self {
        self.shared_connection = slot;
        self
    }

    /// Name of the queue this coordinator's worker is bound to
    pub fn queue(&self) -> &str {
        &self.worker.queue
    }

    pub fn worker_class(&self) -> &WorkerClass {
        &self.worker
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn shared_connection(&self) -> &SharedConnection {
        &self.shared_connection
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> Option<&Arc<dyn JobTracker>> {
        self.tracker.as_ref()
    }

    /// This shard's queue backend, resolved on first use
    pub fn backend(&self) -> MigrationResult<Arc<dyn QueueBackend>> {
        if let Some(backend) = self.backend.get() {
            return Ok(backend.clone());
        }

        let resolved = self.resolver.resolve(&self.worker)?;
        debug!(
            worker = %self.worker.name,
            shard = resolved.name(),
            "Resolved queue shard"
        );
        Ok(self.backend.get_or_init(|| resolved).clone())
    }

    /// Run `f` with this coordinator's connection installed as the shared
    /// current connection; the previous one is restored however `f` exits.
    pub async fn with_shared_connection<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.shared_connection.scope(self.connection.clone());
        f(self.connection.clone()).await
    }

    /// Lazily list this worker's entries: scheduled and enqueued, then retry
    /// and dead when `include_dead_jobs` is set
    pub fn pending_jobs(
        &self,
        include_dead_jobs: bool,
    ) -> impl Stream<Item = MigrationResult<QueueEntry>> + '_ {
        let sets: &'static [JobSet] = if include_dead_jobs {
            &JobSet::ALL
        } else {
            &JobSet::LIVE
        };

        stream::iter(sets.iter().copied())
            .then(move |set| self.worker_entries(set))
            .map_ok(|entries| stream::iter(entries.into_iter().map(Ok::<_, MigrationError>)))
            .try_flatten()
    }

    /// Remove and run every queued `class_name` job inline
    pub async fn steal(&self, class_name: &str, retry_dead_jobs: bool) -> MigrationResult<usize> {
        self.steal_matching(class_name, retry_dead_jobs, |_| true)
            .await
    }

    /// Remove and run queued `class_name` jobs whose arguments satisfy
    /// `predicate`, scheduled entries first.
    ///
    /// An entry someone else removed first is skipped. A job that fails is
    /// pushed back onto the queue once and its error returned.
    pub async fn steal_matching<P>(
        &self,
        class_name: &str,
        retry_dead_jobs: bool,
        predicate: P,
    ) -> MigrationResult<usize>
    where
        P: Fn(&[Value]) -> bool + Send + Sync,
    {
        let backend = self.backend()?;
        let sets: &[JobSet] = if retry_dead_jobs {
            &JobSet::ALL
        } else {
            &JobSet::LIVE
        };
        let mut stolen = 0;

        for set in sets.iter().copied() {
            for entry in self.worker_entries(set).await? {
                if entry.class_name != class_name || !predicate(entry.args.as_slice()) {
                    continue;
                }

                if !backend.remove(set, &entry.jid).await? {
                    debug!(jid = %entry.jid, job_set = %set, "Entry already claimed, skipping");
                    continue;
                }

                debug!(
                    jid = %entry.jid,
                    job_set = %set,
                    job_class = %class_name,
                    "Stealing background migration job"
                );

                if let Err(err) = self.perform(class_name, &entry.args).await {
                    warn!(
                        jid = %entry.jid,
                        job_class = %class_name,
                        error = %err,
                        "Stolen job failed, requeueing"
                    );
                    if let Err(requeue_err) =
                        self.perform_async(class_name, entry.args.clone()).await
                    {
                        log_error(
                            "JobCoordinator",
                            "steal",
                            &requeue_err.to_string(),
                            Some(class_name),
                        );
                    }
                    return Err(err);
                }
                stolen += 1;
            }
        }

        log_queue_operation(
            "steal",
            self.queue(),
            Some(class_name),
            "completed",
            Some(stolen as u64),
        );
        Ok(stolen)
    }

    /// Instantiate `class_name` from the registry and run it inside
    /// [`with_shared_connection`](Self::with_shared_connection)
    pub async fn perform(&self, class_name: &str, args: &[Value]) -> MigrationResult<()> {
        let registry = self.registry.clone();
        self.with_shared_connection(|connection| async move {
            let mut job = registry.instantiate(class_name, args, connection)?;
            job.perform().await
        })
        .await?;

        // A ledger failure never fails a job that already ran
        if let Some(tracker) = &self.tracker {
            if let Err(err) = tracker.mark_all_as_succeeded(class_name, args).await {
                log_error(
                    "JobCoordinator",
                    "mark_all_as_succeeded",
                    &err.to_string(),
                    Some(class_name),
                );
            }
        }

        info!(job_class = %class_name, queue = %self.queue(), "✅ Performed background migration");
        Ok(())
    }

    /// Enqueued plus scheduled jobs on this coordinator's queue
    pub async fn remaining(&self) -> MigrationResult<u64> {
        let backend = self.backend()?;
        let enqueued = backend.size(JobSet::Enqueued, self.queue()).await?;
        let scheduled = backend.size(JobSet::Scheduled, self.queue()).await?;
        Ok(enqueued + scheduled)
    }

    /// Whether an enqueued or scheduled `class_name` job exists
    pub async fn exists(&self, class_name: &str) -> MigrationResult<bool> {
        self.any_in(&JobSet::LIVE, class_name).await
    }

    pub async fn dead_jobs(&self, class_name: &str) -> MigrationResult<bool> {
        self.any_in(&[JobSet::Dead], class_name).await
    }

    pub async fn retrying_jobs(&self, class_name: &str) -> MigrationResult<bool> {
        self.any_in(&[JobSet::Retry], class_name).await
    }

    pub async fn perform_async(&self, class_name: &str, args: Vec<Value>) -> MigrationResult<String> {
        let backend = self.backend()?;
        let jid = backend.push(self.new_job(class_name, args)).await?;
        log_queue_operation("perform_async", self.queue(), Some(class_name), "enqueued", None);
        Ok(jid)
    }

    /// Schedule `class_name` to run after `delay`; a zero delay enqueues now
    pub async fn perform_in(
        &self,
        delay: Duration,
        class_name: &str,
        args: Vec<Value>,
    ) -> MigrationResult<String> {
        if delay.is_zero() {
            return self.perform_async(class_name, args).await;
        }

        let backend = self.backend()?;
        let job = self.new_job(class_name, args).at(run_at(delay));
        let jid = backend.push(job).await?;
        log_queue_operation("perform_in", self.queue(), Some(class_name), "scheduled", None);
        Ok(jid)
    }

    pub async fn bulk_perform_async(&self, jobs: Vec<MigrationCall>) -> MigrationResult<Vec<String>> {
        self.bulk_push(jobs, None).await
    }

    pub async fn bulk_perform_in(
        &self,
        delay: Duration,
        jobs: Vec<MigrationCall>,
    ) -> MigrationResult<Vec<String>> {
        let at = (!delay.is_zero()).then(|| run_at(delay));
        self.bulk_push(jobs, at).await
    }

    /// Remove every queued `class_name` job from all four sets without
    /// running it
    pub async fn delete_queued_jobs(&self, class_name: &str) -> MigrationResult<u64> {
        let backend = self.backend()?;
        let mut deleted = 0;

        for set in JobSet::ALL {
            for entry in self.worker_entries(set).await? {
                if entry.class_name == class_name && backend.remove(set, &entry.jid).await? {
                    deleted += 1;
                }
            }
        }

        log_queue_operation(
            "delete_queued_jobs",
            self.queue(),
            Some(class_name),
            "completed",
            Some(deleted),
        );
        Ok(deleted)
    }

    async fn bulk_push(
        &self,
        jobs: Vec<MigrationCall>,
        at: Option<chrono::DateTime<Utc>>,
    ) -> MigrationResult<Vec<String>> {
        if jobs.is_empty() {
            return Ok(Vec::new());
        }

        let backend = self.backend()?;
        let count = jobs.len() as u64;
        let new_jobs = jobs
            .into_iter()
            .map(|(class_name, args)| {
                let job = self.new_job(&class_name, args);
                match at {
                    Some(at) => job.at(at),
                    None => job,
                }
            })
            .collect();

        let jids = backend.push_bulk(new_jobs).await?;
        log_queue_operation("bulk_push", self.queue(), None, "enqueued", Some(count));
        Ok(jids)
    }

    async fn worker_entries(&self, set: JobSet) -> MigrationResult<Vec<QueueEntry>> {
        let backend = self.backend()?;
        let entries = backend.entries(set, self.queue()).await?;
        Ok(entries
            .into_iter()
            .filter(|entry| entry.worker_class == self.worker.name)
            .collect())
    }

    async fn any_in(&self, sets: &[JobSet], class_name: &str) -> MigrationResult<bool> {
        for set in sets {
            if self
                .worker_entries(*set)
                .await?
                .iter()
                .any(|entry| entry.class_name == class_name)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn new_job(&self, class_name: &str, args: Vec<Value>) -> NewJob {
        NewJob::new(&self.worker.queue, &self.worker.name, class_name, args)
    }
}

fn run_at(delay: Duration) -> chrono::DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay)
        .unwrap_or_else(|_| chrono::Duration::days(365 * 100));
    Utc::now()
        .checked_add_signed(delay)
        .unwrap_or(chrono::DateTime::<Utc>::MAX_UTC)
}
