//! Fixture builders shared by the integration tests.

use async_trait::async_trait;
use background_migrations::batching::OperationName;
use background_migrations::coordinator::{JobCoordinator, StaticShardResolver, WorkerClass};
use background_migrations::jobs::{transform, JobRegistry, JobSpec, Transform};
use background_migrations::queue::{JobSet, MemoryQueue, NewJob, QueueBackend, QueueEntry, QueueResult};
use background_migrations::test_helpers::{InMemoryDatabase, RecordingSleeper};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const WORKER: &str = "BackgroundMigrationWorker";
pub const QUEUE: &str = "background_migration";

/// A `users` table holding one row per id
pub fn users_table(ids: impl IntoIterator<Item = i64>) -> Arc<InMemoryDatabase> {
    let db = InMemoryDatabase::new("main");
    db.insert_rows("users", ids.into_iter().map(|id| json!({ "id": id })));
    Arc::new(db)
}

pub fn worker_on(shard: &str) -> WorkerClass {
    WorkerClass::new(WORKER, QUEUE, shard)
}

pub fn update_all_spec(name: &str) -> JobSpec {
    JobSpec::builder(name)
        .operation_name(OperationName::UpdateAll)
        .build()
        .unwrap()
}

/// Transform that only counts how many sub-batches it saw
pub fn counting_transform(counter: Arc<AtomicUsize>) -> Transform {
    transform(move |_sub_batch, _arguments| {
        let counter = counter.clone();
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }
    })
}

/// Registry whose jobs pause through a recording sleeper
pub fn registry() -> (JobRegistry, Arc<RecordingSleeper>) {
    let sleeper = Arc::new(RecordingSleeper::new());
    (JobRegistry::new().with_sleeper(sleeper.clone()), sleeper)
}

pub struct CoordinatorFixture {
    pub queue: Arc<MemoryQueue>,
    pub resolver: Arc<StaticShardResolver>,
    pub coordinator: JobCoordinator,
}

/// Coordinator for the main worker over a single in-memory shard
pub fn coordinator_fixture(registry: JobRegistry, db: Arc<InMemoryDatabase>) -> CoordinatorFixture {
    let queue = Arc::new(MemoryQueue::new("default"));
    let resolver = Arc::new(StaticShardResolver::new().with_shard(queue.clone()));
    let coordinator = JobCoordinator::new(
        worker_on("default"),
        resolver.clone(),
        Arc::new(registry),
        db,
    );

    CoordinatorFixture {
        queue,
        resolver,
        coordinator,
    }
}

/// Queue whose listings are frozen at construction time, so two consumers
/// both see entries the other one has already claimed
#[derive(Debug)]
pub struct StaleListingQueue {
    inner: Arc<MemoryQueue>,
    snapshot: Vec<QueueEntry>,
    removals: AtomicUsize,
}

impl StaleListingQueue {
    pub fn new(inner: Arc<MemoryQueue>) -> Self {
        let snapshot = JobSet::ALL.iter().flat_map(|set| inner.all(*set)).collect();
        Self {
            inner,
            snapshot,
            removals: AtomicUsize::new(0),
        }
    }

    /// Removal attempts, won or lost
    pub fn removals(&self) -> usize {
        self.removals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl QueueBackend for StaleListingQueue {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn push(&self, job: NewJob) -> QueueResult<String> {
        self.inner.push(job).await
    }

    async fn entries(&self, set: JobSet, queue: &str) -> QueueResult<Vec<QueueEntry>> {
        Ok(self
            .snapshot
            .iter()
            .filter(|entry| entry.job_set == set && entry.queue == queue)
            .cloned()
            .collect())
    }

    async fn remove(&self, set: JobSet, jid: &str) -> QueueResult<bool> {
        self.removals.fetch_add(1, Ordering::SeqCst);
        self.inner.remove(set, jid).await
    }

    async fn size(&self, set: JobSet, queue: &str) -> QueueResult<u64> {
        self.inner.size(set, queue).await
    }
}
