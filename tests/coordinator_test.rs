mod common;

use background_migrations::config::MigrationConfig;
use background_migrations::coordinator::{
    CoordinatorFactory, JobCoordinator, StaticShardResolver, TrackingDatabase,
};
use background_migrations::database::Connection;
use background_migrations::jobs::{
    transform, BatchedMigrationJob, BatchingDescriptor, JobSpec, MigrationJob,
};
use async_trait::async_trait;
use background_migrations::queue::{JobSet, MemoryQueue, NewJob, QueueBackend};
use background_migrations::test_helpers::InMemoryDatabase;
use background_migrations::tracking::{JobStatus, JobTracker, TrackedJob};
use background_migrations::{MigrationError, MigrationResult};
use common::*;
use futures::TryStreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn range_args(start: i64, end: i64) -> Vec<serde_json::Value> {
    BatchingDescriptor::new(start, end, "users", "id", 10, 0).to_queue_args()
}

/// Ledger whose writes all fail, as if its database went away
#[derive(Debug)]
struct UnavailableTracker;

#[async_trait]
impl JobTracker for UnavailableTracker {
    async fn track(&self, _class_name: &str, _arguments: Vec<Value>) -> MigrationResult<TrackedJob> {
        Err(MigrationError::database("track", "connection reset"))
    }

    async fn pending(
        &self,
        _class_name: &str,
        _after_id: i64,
        _limit: u64,
    ) -> MigrationResult<Vec<TrackedJob>> {
        Ok(Vec::new())
    }

    async fn mark_all_as_succeeded(
        &self,
        _class_name: &str,
        _arguments: &[Value],
    ) -> MigrationResult<u64> {
        Err(MigrationError::database("mark_all_as_succeeded", "connection reset"))
    }

    async fn delete(&self, _class_name: &str, _statuses: &[JobStatus]) -> MigrationResult<u64> {
        Ok(0)
    }

    async fn count(&self, _class_name: &str, _status: JobStatus) -> MigrationResult<u64> {
        Ok(0)
    }
}

#[test]
fn test_every_registered_migration_accepts_queue_arity() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    registry
        .register_transform(
            JobSpec::builder("CopyColumn")
                .job_arguments(["from_column", "to_column"])
                .operation_name("update_all")
                .build()
                .unwrap(),
            counting_transform(counter),
        )
        .unwrap();

    let db: Arc<dyn Connection> = users_table([]);
    assert_eq!(registry.validate(db.clone()).unwrap(), 2);

    for name in registry.names() {
        let spec = registry.spec(&name).unwrap();
        let nulls = vec![serde_json::Value::Null; spec.arity()];
        let job = BatchedMigrationJob::generic("users", "id", nulls, spec.clone(), db.clone()).unwrap();
        assert_eq!(job.job_name(), name);
        assert_eq!(job.descriptor().to_queue_args().len(), 6 + spec.arity());
    }
}

#[tokio::test]
async fn test_perform_async_then_steal_runs_inline() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=4));
    let coordinator = &fixture.coordinator;

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();
    coordinator
        .perform_in(Duration::from_secs(300), "BackfillUsers", range_args(3, 4))
        .await
        .unwrap();
    coordinator.perform_async("OtherMigration", range_args(1, 4)).await.unwrap();

    assert_eq!(coordinator.remaining().await.unwrap(), 3);
    assert!(coordinator.exists("BackfillUsers").await.unwrap());

    let stolen = coordinator.steal("BackfillUsers", false).await.unwrap();

    assert_eq!(stolen, 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(!coordinator.exists("BackfillUsers").await.unwrap());
    assert_eq!(coordinator.remaining().await.unwrap(), 1);
}

#[tokio::test]
async fn test_steal_with_predicate_leaves_other_ranges() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=4));
    let coordinator = &fixture.coordinator;

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();
    coordinator.perform_async("BackfillUsers", range_args(3, 4)).await.unwrap();

    let stolen = coordinator
        .steal_matching("BackfillUsers", false, |args| args[0] == json!(3))
        .await
        .unwrap();

    assert_eq!(stolen, 1);
    let left = fixture.queue.all(JobSet::Enqueued);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].args[0], json!(1));
}

#[tokio::test]
async fn test_steal_runs_scheduled_jobs_before_enqueued_ones() {
    let (registry, _) = registry();
    let starts = Arc::new(Mutex::new(Vec::new()));
    let seen = starts.clone();
    registry
        .register_transform(
            update_all_spec("BackfillUsers"),
            transform(move |sub_batch, _arguments| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(sub_batch.start());
                    Ok(0)
                }
            }),
        )
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=4));
    let coordinator = &fixture.coordinator;

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();
    coordinator
        .perform_in(Duration::from_secs(600), "BackfillUsers", range_args(3, 4))
        .await
        .unwrap();

    assert_eq!(coordinator.steal("BackfillUsers", false).await.unwrap(), 2);
    assert_eq!(*starts.lock(), vec![3, 1]);
}

#[tokio::test]
async fn test_other_worker_entries_on_shared_queue_are_left_alone() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=4));
    let coordinator = &fixture.coordinator;

    fixture
        .queue
        .push(NewJob::new(QUEUE, "CiDatabaseWorker", "BackfillUsers", range_args(1, 2)))
        .await
        .unwrap();
    coordinator.perform_async("BackfillUsers", range_args(3, 4)).await.unwrap();

    let pending: Vec<_> = coordinator.pending_jobs(true).try_collect().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].worker_class, WORKER);
    assert_eq!(pending[0].args, range_args(3, 4));

    assert_eq!(coordinator.steal("BackfillUsers", true).await.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    let left = fixture.queue.all(JobSet::Enqueued);
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].worker_class, "CiDatabaseWorker");
    assert!(!coordinator.exists("BackfillUsers").await.unwrap());
}

#[tokio::test]
async fn test_ledger_failure_after_perform_keeps_job_off_the_queue() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=2));
    let coordinator = fixture.coordinator.with_tracker(Arc::new(UnavailableTracker));

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();

    assert_eq!(coordinator.steal("BackfillUsers", false).await.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(fixture.queue.is_empty());
}

#[tokio::test]
async fn test_racing_coordinators_execute_job_once() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let registry = Arc::new(registry);
    let db = users_table([1]);

    let inner = Arc::new(MemoryQueue::new("default"));
    inner
        .push(NewJob::new(QUEUE, WORKER, "BackfillUsers", range_args(1, 1)))
        .await
        .unwrap();
    let stale = Arc::new(StaleListingQueue::new(inner.clone()));

    let coordinator = |db: Arc<InMemoryDatabase>| {
        JobCoordinator::new(
            worker_on("default"),
            Arc::new(StaticShardResolver::new().with_shard(stale.clone())),
            registry.clone(),
            db,
        )
    };
    let first = coordinator(db.clone());
    let second = coordinator(db);

    let (a, b) = tokio::join!(
        first.steal("BackfillUsers", false),
        second.steal("BackfillUsers", false)
    );

    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert_eq!(stale.removals(), 2);
    assert!(inner.is_empty());
}

#[tokio::test]
async fn test_failed_steal_requeues_once_and_propagates() {
    let (registry, _) = registry();
    let attempts = Arc::new(AtomicUsize::new(0));
    let seen = attempts.clone();
    registry
        .register_transform(
            update_all_spec("AlwaysFails"),
            transform(move |_sub_batch, _arguments| {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Err(MigrationError::database("update_all", "deadlock detected"))
                }
            }),
        )
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=2));
    let coordinator = &fixture.coordinator;

    let original = coordinator.perform_async("AlwaysFails", range_args(1, 2)).await.unwrap();

    let err = coordinator.steal("AlwaysFails", false).await.unwrap_err();

    assert!(matches!(err, MigrationError::Database { .. }));
    assert!(err.to_string().contains("deadlock detected"));
    assert_eq!(attempts.load(Ordering::SeqCst), 1);

    let requeued = fixture.queue.all(JobSet::Enqueued);
    assert_eq!(requeued.len(), 1);
    assert_ne!(requeued[0].jid, original);
    assert_eq!(requeued[0].class_name, "AlwaysFails");
    assert_eq!(requeued[0].args, range_args(1, 2));
}

#[tokio::test]
async fn test_queue_introspection_uses_own_shard() {
    let default = Arc::new(MemoryQueue::new("default"));
    let ci = Arc::new(MemoryQueue::new("ci_shard"));
    let resolver = Arc::new(
        StaticShardResolver::new()
            .with_shard(default.clone())
            .with_shard(ci.clone()),
    );
    let (registry, _) = registry();
    let coordinator = JobCoordinator::new(
        worker_on("ci_shard"),
        resolver.clone(),
        Arc::new(registry),
        users_table([]),
    );

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();
    let jid = ci.all(JobSet::Enqueued)[0].jid.clone();
    ci.retry(&jid, "boom").unwrap();

    assert_eq!(coordinator.remaining().await.unwrap(), 0);
    assert!(!coordinator.exists("BackfillUsers").await.unwrap());
    assert!(!coordinator.dead_jobs("BackfillUsers").await.unwrap());
    assert!(coordinator.retrying_jobs("BackfillUsers").await.unwrap());
    let pending: Vec<_> = coordinator.pending_jobs(true).try_collect().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].job_set, JobSet::Retry);

    assert_eq!(default.operation_count(), 0);
    assert!(ci.operation_count() > 0);
    assert_eq!(resolver.resolutions(), 1);
}

#[tokio::test]
async fn test_steal_with_dead_jobs_drains_retry_and_dead_sets() {
    let (registry, _) = registry();
    let counter = Arc::new(AtomicUsize::new(0));
    registry
        .register_transform(update_all_spec("BackfillUsers"), counting_transform(counter.clone()))
        .unwrap();
    let fixture = coordinator_fixture(registry, users_table(1..=4));
    let coordinator = &fixture.coordinator;

    coordinator.perform_async("BackfillUsers", range_args(1, 2)).await.unwrap();
    coordinator.perform_async("BackfillUsers", range_args(3, 4)).await.unwrap();
    let jids: Vec<String> = fixture
        .queue
        .all(JobSet::Enqueued)
        .into_iter()
        .map(|entry| entry.jid)
        .collect();
    fixture.queue.retry(&jids[0], "timeout").unwrap();
    fixture.queue.kill(&jids[1], "retries exhausted").unwrap();

    assert_eq!(coordinator.steal("BackfillUsers", false).await.unwrap(), 0);
    assert!(coordinator.dead_jobs("BackfillUsers").await.unwrap());

    assert_eq!(coordinator.steal("BackfillUsers", true).await.unwrap(), 2);
    assert_eq!(counter.load(Ordering::SeqCst), 2);
    assert!(fixture.queue.is_empty());
}

#[tokio::test]
async fn test_perform_publishes_shared_connection() {
    let (registry, _) = registry();
    let factory = CoordinatorFactory::new(
        MigrationConfig::default(),
        Arc::new(StaticShardResolver::new().with_shard(Arc::new(MemoryQueue::new("default")))),
        Arc::new(registry),
    )
    .with_connection(TrackingDatabase::Ci, users_table([]));
    let coordinator = factory.for_tracking_database("ci").unwrap();
    let shared = factory.shared_connection().clone();

    assert!(shared.current().is_none());
    let name = coordinator
        .with_shared_connection(|_connection| async {
            shared.current().map(|current| current.database_name().to_string())
        })
        .await;
    assert_eq!(name.as_deref(), Some("main"));
    assert!(shared.current().is_none());
}

#[test]
fn test_factory_validates_and_caches_tracking_databases() {
    let (registry, _) = registry();
    let factory = CoordinatorFactory::new(
        MigrationConfig::default(),
        Arc::new(StaticShardResolver::new()),
        Arc::new(registry),
    )
    .with_connection(TrackingDatabase::Main, users_table([]));

    let err = factory.for_tracking_database("geo").unwrap_err();
    assert!(matches!(err, MigrationError::UnknownTrackingDatabase { .. }));
    assert!(err.to_string().contains("main, ci"));

    let first = factory.main().unwrap();
    let second = factory.for_tracking_database("main").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.queue(), "background_migration");

    // allow-listed but no connection configured
    assert!(factory.for_tracking_database("ci").is_err());
}

#[tokio::test]
async fn test_bulk_enqueue_and_delete_queued_jobs() {
    let (registry, _) = registry();
    let fixture = coordinator_fixture(registry, users_table([]));
    let coordinator = &fixture.coordinator;

    let jids = coordinator
        .bulk_perform_in(
            Duration::from_secs(120),
            vec![
                ("BackfillUsers".to_string(), range_args(1, 2)),
                ("BackfillUsers".to_string(), range_args(3, 4)),
            ],
        )
        .await
        .unwrap();
    coordinator
        .bulk_perform_async(vec![("OtherMigration".to_string(), range_args(1, 4))])
        .await
        .unwrap();

    assert_eq!(jids.len(), 2);
    assert_eq!(fixture.queue.size(JobSet::Scheduled, QUEUE).await.unwrap(), 2);
    assert_eq!(coordinator.delete_queued_jobs("BackfillUsers").await.unwrap(), 2);
    assert_eq!(coordinator.remaining().await.unwrap(), 1);
}
