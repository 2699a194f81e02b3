mod common;

use background_migrations::batching::{BatchIterator, OperationName, SubBatchOptions};
use background_migrations::jobs::{
    BatchedMigrationJob, BatchingArguments, BatchingDescriptor, JobSpec,
};
use background_migrations::query_builder::{Assignment, QueryBuilder};
use background_migrations::test_helpers::{InMemoryDatabase, RecordingSleeper};
use background_migrations::MigrationError;
use common::*;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// Walk `[start, end]` of a `users` table holding `ids`, returning the ids of
/// every sub-batch and the recorded pauses
async fn walk(
    ids: impl IntoIterator<Item = i64>,
    of: u64,
    start: i64,
    end: i64,
) -> (Vec<Vec<i64>>, Arc<RecordingSleeper>) {
    let db = users_table(ids);
    let sleeper = Arc::new(RecordingSleeper::new());
    let iterator = BatchIterator::new(db, sleeper.clone());
    let options = SubBatchOptions::new(of, start, end).with_pause(Duration::from_millis(10));
    let batches = Mutex::new(Vec::new());

    iterator
        .each_sub_batch(QueryBuilder::new("users"), "id", &options, |sub_batch| {
            let batches = &batches;
            async move {
                let ids = sub_batch.pluck("id").await?;
                batches.lock().push(ids);
                Ok(0u64)
            }
        })
        .await
        .unwrap();

    (batches.into_inner(), sleeper)
}

proptest! {
    /// Property: sub-batches partition the rows in range, in ascending order
    #[test]
    fn sub_batches_cover_range_exactly_once(
        ids in id_set_strategy(),
        of in sub_batch_size_strategy(),
        (start, end) in range_strategy(),
    ) {
        let (batches, _) = runtime().block_on(walk(ids.clone(), of, start, end));

        let expected: Vec<i64> = ids.range(start..=end).copied().collect();
        let seen: Vec<i64> = batches.iter().flatten().copied().collect();
        prop_assert_eq!(seen, expected);

        for batch in &batches {
            prop_assert!(!batch.is_empty());
            prop_assert!(batch.len() as u64 <= of);
        }
    }

    /// Property: one pause per sub-batch, none for an empty range
    #[test]
    fn pauses_once_per_sub_batch(
        ids in id_set_strategy(),
        of in sub_batch_size_strategy(),
        (start, end) in range_strategy(),
    ) {
        let (batches, sleeper) = runtime().block_on(walk(ids.clone(), of, start, end));

        let in_range = ids.range(start..=end).count() as u64;
        let expected_batches = in_range.div_ceil(of) as usize;
        prop_assert_eq!(batches.len(), expected_batches);
        prop_assert_eq!(sleeper.calls(), expected_batches);
    }
}

#[tokio::test]
async fn test_five_rows_in_sub_batches_of_two() {
    let db = users_table(1..=5);
    let sleeper = Arc::new(RecordingSleeper::new());
    let spec = Arc::new(update_all_spec("BackfillUsers"));
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 5, "users", "id", 2, 1_000),
        spec,
        db,
    )
    .unwrap()
    .with_sleeper(sleeper.clone());

    let sizes = Mutex::new(Vec::new());
    let processed = job
        .each_sub_batch(Default::default(), |sub_batch| {
            let sizes = &sizes;
            async move {
                let count = sub_batch.pluck("id").await?.len() as u64;
                sizes.lock().push(count);
                Ok(count)
            }
        })
        .await
        .unwrap();

    assert_eq!(processed, 3);
    assert_eq!(sizes.into_inner(), vec![2, 2, 1]);
    assert_eq!(sleeper.calls(), 3);
    assert_eq!(sleeper.total(), Duration::from_secs(3));
    assert_eq!(
        job.batch_metrics().affected_rows()[&OperationName::UpdateAll],
        vec![2, 2, 1]
    );
}

#[tokio::test]
async fn test_order_hint_walks_non_unique_column_to_completion() {
    let db = InMemoryDatabase::new("main");
    db.insert_rows(
        "builds",
        [1, 2, 2, 2, 3, 3, 4].into_iter().enumerate().map(|(i, project_id)| {
            json!({ "id": i as i64 + 1, "project_id": project_id, "migrated": false })
        }),
    );
    let db = Arc::new(db);
    let sleeper = Arc::new(RecordingSleeper::new());
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 4, "builds", "project_id", 2, 0),
        Arc::new(update_all_spec("BackfillBuilds")),
        db.clone(),
    )
    .unwrap()
    .with_sleeper(sleeper.clone());

    let processed = job
        .each_sub_batch(BatchingArguments::with_order_hint("id"), |sub_batch| async move {
            sub_batch
                .update_all(vec![Assignment::literal("migrated", json!(true))])
                .await
        })
        .await
        .unwrap();

    // [1] then every project 2 row, then [3, 3], then [4]
    assert_eq!(processed, 4);
    assert_eq!(sleeper.calls(), 4);
    assert_eq!(
        job.batch_metrics().affected_rows()[&OperationName::UpdateAll],
        vec![1, 3, 2, 1]
    );
    assert!(db
        .rows("builds")
        .iter()
        .all(|row| row.get("migrated") == Some(&json!(true))));
}

#[tokio::test]
async fn test_scope_to_limits_updates_to_even_ids() {
    let db = InMemoryDatabase::new("main");
    db.insert_rows(
        "users",
        vec![
            json!({ "id": 1, "tag": null, "migrated": false }),
            json!({ "id": 2, "tag": "b", "migrated": false }),
            json!({ "id": 3, "tag": "c", "migrated": false }),
            json!({ "id": 4, "tag": "d", "migrated": false }),
        ],
    );
    db.register_raw_predicate("mod(id, 2) = 0", |row| {
        row.get("id").and_then(Value::as_i64).is_some_and(|id| id % 2 == 0)
    });
    let db = Arc::new(db);

    let spec = JobSpec::builder("MarkTaggedUsers")
        .operation_name(OperationName::UpdateAll)
        .scope_to(|relation| relation.where_raw("mod(id, 2) = 0"))
        .build()
        .unwrap();
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 4, "users", "id", 10, 0),
        Arc::new(spec),
        db.clone(),
    )
    .unwrap()
    .with_sleeper(Arc::new(RecordingSleeper::new()));

    job.each_sub_batch(Default::default(), |sub_batch| async move {
        sub_batch
            .filter(|relation| relation.where_not_null("tag"))
            .update_all(vec![Assignment::literal("migrated", json!(true))])
            .await
    })
    .await
    .unwrap();

    let migrated = |id| db.find("users", "id", id).unwrap()["migrated"].clone();
    assert_eq!(migrated(1), json!(false));
    assert_eq!(migrated(2), json!(true));
    assert_eq!(migrated(3), json!(false));
    assert_eq!(migrated(4), json!(true));
    assert_eq!(
        job.batch_metrics().total_affected(&OperationName::UpdateAll),
        2
    );
}

#[tokio::test]
async fn test_distinct_batching_with_scope_fails_before_querying() {
    let db = users_table(1..=10);
    let spec = JobSpec::builder("ScopedDistinct")
        .operation_name(OperationName::UpdateAll)
        .scope_to(|relation| relation.where_not_null("id"))
        .build()
        .unwrap();
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 10, "users", "id", 2, 0),
        Arc::new(spec),
        db.clone(),
    )
    .unwrap();

    let err = job
        .distinct_each_batch(Default::default(), |_sub_batch| async { Ok(0u64) })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("scope_to"));
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_missing_operation_name_is_descriptive() {
    let db = users_table(1..=3);
    let spec = JobSpec::builder("Unnamed").build().unwrap();
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 3, "users", "id", 2, 0),
        Arc::new(spec),
        db.clone(),
    )
    .unwrap();

    let err = job
        .each_sub_batch(Default::default(), |_sub_batch| async { Ok(0u64) })
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::Configuration { .. }));
    assert!(err.to_string().contains("Operation name is required"));
    assert_eq!(db.query_count(), 0);
}

#[tokio::test]
async fn test_metrics_record_each_sub_batch_in_order() {
    let db = users_table(1..=7);
    let spec = JobSpec::builder("DeleteUsers")
        .operation_name(OperationName::DeleteAll)
        .build()
        .unwrap();
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 7, "users", "id", 3, 0),
        Arc::new(spec),
        db.clone(),
    )
    .unwrap()
    .with_sleeper(Arc::new(RecordingSleeper::new()));

    job.each_sub_batch(Default::default(), |sub_batch| async move {
        sub_batch.delete_all().await
    })
    .await
    .unwrap();

    let metrics = job.batch_metrics();
    assert_eq!(metrics.affected_rows()[&OperationName::DeleteAll], vec![3, 3, 1]);
    assert_eq!(metrics.timings()[&OperationName::DeleteAll].len(), 3);
    assert!(db.rows("users").is_empty());
}

#[tokio::test]
async fn test_statement_timeout_is_reraised_under_declared_label() {
    let db = users_table(1..=6);
    db.fail_statements_after(1);
    let spec = JobSpec::builder("SlowUpdate")
        .operation_name(OperationName::UpdateAll)
        .sub_batch_exception("SubBatchTimeoutError")
        .build()
        .unwrap();
    let job = BatchedMigrationJob::new(
        BatchingDescriptor::new(1, 6, "users", "id", 2, 0),
        Arc::new(spec),
        db,
    )
    .unwrap()
    .with_sleeper(Arc::new(RecordingSleeper::new()));

    let err = job
        .each_sub_batch(Default::default(), |sub_batch| async move {
            sub_batch
                .update_all(vec![Assignment::literal("touched", json!(true))])
                .await
        })
        .await
        .unwrap_err();

    match err {
        MigrationError::SubBatch { exception, source } => {
            assert_eq!(exception, "SubBatchTimeoutError");
            assert!(source.is_statement_timeout());
        }
        other => panic!("expected a sub-batch error, got {other:?}"),
    }
    assert_eq!(
        job.batch_metrics().affected_rows()[&OperationName::UpdateAll],
        vec![2]
    );
}
