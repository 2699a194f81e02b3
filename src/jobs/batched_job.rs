//! # Batched Migration Jobs
//!
//! [`BatchedMigrationJob`] owns one job's range, pacing and connection, and
//! provides the sub-batching plumbing every migration shares. A migration
//! supplies only its transform, either by implementing [`MigrationJob`] over
//! a `BatchedMigrationJob` or by registering a closure as a
//! [`TransformMigration`].

use super::arguments::{BatchingDescriptor, JobArguments};
use super::spec::JobSpec;
use crate::batching::{
    pause_duration, AffectedRows, BatchIterator, BatchMetrics, OperationName, Sleeper,
    SubBatch, SubBatchOptions, TokioSleeper,
};
use crate::database::Connection;
use crate::error::{MigrationError, MigrationResult};
use crate::logging::log_migration_operation;
use crate::query_builder::QueryBuilder;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

/// Options forwarded verbatim to the batch iterator
#[derive(Debug, Clone, Default)]
pub struct BatchingArguments {
    /// Secondary ordering column when the batch column alone is ambiguous
    pub order_hint: Option<String>,
}

impl BatchingArguments {
    pub fn with_order_hint(order_hint: impl Into<String>) -> Self {
        Self {
            order_hint: Some(order_hint.into()),
        }
    }
}

/// One migration job bound to its range and connection
pub struct BatchedMigrationJob {
    spec: Arc<JobSpec>,
    descriptor: BatchingDescriptor,
    arguments: JobArguments,
    connection: Arc<dyn Connection>,
    sleeper: Arc<dyn Sleeper>,
    batch_metrics: BatchMetrics,
}

impl std::fmt::Debug for BatchedMigrationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchedMigrationJob")
            .field("name", &self.spec.name())
            .field("descriptor", &self.descriptor)
            .field("database", &self.connection.database_name())
            .finish()
    }
}

impl BatchedMigrationJob {
    /// Bind `spec` to a concrete range. Fails when the number of job
    /// arguments differs from the declared arity, when `start_id > end_id`
    /// or when `sub_batch_size` is zero.
    pub fn new(
        descriptor: BatchingDescriptor,
        spec: Arc<JobSpec>,
        connection: Arc<dyn Connection>,
    ) -> MigrationResult<Self> {
        let arguments = JobArguments::new(
            spec.name(),
            spec.job_arguments(),
            descriptor.job_arguments.clone(),
        )?;

        if descriptor.start_id > descriptor.end_id {
            return Err(MigrationError::invalid_arguments(
                spec.name(),
                format!(
                    "start_id ({}) must not be greater than end_id ({})",
                    descriptor.start_id, descriptor.end_id
                ),
            ));
        }

        if descriptor.sub_batch_size == 0 {
            return Err(MigrationError::invalid_arguments(
                spec.name(),
                "sub_batch_size must be a positive integer",
            ));
        }

        Ok(Self {
            spec,
            descriptor,
            arguments,
            connection,
            sleeper: Arc::new(TokioSleeper),
            batch_metrics: BatchMetrics::new(),
        })
    }

    /// Instance with a zeroed range, for introspecting a migration without
    /// running it
    pub fn generic(
        batch_table: &str,
        batch_column: &str,
        job_arguments: Vec<Value>,
        spec: Arc<JobSpec>,
        connection: Arc<dyn Connection>,
    ) -> MigrationResult<Self> {
        let descriptor = BatchingDescriptor::new(0, 0, batch_table, batch_column, 1, 0)
            .with_job_arguments(job_arguments);
        Self::new(descriptor, spec, connection)
    }

    /// Replace the pause primitive (tests use a recording sleeper)
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        self.spec.name()
    }

    pub fn descriptor(&self) -> &BatchingDescriptor {
        &self.descriptor
    }

    pub fn start_id(&self) -> i64 {
        self.descriptor.start_id
    }

    pub fn end_id(&self) -> i64 {
        self.descriptor.end_id
    }

    pub fn batch_table(&self) -> &str {
        &self.descriptor.batch_table
    }

    pub fn batch_column(&self) -> &str {
        &self.descriptor.batch_column
    }

    pub fn sub_batch_size(&self) -> u64 {
        self.descriptor.sub_batch_size
    }

    pub fn pause_ms(&self) -> u64 {
        self.descriptor.pause_ms
    }

    pub fn job_arguments(&self) -> &JobArguments {
        &self.arguments
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn batch_metrics(&self) -> &BatchMetrics {
        &self.batch_metrics
    }

    /// Label statement timeouts are re-raised under, preferring the
    /// descriptor's over the migration's default
    pub fn sub_batch_exception(&self) -> Option<&str> {
        self.descriptor
            .sub_batch_exception
            .as_deref()
            .or_else(|| self.spec.sub_batch_exception())
    }

    /// The whole table this job ranges over, before any filter
    pub fn base_relation(&self) -> QueryBuilder {
        QueryBuilder::new(self.batch_table())
    }

    /// Drive `block` over every sub-batch of this job's range, recording each
    /// result under the declared operation name.
    pub async fn each_sub_batch<F, Fut, R>(
        &self,
        batching_arguments: BatchingArguments,
        block: F,
    ) -> MigrationResult<usize>
    where
        F: FnMut(SubBatch) -> Fut,
        Fut: Future<Output = MigrationResult<R>>,
        R: AffectedRows,
    {
        let operation = self.spec.require_operation_name()?;
        let mut options = self.sub_batch_options(batching_arguments);
        if let Some(scope) = self.spec.scope_to() {
            options = options.with_filter(scope.clone());
        }

        self.run(operation, options, block).await
    }

    /// Like [`each_sub_batch`](Self::each_sub_batch) but sized by distinct
    /// batch-column values. Not available to migrations that declare
    /// `scope_to`.
    pub async fn distinct_each_batch<F, Fut, R>(
        &self,
        batching_arguments: BatchingArguments,
        block: F,
    ) -> MigrationResult<usize>
    where
        F: FnMut(SubBatch) -> Fut,
        Fut: Future<Output = MigrationResult<R>>,
        R: AffectedRows,
    {
        if self.spec.scope_to().is_some() {
            return Err(MigrationError::distinct_with_scope(self.name()));
        }

        let operation = self.spec.require_operation_name()?;
        let options = self.sub_batch_options(batching_arguments).distinct();

        self.run(operation, options, block).await
    }

    fn sub_batch_options(&self, batching_arguments: BatchingArguments) -> SubBatchOptions {
        let mut options = SubBatchOptions::new(self.sub_batch_size(), self.start_id(), self.end_id())
            .with_pause(pause_duration(self.pause_ms()));
        if let Some(order_hint) = batching_arguments.order_hint {
            options = options.with_order_hint(order_hint);
        }
        options
    }

    async fn run<F, Fut, R>(
        &self,
        operation: &OperationName,
        options: SubBatchOptions,
        mut block: F,
    ) -> MigrationResult<usize>
    where
        F: FnMut(SubBatch) -> Fut,
        Fut: Future<Output = MigrationResult<R>>,
        R: AffectedRows,
    {
        let iterator = BatchIterator::new(self.connection.clone(), self.sleeper.clone());
        let metrics = &self.batch_metrics;
        let exception = self.sub_batch_exception();

        debug!(
            job_class = self.name(),
            table = self.batch_table(),
            column = self.batch_column(),
            start_id = self.start_id(),
            end_id = self.end_id(),
            distinct = options.distinct,
            "Starting sub-batch iteration"
        );

        iterator
            .each_sub_batch(
                self.base_relation(),
                self.batch_column(),
                &options,
                |sub_batch| {
                    let operation_future = block(sub_batch);
                    async move {
                        metrics
                            .instrument(operation, operation_future)
                            .await
                            .map_err(|err| reraise_as(exception, err))
                    }
                },
            )
            .await
    }
}

fn reraise_as(exception: Option<&str>, err: MigrationError) -> MigrationError {
    match exception {
        Some(label) if err.is_statement_timeout() => MigrationError::SubBatch {
            exception: label.to_string(),
            source: Box::new(err),
        },
        _ => err,
    }
}

/// Uniform calling contract every migration conforms to.
///
/// The coordinator invokes `perform` without knowing the concrete
/// migration, so the signature is fixed here.
#[async_trait]
pub trait MigrationJob: Send {
    /// Name the job was enqueued under
    fn job_name(&self) -> &str;

    async fn perform(&mut self) -> MigrationResult<()> {
        Err(MigrationError::not_implemented(self.job_name()))
    }
}

#[async_trait]
impl MigrationJob for BatchedMigrationJob {
    fn job_name(&self) -> &str {
        self.name()
    }
}

/// Transform applied to one sub-batch; returns the affected row count
pub type Transform =
    Arc<dyn Fn(SubBatch, JobArguments) -> BoxFuture<'static, MigrationResult<u64>> + Send + Sync>;

/// Wrap an async closure into a [`Transform`]
pub fn transform<F, Fut>(f: F) -> Transform
where
    F: Fn(SubBatch, JobArguments) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MigrationResult<u64>> + Send + 'static,
{
    Arc::new(move |sub_batch, arguments| Box::pin(f(sub_batch, arguments)))
}

/// Generic runner: a [`BatchedMigrationJob`] plus a transform closure
pub struct TransformMigration {
    job: BatchedMigrationJob,
    transform: Transform,
    distinct: bool,
    batching_arguments: BatchingArguments,
}

impl TransformMigration {
    pub fn new(job: BatchedMigrationJob, transform: Transform) -> Self {
        Self {
            job,
            transform,
            distinct: false,
            batching_arguments: BatchingArguments::default(),
        }
    }

    /// Size sub-batches by distinct batch-column values
    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_batching_arguments(mut self, batching_arguments: BatchingArguments) -> Self {
        self.batching_arguments = batching_arguments;
        self
    }

    pub fn job(&self) -> &BatchedMigrationJob {
        &self.job
    }
}

#[async_trait]
impl MigrationJob for TransformMigration {
    fn job_name(&self) -> &str {
        self.job.name()
    }

    async fn perform(&mut self) -> MigrationResult<()> {
        let job = &self.job;
        let transform = self.transform.clone();
        let arguments = job.job_arguments().clone();
        let block = move |sub_batch: SubBatch| transform(sub_batch, arguments.clone());

        info!(
            job_class = job.name(),
            start_id = job.start_id(),
            end_id = job.end_id(),
            "🚚 Performing background migration"
        );

        let result = if self.distinct {
            job.distinct_each_batch(self.batching_arguments.clone(), block)
                .await
        } else {
            job.each_sub_batch(self.batching_arguments.clone(), block)
                .await
        };

        let sub_batches = match result {
            Ok(sub_batches) => sub_batches,
            Err(err) => {
                log_migration_operation(
                    "perform",
                    Some(job.name()),
                    Some(job.batch_table()),
                    "failed",
                    Some(&err.to_string()),
                );
                return Err(err);
            }
        };

        let affected: u64 = job
            .spec()
            .operation_name()
            .map(|operation| job.batch_metrics().total_affected(operation))
            .unwrap_or(0);

        log_migration_operation(
            "perform",
            Some(job.name()),
            Some(job.batch_table()),
            "succeeded",
            Some(&format!(
                "range {}..={}, {sub_batches} sub-batches, {affected} rows",
                job.start_id(),
                job.end_id()
            )),
        );

        Ok(())
    }
}
