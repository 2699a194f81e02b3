//! # Migration Helpers
//!
//! Scheduling operations a deploy-time migration uses to hand a table over
//! to background jobs: split it into ranges queued at intervals, requeue the
//! ranges a ledger still lists as pending, and finally drain whatever is left
//! inline.
//!
//! Everything goes through one [`JobCoordinator`], so the queue shard, the
//! connection and the job ledger all belong to the same tracking database.

use crate::batching::{SubBatchCursor, SubBatchOptions};
use crate::config::BatchingConfig;
use crate::coordinator::{JobCoordinator, MigrationCall};
use crate::error::{MigrationError, MigrationResult};
use crate::jobs::BatchingDescriptor;
use crate::logging::log_migration_operation;
use crate::query_builder::QueryBuilder;
use crate::tracking::{JobStatus, JobTracker};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Ledger rows read per round trip while requeueing or finalizing
const LEDGER_BATCH_SIZE: u64 = 1_000;

/// Knobs for [`MigrationHelpers::queue_background_migration_jobs_by_range_at_intervals`]
#[derive(Debug, Clone, Default)]
pub struct RangeSchedulingOptions {
    /// Rows per job; defaults to `batching.default_batch_size`
    pub batch_size: Option<u64>,
    /// Appended after the six batching fields of every job
    pub other_job_arguments: Vec<Value>,
    pub initial_delay: Duration,
    /// Record every scheduled job as pending in the ledger
    pub track_jobs: bool,
    /// Column the ranges are cut on; defaults to `id`
    pub primary_column_name: Option<String>,
    pub sub_batch_size: Option<u64>,
    pub pause_ms: Option<u64>,
}

impl RangeSchedulingOptions {
    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_other_job_arguments(mut self, arguments: Vec<Value>) -> Self {
        self.other_job_arguments = arguments;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn track_jobs(mut self) -> Self {
        self.track_jobs = true;
        self
    }

    pub fn with_primary_column_name(mut self, column: impl Into<String>) -> Self {
        self.primary_column_name = Some(column.into());
        self
    }

    pub fn with_sub_batch_size(mut self, sub_batch_size: u64) -> Self {
        self.sub_batch_size = Some(sub_batch_size);
        self
    }

    pub fn with_pause_ms(mut self, pause_ms: u64) -> Self {
        self.pause_ms = Some(pause_ms);
        self
    }
}

/// Knobs for [`MigrationHelpers::requeue_background_migration_jobs_by_range_at_intervals`]
#[derive(Debug, Clone)]
pub struct RequeueOptions {
    /// Ledger rows read per round trip
    pub batch_size: u64,
    pub initial_delay: Duration,
}

impl Default for RequeueOptions {
    fn default() -> Self {
        Self {
            batch_size: LEDGER_BATCH_SIZE,
            initial_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FinalizeOptions {
    /// Ledger statuses to delete once the migration is drained; empty keeps
    /// every row
    pub delete_tracking_statuses: Vec<JobStatus>,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            delete_tracking_statuses: vec![JobStatus::Succeeded],
        }
    }
}

impl FinalizeOptions {
    pub fn retain_tracking() -> Self {
        Self {
            delete_tracking_statuses: Vec::new(),
        }
    }

    pub fn delete_tracking(statuses: &[JobStatus]) -> Self {
        Self {
            delete_tracking_statuses: statuses.to_vec(),
        }
    }
}

/// What a [`MigrationHelpers::finalize_background_migration`] call drained
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FinalizeSummary {
    /// Queue entries stolen before the ledger pass
    pub stolen: usize,
    /// Pending ledger rows performed inline
    pub performed: usize,
    /// Queue entries stolen after the ledger pass, retry and dead sets included
    pub stolen_with_dead: usize,
    pub deleted_tracking: u64,
}

#[derive(Debug, Clone)]
pub struct MigrationHelpers {
    coordinator: Arc<JobCoordinator>,
    batching: BatchingConfig,
}

impl MigrationHelpers {
    pub fn new(coordinator: Arc<JobCoordinator>, batching: BatchingConfig) -> Self {
        Self {
            coordinator,
            batching,
        }
    }

    pub fn coordinator(&self) -> &Arc<JobCoordinator> {
        &self.coordinator
    }

    fn tracker(&self, operation: &str) -> MigrationResult<&Arc<dyn JobTracker>> {
        self.coordinator.tracker().ok_or_else(|| {
            MigrationError::configuration(
                "MigrationHelpers",
                format!("`{operation}` requires a job tracker on the coordinator"),
            )
        })
    }

    /// Split `relation` into ranges of `batch_size` rows and schedule one
    /// `job_class_name` job per range, `delay_interval` apart.
    ///
    /// The interval is raised to the configured minimum when smaller. Job `i`
    /// runs at `initial_delay + delay_interval * (i + 1)`. Returns the delay of
    /// the last job, or zero when the relation is empty.
    pub async fn queue_background_migration_jobs_by_range_at_intervals(
        &self,
        relation: QueryBuilder,
        job_class_name: &str,
        delay_interval: Duration,
        options: RangeSchedulingOptions,
    ) -> MigrationResult<Duration> {
        let delay_interval = delay_interval.max(self.batching.minimum_job_interval());
        let batch_size = options
            .batch_size
            .unwrap_or(self.batching.default_batch_size);
        let sub_batch_size = options
            .sub_batch_size
            .unwrap_or(self.batching.default_sub_batch_size);
        let pause_ms = options.pause_ms.unwrap_or(self.batching.default_pause_ms);
        let column = options.primary_column_name.as_deref().unwrap_or("id");
        let table = relation.table().to_string();
        let tracker = if options.track_jobs {
            Some(self.tracker("queue_background_migration_jobs_by_range_at_intervals")?)
        } else {
            None
        };

        let mut cursor = SubBatchCursor::new(
            self.coordinator.connection().clone(),
            relation,
            column,
            &SubBatchOptions::new(batch_size, i64::MIN, i64::MAX),
        )?;

        let mut final_delay = Duration::ZERO;
        let mut queued: u32 = 0;

        while let Some(batch) = cursor.next().await? {
            let start_id = batch.start();
            let Some(end_id) = batch.last_value().await? else {
                continue;
            };

            let arguments = BatchingDescriptor::new(
                start_id,
                end_id,
                &table,
                column,
                sub_batch_size,
                pause_ms,
            )
            .with_job_arguments(options.other_job_arguments.clone())
            .to_queue_args();

            queued += 1;
            final_delay = options.initial_delay + delay_interval * queued;

            self.coordinator
                .perform_in(final_delay, job_class_name, arguments.clone())
                .await?;
            if let Some(tracker) = tracker {
                tracker.track(job_class_name, arguments).await?;
            }

            debug!(
                job_class = %job_class_name,
                start_id,
                end_id,
                delay_secs = final_delay.as_secs(),
                "Scheduled background migration range"
            );
        }

        log_migration_operation(
            "queue_by_range",
            Some(job_class_name),
            Some(&table),
            "scheduled",
            Some(&format!("{queued} jobs")),
        );
        Ok(final_delay)
    }

    /// Re-enqueue every pending ledger row of `job_class_name`.
    ///
    /// The first job runs at `initial_delay` (immediately when that is zero),
    /// each following one `delay_interval` later. Returns
    /// `initial_delay + delay_interval * count`, or zero when nothing was
    /// pending.
    pub async fn requeue_background_migration_jobs_by_range_at_intervals(
        &self,
        job_class_name: &str,
        delay_interval: Duration,
        options: RequeueOptions,
    ) -> MigrationResult<Duration> {
        let tracker = self.tracker("requeue_background_migration_jobs_by_range_at_intervals")?;
        let batch_size = options.batch_size.max(1);
        let mut after_id = 0;
        let mut queued: u32 = 0;

        loop {
            let pending = tracker
                .pending(job_class_name, after_id, batch_size)
                .await?;
            let Some(last) = pending.last() else {
                break;
            };
            after_id = last.id;

            for job in pending {
                let delay = options.initial_delay + delay_interval * queued;
                self.coordinator
                    .perform_in(delay, job_class_name, job.arguments)
                    .await?;
                queued += 1;
            }
        }

        if queued == 0 {
            return Ok(Duration::ZERO);
        }

        info!(job_class = %job_class_name, requeued = queued, "Requeued pending background migration jobs");
        Ok(options.initial_delay + delay_interval * queued)
    }

    /// Drain `job_class_name` completely: steal what is queued, perform what
    /// the ledger still lists as pending, steal again including the retry and
    /// dead sets, then delete the requested ledger rows.
    pub async fn finalize_background_migration(
        &self,
        job_class_name: &str,
        options: FinalizeOptions,
    ) -> MigrationResult<FinalizeSummary> {
        let mut summary = FinalizeSummary {
            stolen: self.coordinator.steal(job_class_name, false).await?,
            ..FinalizeSummary::default()
        };

        if let Some(tracker) = self.coordinator.tracker() {
            let mut after_id = 0;
            loop {
                let pending = tracker
                    .pending(job_class_name, after_id, LEDGER_BATCH_SIZE)
                    .await?;
                let Some(last) = pending.last() else {
                    break;
                };
                after_id = last.id;

                for job in pending {
                    self.coordinator
                        .perform(job_class_name, &job.arguments)
                        .await?;
                    summary.performed += 1;
                }
            }
        }

        summary.stolen_with_dead = self.coordinator.steal(job_class_name, true).await?;

        if !options.delete_tracking_statuses.is_empty() {
            summary.deleted_tracking = self
                .delete_job_tracking(job_class_name, &options.delete_tracking_statuses)
                .await?;
        }

        info!(
            job_class = %job_class_name,
            stolen = summary.stolen,
            performed = summary.performed,
            stolen_with_dead = summary.stolen_with_dead,
            deleted_tracking = summary.deleted_tracking,
            "✅ Finalized background migration"
        );
        Ok(summary)
    }

    /// Schedule one job `delay` from now
    pub async fn migrate_in(
        &self,
        delay: Duration,
        job_class_name: &str,
        arguments: Vec<Value>,
    ) -> MigrationResult<String> {
        self.coordinator
            .perform_in(delay, job_class_name, arguments)
            .await
    }

    pub async fn migrate_async(
        &self,
        job_class_name: &str,
        arguments: Vec<Value>,
    ) -> MigrationResult<String> {
        self.coordinator
            .perform_async(job_class_name, arguments)
            .await
    }

    pub async fn bulk_migrate_in(
        &self,
        delay: Duration,
        jobs: Vec<MigrationCall>,
    ) -> MigrationResult<Vec<String>> {
        self.coordinator.bulk_perform_in(delay, jobs).await
    }

    /// Drop every queued `job_class_name` job without running it
    pub async fn delete_queued_jobs(&self, job_class_name: &str) -> MigrationResult<u64> {
        self.coordinator.delete_queued_jobs(job_class_name).await
    }

    /// Delete ledger rows of `job_class_name` in any of `statuses`
    pub async fn delete_job_tracking(
        &self,
        job_class_name: &str,
        statuses: &[JobStatus],
    ) -> MigrationResult<u64> {
        let tracker = self.tracker("delete_job_tracking")?;
        tracker.delete(job_class_name, statuses).await
    }
}
