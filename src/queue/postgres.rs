//! # PostgreSQL Queue
//!
//! A [`QueueBackend`] storing every job set in one table, so that the
//! atomic `remove` a steal relies on is a single-row `DELETE`.

use super::backend::QueueBackend;
use super::entry::{JobSet, NewJob, QueueEntry};
use super::errors::{QueueError, QueueResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};

const TABLE: &str = "background_migration_queue";

#[derive(Debug, Clone)]
pub struct PgQueue {
    name: String,
    pool: PgPool,
}

impl PgQueue {
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the queue table and its lookup index when missing
    pub async fn install_schema(&self) -> QueueResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                jid TEXT PRIMARY KEY,
                job_set TEXT NOT NULL,
                queue TEXT NOT NULL,
                worker_class TEXT NOT NULL,
                class_name TEXT NOT NULL,
                args JSONB NOT NULL DEFAULT '[]'::jsonb,
                enqueued_at TIMESTAMPTZ NOT NULL,
                run_at TIMESTAMPTZ,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS index_{TABLE}_on_set_and_queue \
             ON {TABLE} (job_set, queue, enqueued_at)"
        ))
        .execute(&self.pool)
        .await?;

        info!(shard = %self.name, table = TABLE, "✅ Queue schema installed");
        Ok(())
    }

    /// Move a live entry into the retry set after a failed attempt
    pub async fn retry(&self, jid: &str, error: &str) -> QueueResult<()> {
        self.transfer(jid, &JobSet::LIVE, JobSet::Retry, error).await
    }

    /// Move an entry into the dead set after its retries are exhausted
    pub async fn kill(&self, jid: &str, error: &str) -> QueueResult<()> {
        self.transfer(
            jid,
            &[JobSet::Scheduled, JobSet::Enqueued, JobSet::Retry],
            JobSet::Dead,
            error,
        )
        .await
    }

    async fn transfer(&self, jid: &str, from: &[JobSet], to: JobSet, error: &str) -> QueueResult<()> {
        let from: Vec<&str> = from.iter().map(JobSet::as_str).collect();
        let bump = i32::from(to == JobSet::Retry);

        let result = sqlx::query(&format!(
            "UPDATE {TABLE} \
             SET job_set = $1, error_message = $2, retry_count = retry_count + $3, \
                 run_at = CASE WHEN $3 = 1 THEN NOW() ELSE run_at END \
             WHERE jid = $4 AND job_set = ANY($5)"
        ))
        .bind(to.as_str())
        .bind(error)
        .bind(bump)
        .bind(jid)
        .bind(&from)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(QueueError::job_not_found(jid));
        }
        Ok(())
    }
}

fn entry_from_row(row: &PgRow) -> QueueResult<QueueEntry> {
    let job_set: String = row.try_get("job_set")?;
    let args: serde_json::Value = row.try_get("args")?;
    let retry_count: i32 = row.try_get("retry_count")?;

    Ok(QueueEntry {
        jid: row.try_get("jid")?,
        job_set: job_set.parse()?,
        queue: row.try_get("queue")?,
        worker_class: row.try_get("worker_class")?,
        class_name: row.try_get("class_name")?,
        args: serde_json::from_value(args)?,
        enqueued_at: row.try_get::<DateTime<Utc>, _>("enqueued_at")?,
        at: row.try_get::<Option<DateTime<Utc>>, _>("run_at")?,
        retry_count: u32::try_from(retry_count).unwrap_or_default(),
        error_message: row.try_get("error_message")?,
    })
}

#[async_trait]
impl QueueBackend for PgQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn push(&self, job: NewJob) -> QueueResult<String> {
        let entry = job.into_entry(Utc::now());
        debug!(
            shard = %self.name,
            queue = %entry.queue,
            class_name = %entry.class_name,
            job_set = %entry.job_set,
            "📤 Pushing background migration job"
        );

        sqlx::query(&format!(
            "INSERT INTO {TABLE} \
             (jid, job_set, queue, worker_class, class_name, args, enqueued_at, run_at, retry_count) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0)"
        ))
        .bind(&entry.jid)
        .bind(entry.job_set.as_str())
        .bind(&entry.queue)
        .bind(&entry.worker_class)
        .bind(&entry.class_name)
        .bind(serde_json::Value::Array(entry.args.clone()))
        .bind(entry.enqueued_at)
        .bind(entry.at)
        .execute(&self.pool)
        .await?;

        Ok(entry.jid)
    }

    async fn entries(&self, set: JobSet, queue: &str) -> QueueResult<Vec<QueueEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT jid, job_set, queue, worker_class, class_name, args, enqueued_at, run_at, \
                    retry_count, error_message \
             FROM {TABLE} WHERE job_set = $1 AND queue = $2 \
             ORDER BY COALESCE(run_at, enqueued_at), enqueued_at, jid"
        ))
        .bind(set.as_str())
        .bind(queue)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_row).collect()
    }

    async fn remove(&self, set: JobSet, jid: &str) -> QueueResult<bool> {
        let result = sqlx::query(&format!("DELETE FROM {TABLE} WHERE jid = $1 AND job_set = $2"))
            .bind(jid)
            .bind(set.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn size(&self, set: JobSet, queue: &str) -> QueueResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE job_set = $1 AND queue = $2"
        ))
        .bind(set.as_str())
        .bind(queue)
        .fetch_one(&self.pool)
        .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }
}
