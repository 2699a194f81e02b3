use super::{JobStatus, JobTracker, TrackedJob};
use crate::error::{MigrationError, MigrationResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::info;

const TABLE: &str = "background_migration_jobs";

/// Ledger stored in the `background_migration_jobs` table
#[derive(Debug, Clone)]
pub struct PgJobTracker {
    pool: PgPool,
}

impl PgJobTracker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn install_schema(&self) -> MigrationResult<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                id BIGSERIAL PRIMARY KEY,
                class_name TEXT NOT NULL,
                arguments JSONB NOT NULL DEFAULT '[]'::jsonb,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS index_{TABLE}_on_class_name_and_status_and_id \
             ON {TABLE} (class_name, status, id)"
        ))
        .execute(&self.pool)
        .await?;

        info!(table = TABLE, "✅ Job tracking schema installed");
        Ok(())
    }
}

fn tracked_job_from_row(row: &PgRow) -> MigrationResult<TrackedJob> {
    let arguments: Value = row.try_get("arguments")?;
    let status: String = row.try_get("status")?;

    Ok(TrackedJob {
        id: row.try_get("id")?,
        class_name: row.try_get("class_name")?,
        arguments: serde_json::from_value(arguments).map_err(|err| {
            MigrationError::database("tracked_job_from_row", err.to_string())
        })?,
        status: status.parse()?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl JobTracker for PgJobTracker {
    async fn track(&self, class_name: &str, arguments: Vec<Value>) -> MigrationResult<TrackedJob> {
        let row = sqlx::query(&format!(
            "INSERT INTO {TABLE} (class_name, arguments, status) VALUES ($1, $2, $3) \
             RETURNING id, class_name, arguments, status, created_at, updated_at"
        ))
        .bind(class_name)
        .bind(Value::Array(arguments))
        .bind(JobStatus::Pending.as_str())
        .fetch_one(&self.pool)
        .await?;

        tracked_job_from_row(&row)
    }

    async fn pending(
        &self,
        class_name: &str,
        after_id: i64,
        limit: u64,
    ) -> MigrationResult<Vec<TrackedJob>> {
        let rows = sqlx::query(&format!(
            "SELECT id, class_name, arguments, status, created_at, updated_at FROM {TABLE} \
             WHERE class_name = $1 AND status = $2 AND id > $3 ORDER BY id LIMIT $4"
        ))
        .bind(class_name)
        .bind(JobStatus::Pending.as_str())
        .bind(after_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(tracked_job_from_row).collect()
    }

    async fn mark_all_as_succeeded(
        &self,
        class_name: &str,
        arguments: &[Value],
    ) -> MigrationResult<u64> {
        let result = sqlx::query(&format!(
            "UPDATE {TABLE} SET status = $1, updated_at = NOW() \
             WHERE class_name = $2 AND status = $3 AND arguments = $4"
        ))
        .bind(JobStatus::Succeeded.as_str())
        .bind(class_name)
        .bind(JobStatus::Pending.as_str())
        .bind(Value::Array(arguments.to_vec()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, class_name: &str, statuses: &[JobStatus]) -> MigrationResult<u64> {
        let statuses: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        let result = sqlx::query(&format!(
            "DELETE FROM {TABLE} WHERE class_name = $1 AND status = ANY($2)"
        ))
        .bind(class_name)
        .bind(&statuses)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self, class_name: &str, status: JobStatus) -> MigrationResult<u64> {
        let count: i64 = sqlx::query_scalar(&format!(
            "SELECT COUNT(*) FROM {TABLE} WHERE class_name = $1 AND status = $2"
        ))
        .bind(class_name)
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(u64::try_from(count).unwrap_or_default())
    }
}
