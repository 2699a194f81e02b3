use crate::config::DatabaseConfig;
use crate::error::{MigrationError, MigrationResult};
use crate::query_builder::{QueryBuilder, Statement};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Executor, PgPool};
use std::fmt;
use tracing::{debug, info};

/// A materialized row, keyed by column name
pub type Row = serde_json::Map<String, serde_json::Value>;

/// Database handle a migration job runs against.
///
/// Implementations own their connection pool; one job instance holds one
/// handle for its lifetime and threads it through every sub-batch.
#[async_trait]
pub trait Connection: Send + Sync + fmt::Debug {
    /// Logical name of the database (e.g. `main`, `ci`)
    fn database_name(&self) -> &str;

    /// Values of an integer column for every row of the relation, in relation order
    async fn pluck(&self, relation: &QueryBuilder, column: &str) -> MigrationResult<Vec<i64>>;

    /// Materialize every row of the relation
    async fn fetch_all(&self, relation: &QueryBuilder) -> MigrationResult<Vec<Row>>;

    /// Execute a mutating statement and return the number of affected rows
    async fn execute(&self, statement: &Statement) -> MigrationResult<u64>;
}

/// PostgreSQL connection backed by a sqlx pool
#[derive(Clone)]
pub struct PostgresConnection {
    name: String,
    pool: PgPool,
}

impl fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("name", &self.name)
            .field("pool_size", &self.pool.size())
            .finish()
    }
}

impl PostgresConnection {
    /// Wrap an existing pool
    pub fn new(name: impl Into<String>, pool: PgPool) -> Self {
        Self {
            name: name.into(),
            pool,
        }
    }

    /// Open a pool using the database configuration, applying the statement timeout
    /// to every connection so long sub-batches fail fast
    pub async fn connect(name: impl Into<String>, config: &DatabaseConfig) -> MigrationResult<Self> {
        let name = name.into();
        let url = config.database_url().ok_or_else(|| {
            MigrationError::configuration("database", "database.url or DATABASE_URL must be set")
        })?;
        let statement_timeout_ms = config.statement_timeout_ms;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .after_connect(move |conn, _meta| {
                Box::pin(async move {
                    conn.execute(format!("SET statement_timeout = {statement_timeout_ms}").as_str())
                        .await?;
                    Ok(())
                })
            })
            .connect(&url)
            .await?;

        info!(
            database = %name,
            max_connections = config.max_connections,
            statement_timeout_ms,
            "✅ Connected migration database pool"
        );

        Ok(Self { name, pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn pluck(&self, relation: &QueryBuilder, column: &str) -> MigrationResult<Vec<i64>> {
        let sql = pluck_sql(relation, column);
        debug!(database = %self.name, sql = %sql, "pluck");

        let values = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_all(&self.pool)
            .await?;
        Ok(values)
    }

    async fn fetch_all(&self, relation: &QueryBuilder) -> MigrationResult<Vec<Row>> {
        let sql = format!("SELECT row_to_json(sub) FROM ({}) sub", relation.build_sql());
        debug!(database = %self.name, sql = %sql, "fetch_all");

        let rows = sqlx::query_scalar::<_, serde_json::Value>(&sql)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|value| match value {
                serde_json::Value::Object(row) => Ok(row),
                other => Err(MigrationError::database(
                    "fetch_all",
                    format!("expected a JSON object row, got {other}"),
                )),
            })
            .collect()
    }

    async fn execute(&self, statement: &Statement) -> MigrationResult<u64> {
        let sql = statement.to_sql();
        debug!(database = %self.name, sql = %sql, "execute");

        let result = sqlx::query(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

/// Batch columns are often `integer`; widen them so they decode as `i64`.
/// Ordering and `DISTINCT ON` terms keep the raw column.
fn pluck_sql(relation: &QueryBuilder, column: &str) -> String {
    let widened = format!("{column}::bigint");
    relation.clone().select(&[widened.as_str()]).build_sql()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluck_widens_batch_column_to_bigint() {
        let relation = QueryBuilder::new("builds")
            .distinct_on(&["project_id"])
            .where_gte("project_id", 10)
            .order_asc("project_id")
            .limit(1);

        let sql = pluck_sql(&relation, "project_id");

        assert!(sql.starts_with("SELECT DISTINCT ON (project_id) project_id::bigint FROM builds"));
        assert!(sql.contains("ORDER BY project_id ASC"));
        assert!(sql.ends_with("LIMIT 1"));
    }
}
