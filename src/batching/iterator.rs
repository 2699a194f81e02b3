use super::sleeper::Sleeper;
use crate::database::{Connection, Row};
use crate::error::{MigrationError, MigrationResult};
use crate::query_builder::{Assignment, QueryBuilder, Statement};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Additional predicate applied once to the base relation of a batch
#[derive(Clone)]
pub struct RelationFilter(Arc<dyn Fn(QueryBuilder) -> QueryBuilder + Send + Sync>);

impl RelationFilter {
    pub fn new<F>(filter: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        Self(Arc::new(filter))
    }

    pub fn apply(&self, relation: QueryBuilder) -> QueryBuilder {
        (self.0)(relation)
    }
}

impl fmt::Debug for RelationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RelationFilter(..)")
    }
}

/// How a range is cut into sub-batches
#[derive(Debug, Clone)]
pub struct SubBatchOptions {
    /// Maximum rows (distinct batch-column values in distinct mode) per sub-batch
    pub of: u64,
    pub start_id: i64,
    pub end_id: i64,
    pub extra_filter: Option<RelationFilter>,
    pub distinct: bool,
    /// Secondary ORDER BY column when the batch column alone is ambiguous
    pub order_hint: Option<String>,
    pub pause: Duration,
}

impl SubBatchOptions {
    pub fn new(of: u64, start_id: i64, end_id: i64) -> Self {
        Self {
            of,
            start_id,
            end_id,
            extra_filter: None,
            distinct: false,
            order_hint: None,
            pause: Duration::ZERO,
        }
    }

    pub fn with_filter(mut self, filter: RelationFilter) -> Self {
        self.extra_filter = Some(filter);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn with_order_hint(mut self, order_hint: impl Into<String>) -> Self {
        self.order_hint = Some(order_hint.into());
        self
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Reject contradictory options before any query is issued
    pub fn validate(&self) -> MigrationResult<()> {
        if self.of == 0 {
            return Err(MigrationError::configuration(
                "BatchIterator",
                "sub-batch size must be a positive integer",
            ));
        }

        if self.distinct && self.extra_filter.is_some() {
            return Err(MigrationError::configuration(
                "BatchIterator",
                "distinct batching can not be combined with an additional filter",
            ));
        }

        Ok(())
    }
}

/// One bounded slice of a job's range, ready for a single mutating statement
#[derive(Debug, Clone)]
pub struct SubBatch {
    relation: QueryBuilder,
    column: String,
    start: i64,
    stop: Option<i64>,
    index: usize,
    connection: Arc<dyn Connection>,
}

impl SubBatch {
    pub fn relation(&self) -> &QueryBuilder {
        &self.relation
    }

    pub fn into_relation(self) -> QueryBuilder {
        self.relation
    }

    /// Batch column the slice is bounded on
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Inclusive lower bound
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Exclusive upper bound; `None` for the final slice of the range
    pub fn stop(&self) -> Option<i64> {
        self.stop
    }

    /// Zero-based position of this slice within the range
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    /// Narrow the slice further, e.g. to rows that still need the transform
    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.relation = filter(self.relation);
        self
    }

    pub async fn update_all(&self, assignments: Vec<Assignment>) -> MigrationResult<u64> {
        self.execute(&Statement::update(
            self.relation.clone(),
            &self.column,
            assignments,
        ))
        .await
    }

    pub async fn delete_all(&self) -> MigrationResult<u64> {
        self.execute(&Statement::delete(self.relation.clone(), &self.column))
            .await
    }

    pub async fn execute(&self, statement: &Statement) -> MigrationResult<u64> {
        self.connection.execute(statement).await
    }

    /// Largest batch-column value in the slice, read with a single-row query
    pub async fn last_value(&self) -> MigrationResult<Option<i64>> {
        let relation = self
            .relation
            .clone()
            .unordered()
            .order_desc(&self.column)
            .limit(1);
        let values = self.connection.pluck(&relation, &self.column).await?;
        Ok(values.first().copied())
    }

    pub async fn pluck(&self, column: &str) -> MigrationResult<Vec<i64>> {
        self.connection
            .pluck(&self.relation.clone().order_asc(column), column)
            .await
    }

    pub async fn fetch_all(&self) -> MigrationResult<Vec<Row>> {
        self.connection
            .fetch_all(&self.relation.clone().order_asc(&self.column))
            .await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Locate the first row, optionally at or after a resume point
    Seek(Option<i64>),
    /// Next sub-batch starts at this batch-column value
    At(i64),
    Done,
}

/// Lazy, restartable keyset walk over `[start_id, end_id]`.
///
/// Each step issues one boundary query: the value `of` rows past the current
/// start (`OFFSET of LIMIT 1`). The slice yielded is
/// `column >= start AND column < boundary`, so consecutive slices never
/// overlap and rows inserted behind the cursor are never revisited. When the
/// boundary row repeats `start` (non-unique column), the boundary moves to
/// the next greater value and the slice holds every duplicate of `start`.
#[derive(Debug)]
pub struct SubBatchCursor {
    connection: Arc<dyn Connection>,
    scope: QueryBuilder,
    column: String,
    of: u64,
    distinct: bool,
    order_hint: Option<String>,
    state: CursorState,
    yielded: usize,
}

impl SubBatchCursor {
    pub fn new(
        connection: Arc<dyn Connection>,
        relation: QueryBuilder,
        column: &str,
        options: &SubBatchOptions,
    ) -> MigrationResult<Self> {
        options.validate()?;

        let mut scope = relation.where_between(column, options.start_id, options.end_id);
        if let Some(filter) = &options.extra_filter {
            scope = filter.apply(scope);
        }

        Ok(Self {
            connection,
            scope,
            column: column.to_string(),
            of: options.of,
            distinct: options.distinct,
            order_hint: options.order_hint.clone(),
            state: CursorState::Seek(None),
            yielded: 0,
        })
    }

    /// Value the next sub-batch starts at, when known
    pub fn position(&self) -> Option<i64> {
        match self.state {
            CursorState::Seek(from) => from,
            CursorState::At(start) => Some(start),
            CursorState::Done => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.state == CursorState::Done
    }

    /// Continue from `start` (e.g. the last recorded position before a crash)
    pub fn resume_at(&mut self, start: i64) {
        self.state = CursorState::Seek(Some(start));
    }

    /// The filtered range relation every sub-batch is carved from
    pub fn scope(&self) -> &QueryBuilder {
        &self.scope
    }

    pub async fn next(&mut self) -> MigrationResult<Option<SubBatch>> {
        let start = match self.state {
            CursorState::Done => return Ok(None),
            CursorState::At(start) => start,
            CursorState::Seek(from) => match self.first_value(from).await? {
                Some(first) => first,
                None => {
                    self.state = CursorState::Done;
                    return Ok(None);
                }
            },
        };

        let mut stop = self.boundary_after(start).await?;
        if stop.is_some_and(|stop| stop <= start) {
            // `of` or more rows share `start`; take all of them in this slice
            stop = self.next_value_after(start).await?;
        }
        self.state = match stop {
            Some(stop) => CursorState::At(stop),
            None => CursorState::Done,
        };

        let mut relation = self.scope.clone().where_gte(&self.column, start);
        if let Some(stop) = stop {
            relation = relation.where_lt(&self.column, stop);
        }

        let index = self.yielded;
        self.yielded += 1;

        debug!(
            table = relation.table(),
            column = %self.column,
            start,
            stop,
            index,
            "Yielding sub-batch"
        );

        Ok(Some(SubBatch {
            relation,
            column: self.column.clone(),
            start,
            stop,
            index,
            connection: self.connection.clone(),
        }))
    }

    fn ordered(&self, relation: QueryBuilder) -> QueryBuilder {
        let mut relation = relation;
        if self.distinct {
            relation = relation.distinct_on(&[&self.column]);
        }
        relation = relation.order_asc(&self.column);
        if let Some(hint) = &self.order_hint {
            relation = relation.order_asc(hint);
        }
        relation
    }

    async fn first_value(&self, from: Option<i64>) -> MigrationResult<Option<i64>> {
        let mut relation = self.scope.clone();
        if let Some(from) = from {
            relation = relation.where_gte(&self.column, from);
        }
        let relation = self.ordered(relation).limit(1);
        let values = self.connection.pluck(&relation, &self.column).await?;
        Ok(values.first().copied())
    }

    async fn boundary_after(&self, start: i64) -> MigrationResult<Option<i64>> {
        let relation = self
            .ordered(self.scope.clone().where_gte(&self.column, start))
            .offset(self.of)
            .limit(1);
        let values = self.connection.pluck(&relation, &self.column).await?;
        Ok(values.first().copied())
    }

    async fn next_value_after(&self, start: i64) -> MigrationResult<Option<i64>> {
        let relation = self
            .ordered(self.scope.clone().where_gt(&self.column, start))
            .limit(1);
        let values = self.connection.pluck(&relation, &self.column).await?;
        Ok(values.first().copied())
    }
}

/// Drives a [`SubBatchCursor`] to completion, pausing after every sub-batch
pub struct BatchIterator {
    connection: Arc<dyn Connection>,
    sleeper: Arc<dyn Sleeper>,
}

impl BatchIterator {
    pub fn new(connection: Arc<dyn Connection>, sleeper: Arc<dyn Sleeper>) -> Self {
        Self {
            connection,
            sleeper,
        }
    }

    pub fn cursor(
        &self,
        relation: QueryBuilder,
        column: &str,
        options: &SubBatchOptions,
    ) -> MigrationResult<SubBatchCursor> {
        SubBatchCursor::new(self.connection.clone(), relation, column, options)
    }

    /// Yield every sub-batch of the range to `block`, in ascending batch-column
    /// order, one at a time. Errors from `block` stop the walk and propagate
    /// unchanged. Returns the number of sub-batches processed.
    pub async fn each_sub_batch<F, Fut, R>(
        &self,
        relation: QueryBuilder,
        column: &str,
        options: &SubBatchOptions,
        mut block: F,
    ) -> MigrationResult<usize>
    where
        F: FnMut(SubBatch) -> Fut,
        Fut: Future<Output = MigrationResult<R>>,
    {
        let mut cursor = self.cursor(relation, column, options)?;
        let mut processed = 0;

        while let Some(sub_batch) = cursor.next().await? {
            block(sub_batch).await?;
            processed += 1;
            self.sleeper.sleep(options.pause).await;
        }

        Ok(processed)
    }
}
