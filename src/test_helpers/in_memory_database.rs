//! # In-Memory Database
//!
//! A [`Connection`] that evaluates [`QueryBuilder`] relations and
//! [`Statement`]s against rows held in memory, so the batching core and the
//! coordinators can be exercised without a live PostgreSQL.
//!
//! Raw SQL predicates cannot be interpreted; tests register a Rust
//! equivalent with [`InMemoryDatabase::register_raw_predicate`].

use crate::database::{Connection, Row};
use crate::error::{MigrationError, MigrationResult};
use crate::query_builder::{
    AssignmentValue, Condition, Direction, LogicalOperator, QueryBuilder, Statement, WhereClause,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

type RawPredicate = Arc<dyn Fn(&Row) -> bool + Send + Sync>;
type TargetFilter<'a> = Box<dyn Fn(&Row) -> MigrationResult<bool> + 'a>;

pub struct InMemoryDatabase {
    name: String,
    tables: RwLock<HashMap<String, Vec<Row>>>,
    raw_predicates: RwLock<HashMap<String, RawPredicate>>,
    queries: AtomicUsize,
    statements: Mutex<Vec<String>>,
    timeout_after: Mutex<Option<usize>>,
}

impl fmt::Debug for InMemoryDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDatabase")
            .field("name", &self.name)
            .field("tables", &self.tables.read().keys().collect::<Vec<_>>())
            .field("queries", &self.query_count())
            .finish()
    }
}

impl InMemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: RwLock::new(HashMap::new()),
            raw_predicates: RwLock::new(HashMap::new()),
            queries: AtomicUsize::new(0),
            statements: Mutex::new(Vec::new()),
            timeout_after: Mutex::new(None),
        }
    }

    /// Append rows to `table`; non-object values are ignored
    pub fn insert_rows(&self, table: &str, rows: impl IntoIterator<Item = Value>) {
        let mut tables = self.tables.write();
        let stored = tables.entry(table.to_string()).or_default();
        stored.extend(rows.into_iter().filter_map(|row| match row {
            Value::Object(row) => Some(row),
            _ => None,
        }));
    }

    /// Snapshot of every row in `table`, in insertion order
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables.read().get(table).cloned().unwrap_or_default()
    }

    /// Row of `table` whose `column` equals `value`
    pub fn find(&self, table: &str, column: &str, value: i64) -> Option<Row> {
        self.rows(table)
            .into_iter()
            .find(|row| row.get(column).and_then(Value::as_i64) == Some(value))
    }

    /// Teach the database what a raw SQL fragment means
    pub fn register_raw_predicate<F>(&self, sql: &str, predicate: F)
    where
        F: Fn(&Row) -> bool + Send + Sync + 'static,
    {
        self.raw_predicates
            .write()
            .insert(sql.to_string(), Arc::new(predicate));
    }

    /// Make every mutating statement after the first `successful` ones fail
    /// with a statement timeout
    pub fn fail_statements_after(&self, successful: usize) {
        *self.timeout_after.lock() = Some(successful);
    }

    /// Number of reads and writes issued so far
    pub fn query_count(&self) -> usize {
        self.queries.load(AtomicOrdering::SeqCst)
    }

    /// SQL of every statement executed, in order
    pub fn executed_statements(&self) -> Vec<String> {
        self.statements.lock().clone()
    }

    fn evaluate(&self, relation: &QueryBuilder) -> MigrationResult<Vec<Row>> {
        let tables = self.tables.read();
        let rows = tables.get(relation.table()).cloned().unwrap_or_default();
        drop(tables);

        let mut matched = Vec::new();
        for row in rows {
            if self.matches_all(relation.where_clauses(), &row)? {
                matched.push(row);
            }
        }

        let order = relation.order_terms();
        if !order.is_empty() {
            matched.sort_by(|a, b| {
                order
                    .iter()
                    .map(|term| {
                        let ordering = compare_nullable(a.get(&term.field), b.get(&term.field));
                        match term.direction {
                            Direction::Asc => ordering,
                            Direction::Desc => ordering.reverse(),
                        }
                    })
                    .find(|ordering| *ordering != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        if !relation.distinct_fields().is_empty() {
            let mut seen = HashSet::new();
            matched.retain(|row| {
                let key: Vec<String> = relation
                    .distinct_fields()
                    .iter()
                    .map(|field| row.get(field).cloned().unwrap_or(Value::Null).to_string())
                    .collect();
                seen.insert(key)
            });
        }

        Ok(match relation.pagination() {
            Some(pagination) => pagination.apply(matched),
            None => matched,
        })
    }

    fn matches_all(&self, clauses: &[WhereClause], row: &Row) -> MigrationResult<bool> {
        for clause in clauses {
            if !self.matches_clause(clause, row)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn matches_clause(&self, clause: &WhereClause, row: &Row) -> MigrationResult<bool> {
        if clause.conditions.is_empty() {
            return Ok(true);
        }

        let mut results = Vec::with_capacity(clause.conditions.len());
        for condition in &clause.conditions {
            results.push(self.matches_condition(condition, row)?);
        }

        Ok(match clause.operator {
            LogicalOperator::And => results.iter().all(|r| *r),
            LogicalOperator::Or => results.iter().any(|r| *r),
        })
    }

    fn matches_condition(&self, condition: &Condition, row: &Row) -> MigrationResult<bool> {
        let value = |field: &str| row.get(field).filter(|v| !v.is_null());

        Ok(match condition {
            Condition::Simple {
                field,
                operator,
                value: expected,
            } => match (value(field), expected) {
                (Some(actual), expected) if !expected.is_null() => {
                    let ordering = compare_values(actual, expected);
                    match operator.as_str() {
                        "=" => ordering == Ordering::Equal,
                        "!=" | "<>" => ordering != Ordering::Equal,
                        ">" => ordering == Ordering::Greater,
                        ">=" => ordering != Ordering::Less,
                        "<" => ordering == Ordering::Less,
                        "<=" => ordering != Ordering::Greater,
                        other => {
                            return Err(MigrationError::database(
                                "in_memory",
                                format!("unsupported operator {other}"),
                            ))
                        }
                    }
                }
                _ => false,
            },
            Condition::In { field, values } => value(field).is_some_and(|actual| {
                values
                    .iter()
                    .any(|candidate| compare_values(actual, candidate) == Ordering::Equal)
            }),
            Condition::Between { field, start, end } => value(field).is_some_and(|actual| {
                compare_values(actual, start) != Ordering::Less
                    && compare_values(actual, end) != Ordering::Greater
            }),
            Condition::IsNull { field } => value(field).is_none(),
            Condition::IsNotNull { field } => value(field).is_some(),
            Condition::Raw { sql } => {
                let predicate = self.raw_predicates.read().get(sql).cloned().ok_or_else(|| {
                    MigrationError::database(
                        "in_memory",
                        format!("no predicate registered for raw SQL `{sql}`"),
                    )
                })?;
                predicate(row)
            }
        })
    }

    fn record_statement(&self, statement: &Statement) -> MigrationResult<()> {
        let mut statements = self.statements.lock();
        if let Some(limit) = *self.timeout_after.lock() {
            if statements.len() >= limit {
                return Err(MigrationError::statement_timeout(
                    "canceling statement due to statement timeout",
                ));
            }
        }
        statements.push(statement.to_sql());
        Ok(())
    }

    /// Rows of the relation's table a statement over `relation` touches,
    /// returned as a membership test over the full table
    fn targets(&self, relation: &QueryBuilder, key_column: &str) -> MigrationResult<TargetFilter<'_>> {
        let filter: TargetFilter<'_> = if relation.is_windowed() {
            let keys: Vec<Value> = self
                .evaluate(relation)?
                .into_iter()
                .filter_map(|row| row.get(key_column).cloned())
                .collect();
            let key_column = key_column.to_string();
            Box::new(move |row: &Row| {
                Ok(row.get(&key_column).is_some_and(|actual| {
                    keys.iter()
                        .any(|key| compare_values(actual, key) == Ordering::Equal)
                }))
            })
        } else {
            let clauses = relation.where_clauses().to_vec();
            Box::new(move |row: &Row| self.matches_all(&clauses, row))
        };
        Ok(filter)
    }
}

#[async_trait]
impl Connection for InMemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    async fn pluck(&self, relation: &QueryBuilder, column: &str) -> MigrationResult<Vec<i64>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);
        self.evaluate(relation)?
            .iter()
            .map(|row| {
                row.get(column).and_then(Value::as_i64).ok_or_else(|| {
                    MigrationError::database(
                        "pluck",
                        format!("{}.{column} is not an integer", relation.table()),
                    )
                })
            })
            .collect()
    }

    async fn fetch_all(&self, relation: &QueryBuilder) -> MigrationResult<Vec<Row>> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);
        self.evaluate(relation)
    }

    async fn execute(&self, statement: &Statement) -> MigrationResult<u64> {
        self.queries.fetch_add(1, AtomicOrdering::SeqCst);
        self.record_statement(statement)?;

        match statement {
            Statement::Update {
                relation,
                key_column,
                assignments,
            } => {
                let targets = self.targets(relation, key_column)?;
                let table = relation.table().to_string();
                let mut rows = self.rows(&table);
                let mut affected = 0;

                for row in rows.iter_mut() {
                    if !targets(row)? {
                        continue;
                    }
                    let original = row.clone();
                    for assignment in assignments {
                        let value = match &assignment.value {
                            AssignmentValue::Literal(value) => value.clone(),
                            AssignmentValue::Column(source) => {
                                original.get(source).cloned().unwrap_or(Value::Null)
                            }
                            AssignmentValue::Raw(expression) => {
                                return Err(MigrationError::database(
                                    "in_memory",
                                    format!("can not evaluate raw expression `{expression}`"),
                                ))
                            }
                        };
                        row.insert(assignment.column.clone(), value);
                    }
                    affected += 1;
                }

                drop(targets);
                self.tables.write().insert(table, rows);
                Ok(affected)
            }
            Statement::Delete {
                relation,
                key_column,
            } => {
                let targets = self.targets(relation, key_column)?;
                let table = relation.table().to_string();
                let rows = self.rows(&table);
                let before = rows.len();

                let mut kept = Vec::with_capacity(before);
                for row in rows {
                    if !targets(&row)? {
                        kept.push(row);
                    }
                }
                let affected = (before - kept.len()) as u64;

                drop(targets);
                self.tables.write().insert(table, kept);
                Ok(affected)
            }
            Statement::Raw(sql) => Err(MigrationError::database(
                "in_memory",
                format!("can not execute raw SQL `{sql}`"),
            )),
        }
    }
}

/// Postgres ordering for ascending sorts: NULLs last
fn compare_nullable(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let a = a.filter(|v| !v.is_null());
    let b = b.filter(|v| !v.is_null());
    match (a, b) {
        (Some(a), Some(b)) => compare_values(a, b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => a
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&b.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(a), Value::String(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::Assignment;
    use serde_json::json;

    fn seeded() -> InMemoryDatabase {
        let db = InMemoryDatabase::new("main");
        db.insert_rows(
            "issues",
            (1..=6).map(|id| json!({ "id": id, "state": if id % 2 == 0 { "closed" } else { "open" } })),
        );
        db
    }

    #[tokio::test]
    async fn test_range_order_and_window() {
        let db = seeded();
        let relation = QueryBuilder::new("issues")
            .where_between("id", 2, 6)
            .order_desc("id")
            .offset(1)
            .limit(2);

        assert_eq!(db.pluck(&relation, "id").await.unwrap(), vec![5, 4]);
        assert_eq!(db.query_count(), 1);
    }

    #[tokio::test]
    async fn test_update_through_window_uses_key_membership() {
        let db = seeded();
        let relation = QueryBuilder::new("issues").order_asc("id").limit(2);
        let statement = Statement::update(
            relation,
            "id",
            vec![Assignment::literal("state", json!("locked"))],
        );

        assert_eq!(db.execute(&statement).await.unwrap(), 2);
        assert_eq!(db.find("issues", "id", 2).unwrap()["state"], json!("locked"));
        assert_eq!(db.find("issues", "id", 3).unwrap()["state"], json!("open"));
    }

    #[tokio::test]
    async fn test_raw_predicates_must_be_registered() {
        let db = seeded();
        let relation = QueryBuilder::new("issues").where_raw("mod(id, 2) = 0");
        assert!(db.fetch_all(&relation).await.is_err());

        db.register_raw_predicate("mod(id, 2) = 0", |row| {
            row.get("id").and_then(Value::as_i64).is_some_and(|id| id % 2 == 0)
        });
        let statement = Statement::delete(relation, "id");
        assert_eq!(db.execute(&statement).await.unwrap(), 3);
        assert_eq!(db.rows("issues").len(), 3);
    }

    #[tokio::test]
    async fn test_fail_statements_after() {
        let db = seeded();
        db.fail_statements_after(1);
        let statement = Statement::delete(QueryBuilder::new("issues").where_eq("id", json!(1)), "id");

        assert_eq!(db.execute(&statement).await.unwrap(), 1);
        let err = db.execute(&statement).await.unwrap_err();
        assert!(err.is_statement_timeout());
        assert_eq!(db.executed_statements().len(), 1);
    }
}
