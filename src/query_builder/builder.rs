use super::{Pagination, WhereClause};
use serde_json::Value;

/// Sort direction for an ORDER BY term
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    fn as_sql(&self) -> &'static str {
        match self {
            Direction::Asc => "ASC",
            Direction::Desc => "DESC",
        }
    }
}

/// One ORDER BY term
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Composable, lazily-evaluated relation over one table.
///
/// Every method consumes and returns the builder, so a base relation can be
/// cloned and narrowed per sub-batch without affecting the original. Nothing
/// touches the database until the relation is handed to a
/// [`Connection`](crate::database::Connection).
#[derive(Debug, Clone, PartialEq)]
pub struct QueryBuilder {
    base_table: String,
    select_fields: Vec<String>,
    where_clauses: Vec<WhereClause>,
    order_by: Vec<OrderBy>,
    pagination: Option<Pagination>,
    distinct_on: Vec<String>,
}

impl QueryBuilder {
    /// Create a new query builder for the given table
    pub fn new(table: &str) -> Self {
        Self {
            base_table: table.to_string(),
            select_fields: vec!["*".to_string()],
            where_clauses: Vec::new(),
            order_by: Vec::new(),
            pagination: None,
            distinct_on: Vec::new(),
        }
    }

    /// Set specific fields to select
    pub fn select(mut self, fields: &[&str]) -> Self {
        self.select_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    /// Add a WHERE clause, ANDed with the existing ones
    pub fn where_clause(mut self, clause: WhereClause) -> Self {
        self.where_clauses.push(clause);
        self
    }

    pub fn where_eq(self, field: &str, value: Value) -> Self {
        self.where_clause(WhereClause::simple(field, "=", value))
    }

    /// `field BETWEEN start AND end` (inclusive on both ends)
    pub fn where_between(self, field: &str, start: i64, end: i64) -> Self {
        self.where_clause(WhereClause::between(
            field,
            Value::from(start),
            Value::from(end),
        ))
    }

    pub fn where_gte(self, field: &str, value: i64) -> Self {
        self.where_clause(WhereClause::simple(field, ">=", Value::from(value)))
    }

    pub fn where_gt(self, field: &str, value: i64) -> Self {
        self.where_clause(WhereClause::simple(field, ">", Value::from(value)))
    }

    pub fn where_lt(self, field: &str, value: i64) -> Self {
        self.where_clause(WhereClause::simple(field, "<", Value::from(value)))
    }

    pub fn where_in(self, field: &str, values: Vec<Value>) -> Self {
        self.where_clause(WhereClause::in_condition(field, values))
    }

    pub fn where_null(self, field: &str) -> Self {
        self.where_clause(WhereClause::is_null(field))
    }

    pub fn where_not_null(self, field: &str) -> Self {
        self.where_clause(WhereClause::is_not_null(field))
    }

    /// Add a raw SQL predicate
    pub fn where_raw(self, sql: &str) -> Self {
        self.where_clause(WhereClause::raw(sql))
    }

    /// Add ORDER BY ASC
    pub fn order_asc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction: Direction::Asc,
        });
        self
    }

    /// Add ORDER BY DESC
    pub fn order_desc(mut self, field: &str) -> Self {
        self.order_by.push(OrderBy {
            field: field.to_string(),
            direction: Direction::Desc,
        });
        self
    }

    /// Drop any ordering
    pub fn unordered(mut self) -> Self {
        self.order_by.clear();
        self
    }

    /// Add LIMIT clause
    pub fn limit(mut self, limit: u64) -> Self {
        match self.pagination.as_mut() {
            Some(pagination) => pagination.limit = Some(limit),
            None => self.pagination = Some(Pagination::limit_only(limit)),
        }
        self
    }

    /// Add OFFSET clause
    pub fn offset(mut self, offset: u64) -> Self {
        match self.pagination.as_mut() {
            Some(pagination) => pagination.offset = Some(offset),
            None => self.pagination = Some(Pagination::offset_only(offset)),
        }
        self
    }

    /// Add DISTINCT ON clause
    pub fn distinct_on(mut self, fields: &[&str]) -> Self {
        self.distinct_on.extend(fields.iter().map(|f| f.to_string()));
        self
    }

    pub fn table(&self) -> &str {
        &self.base_table
    }

    pub fn where_clauses(&self) -> &[WhereClause] {
        &self.where_clauses
    }

    pub fn order_terms(&self) -> &[OrderBy] {
        &self.order_by
    }

    pub fn pagination(&self) -> Option<Pagination> {
        self.pagination
    }

    pub fn distinct_fields(&self) -> &[String] {
        &self.distinct_on
    }

    /// Whether the relation selects a window or deduplicated subset of rows
    pub fn is_windowed(&self) -> bool {
        self.pagination.is_some() || !self.distinct_on.is_empty()
    }

    /// Render only the WHERE expression (without the keyword)
    pub fn where_sql(&self) -> Option<String> {
        if self.where_clauses.is_empty() {
            return None;
        }
        let parts: Vec<String> = self.where_clauses.iter().map(|c| c.to_sql()).collect();
        Some(parts.join(" AND "))
    }

    /// Build the complete SQL query string
    pub fn build_sql(&self) -> String {
        let mut sql = String::from("SELECT ");

        if !self.distinct_on.is_empty() {
            sql.push_str(&format!("DISTINCT ON ({}) ", self.distinct_on.join(", ")));
        }

        sql.push_str(&self.select_fields.join(", "));
        sql.push_str(&format!(" FROM {}", self.base_table));

        if let Some(where_sql) = self.where_sql() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_sql);
        }

        if !self.order_by.is_empty() {
            let terms: Vec<String> = self
                .order_by
                .iter()
                .map(|o| format!("{} {}", o.field, o.direction.as_sql()))
                .collect();
            sql.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }

        if let Some(ref pagination) = self.pagination {
            sql.push_str(&pagination.to_sql());
        }

        sql
    }
}
