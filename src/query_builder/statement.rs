use super::conditions::format_value;
use super::QueryBuilder;
use serde_json::Value;

/// Right-hand side of a `SET column = ...` assignment
#[derive(Debug, Clone, PartialEq)]
pub enum AssignmentValue {
    Literal(Value),
    Column(String),
    Raw(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub column: String,
    pub value: AssignmentValue,
}

impl Assignment {
    pub fn literal(column: &str, value: Value) -> Self {
        Self {
            column: column.to_string(),
            value: AssignmentValue::Literal(value),
        }
    }

    /// Copy another column of the same row
    pub fn column(column: &str, source: &str) -> Self {
        Self {
            column: column.to_string(),
            value: AssignmentValue::Column(source.to_string()),
        }
    }

    pub fn raw(column: &str, expression: &str) -> Self {
        Self {
            column: column.to_string(),
            value: AssignmentValue::Raw(expression.to_string()),
        }
    }

    fn to_sql(&self) -> String {
        let value = match &self.value {
            AssignmentValue::Literal(value) => format_value(value),
            AssignmentValue::Column(source) => source.clone(),
            AssignmentValue::Raw(expression) => expression.clone(),
        };
        format!("{} = {}", self.column, value)
    }
}

/// A single mutating statement executed against one sub-batch
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Update {
        relation: QueryBuilder,
        key_column: String,
        assignments: Vec<Assignment>,
    },
    Delete {
        relation: QueryBuilder,
        key_column: String,
    },
    Raw(String),
}

impl Statement {
    pub fn update(relation: QueryBuilder, key_column: &str, assignments: Vec<Assignment>) -> Self {
        Statement::Update {
            relation,
            key_column: key_column.to_string(),
            assignments,
        }
    }

    pub fn delete(relation: QueryBuilder, key_column: &str) -> Self {
        Statement::Delete {
            relation,
            key_column: key_column.to_string(),
        }
    }

    /// Render the statement as PostgreSQL
    pub fn to_sql(&self) -> String {
        match self {
            Statement::Update {
                relation,
                key_column,
                assignments,
            } => {
                let set: Vec<String> = assignments.iter().map(Assignment::to_sql).collect();
                let mut sql = format!("UPDATE {} SET {}", relation.table(), set.join(", "));
                if let Some(filter) = Self::filter_sql(relation, key_column) {
                    sql.push_str(" WHERE ");
                    sql.push_str(&filter);
                }
                sql
            }
            Statement::Delete {
                relation,
                key_column,
            } => {
                let mut sql = format!("DELETE FROM {}", relation.table());
                if let Some(filter) = Self::filter_sql(relation, key_column) {
                    sql.push_str(" WHERE ");
                    sql.push_str(&filter);
                }
                sql
            }
            Statement::Raw(sql) => sql.clone(),
        }
    }

    /// Windowed relations cannot be expressed as a plain WHERE, so they are
    /// narrowed through a sub-select on the key column
    fn filter_sql(relation: &QueryBuilder, key_column: &str) -> Option<String> {
        if relation.is_windowed() {
            let subquery = relation.clone().select(&[key_column]).build_sql();
            Some(format!("{key_column} IN ({subquery})"))
        } else {
            relation.where_sql()
        }
    }
}
