use serde_json::Value;

/// Represents different types of SQL conditions
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Simple {
        field: String,
        operator: String,
        value: Value,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    Between {
        field: String,
        start: Value,
        end: Value,
    },
    IsNull {
        field: String,
    },
    IsNotNull {
        field: String,
    },
    Raw {
        sql: String,
    },
}

impl Condition {
    /// Convert condition to SQL string
    pub fn to_sql(&self) -> String {
        match self {
            Condition::Simple {
                field,
                operator,
                value,
            } => {
                format!("{} {} {}", field, operator, format_value(value))
            }
            Condition::In { field, values } => {
                if values.is_empty() {
                    return "1=0".to_string();
                }
                let value_list = values
                    .iter()
                    .map(format_value)
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{field} IN ({value_list})")
            }
            Condition::Between { field, start, end } => {
                format!(
                    "{} BETWEEN {} AND {}",
                    field,
                    format_value(start),
                    format_value(end)
                )
            }
            Condition::IsNull { field } => format!("{field} IS NULL"),
            Condition::IsNotNull { field } => format!("{field} IS NOT NULL"),
            Condition::Raw { sql } => sql.clone(),
        }
    }
}

/// Represents a WHERE clause that can contain multiple conditions
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub conditions: Vec<Condition>,
    pub operator: LogicalOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl WhereClause {
    fn single(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
            operator: LogicalOperator::And,
        }
    }

    /// Create a simple WHERE clause with a single condition
    pub fn simple(field: &str, operator: &str, value: Value) -> Self {
        Self::single(Condition::Simple {
            field: field.to_string(),
            operator: operator.to_string(),
            value,
        })
    }

    /// Create WHERE IN clause
    pub fn in_condition(field: &str, values: Vec<Value>) -> Self {
        Self::single(Condition::In {
            field: field.to_string(),
            values,
        })
    }

    /// Create an inclusive range clause
    pub fn between(field: &str, start: Value, end: Value) -> Self {
        Self::single(Condition::Between {
            field: field.to_string(),
            start,
            end,
        })
    }

    /// Create WHERE IS NULL clause
    pub fn is_null(field: &str) -> Self {
        Self::single(Condition::IsNull {
            field: field.to_string(),
        })
    }

    /// Create WHERE IS NOT NULL clause
    pub fn is_not_null(field: &str) -> Self {
        Self::single(Condition::IsNotNull {
            field: field.to_string(),
        })
    }

    /// Create raw SQL condition
    pub fn raw(sql: &str) -> Self {
        Self::single(Condition::Raw {
            sql: sql.to_string(),
        })
    }

    /// Combine multiple conditions with AND
    pub fn and(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: LogicalOperator::And,
        }
    }

    /// Combine multiple conditions with OR
    pub fn or(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            operator: LogicalOperator::Or,
        }
    }

    /// Convert to SQL string
    pub fn to_sql(&self) -> String {
        if self.conditions.is_empty() {
            return "1=1".to_string();
        }

        if self.conditions.len() == 1 {
            return self.conditions[0].to_sql();
        }

        let operator_str = match self.operator {
            LogicalOperator::And => " AND ",
            LogicalOperator::Or => " OR ",
        };

        let condition_sqls: Vec<String> = self.conditions.iter().map(|c| c.to_sql()).collect();

        format!("({})", condition_sqls.join(operator_str))
    }
}

/// Format a JSON value for SQL
pub(crate) fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        _ => format!("'{}'", value.to_string().replace('\'', "''")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_between_sql() {
        let clause = WhereClause::between("id", json!(1), json!(100));
        assert_eq!(clause.to_sql(), "id BETWEEN 1 AND 100");
    }

    #[test]
    fn test_string_values_are_escaped() {
        let clause = WhereClause::simple("name", "=", json!("o'brien"));
        assert_eq!(clause.to_sql(), "name = 'o''brien'");
    }

    #[test]
    fn test_or_clause_is_parenthesized() {
        let clause = WhereClause::or(vec![
            Condition::IsNull {
                field: "tag".to_string(),
            },
            Condition::Simple {
                field: "tag".to_string(),
                operator: "=".to_string(),
                value: json!(""),
            },
        ]);
        assert_eq!(clause.to_sql(), "(tag IS NULL OR tag = '')");
    }

    #[test]
    fn test_empty_in_matches_nothing() {
        let clause = WhereClause::in_condition("id", vec![]);
        assert_eq!(clause.to_sql(), "1=0");
    }
}
