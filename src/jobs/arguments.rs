use crate::error::{MigrationError, MigrationResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Number of positional batching fields ahead of the job arguments in the
/// queue form of a descriptor
pub const BATCHING_FIELD_COUNT: usize = 6;

/// The unit dispatched through the queue: which rows to touch and how to
/// pace the work.
///
/// The queue form is the positional array
/// `[start_id, end_id, batch_table, batch_column, sub_batch_size, pause_ms, *job_arguments]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchingDescriptor {
    pub start_id: i64,
    pub end_id: i64,
    pub batch_table: String,
    pub batch_column: String,
    pub sub_batch_size: u64,
    pub pause_ms: u64,
    pub job_arguments: Vec<Value>,
    /// Label timeouts inside a sub-batch are re-raised under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_batch_exception: Option<String>,
}

impl BatchingDescriptor {
    pub fn new(
        start_id: i64,
        end_id: i64,
        batch_table: impl Into<String>,
        batch_column: impl Into<String>,
        sub_batch_size: u64,
        pause_ms: u64,
    ) -> Self {
        Self {
            start_id,
            end_id,
            batch_table: batch_table.into(),
            batch_column: batch_column.into(),
            sub_batch_size,
            pause_ms,
            job_arguments: Vec::new(),
            sub_batch_exception: None,
        }
    }

    pub fn with_job_arguments(mut self, job_arguments: Vec<Value>) -> Self {
        self.job_arguments = job_arguments;
        self
    }

    pub fn with_sub_batch_exception(mut self, label: impl Into<String>) -> Self {
        self.sub_batch_exception = Some(label.into());
        self
    }

    /// Parse the positional queue form for the migration named `job`
    pub fn from_queue_args(job: &str, args: &[Value]) -> MigrationResult<Self> {
        if args.len() < BATCHING_FIELD_COUNT {
            return Err(MigrationError::invalid_arguments(
                job,
                format!(
                    "expected at least {BATCHING_FIELD_COUNT} batching arguments, given {}",
                    args.len()
                ),
            ));
        }

        let integer = |index: usize, field: &str| {
            args[index].as_i64().ok_or_else(|| {
                MigrationError::invalid_arguments(
                    job,
                    format!("{field} must be an integer, got {}", args[index]),
                )
            })
        };
        let unsigned = |index: usize, field: &str| {
            args[index].as_u64().ok_or_else(|| {
                MigrationError::invalid_arguments(
                    job,
                    format!("{field} must be a non-negative integer, got {}", args[index]),
                )
            })
        };
        let string = |index: usize, field: &str| {
            args[index]
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| {
                    MigrationError::invalid_arguments(
                        job,
                        format!("{field} must be a string, got {}", args[index]),
                    )
                })
        };

        Ok(Self {
            start_id: integer(0, "start_id")?,
            end_id: integer(1, "end_id")?,
            batch_table: string(2, "batch_table")?,
            batch_column: string(3, "batch_column")?,
            sub_batch_size: unsigned(4, "sub_batch_size")?,
            pause_ms: unsigned(5, "pause_ms")?,
            job_arguments: args[BATCHING_FIELD_COUNT..].to_vec(),
            sub_batch_exception: None,
        })
    }

    pub fn to_queue_args(&self) -> Vec<Value> {
        let mut args = vec![
            Value::from(self.start_id),
            Value::from(self.end_id),
            Value::from(self.batch_table.clone()),
            Value::from(self.batch_column.clone()),
            Value::from(self.sub_batch_size),
            Value::from(self.pause_ms),
        ];
        args.extend(self.job_arguments.iter().cloned());
        args
    }
}

/// Positional job arguments with the names the migration declared for them
#[derive(Debug, Clone, PartialEq)]
pub struct JobArguments {
    job: String,
    names: Vec<String>,
    values: Vec<Value>,
}

impl JobArguments {
    /// Pair `values` with `names`; the counts must agree
    pub fn new(job: &str, names: &[String], values: Vec<Value>) -> MigrationResult<Self> {
        if names.len() != values.len() {
            return Err(MigrationError::ArgumentCountMismatch {
                job: job.to_string(),
                expected: names.len(),
                actual: values.len(),
            });
        }

        Ok(Self {
            job: job.to_string(),
            names: names.to_vec(),
            values,
        })
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names
            .iter()
            .position(|candidate| candidate == name)
            .map(|index| &self.values[index])
    }

    pub fn get_str(&self, name: &str) -> MigrationResult<&str> {
        self.required(name)?
            .as_str()
            .ok_or_else(|| self.wrong_type(name, "a string"))
    }

    pub fn get_i64(&self, name: &str) -> MigrationResult<i64> {
        self.required(name)?
            .as_i64()
            .ok_or_else(|| self.wrong_type(name, "an integer"))
    }

    pub fn get_bool(&self, name: &str) -> MigrationResult<bool> {
        self.required(name)?
            .as_bool()
            .ok_or_else(|| self.wrong_type(name, "a boolean"))
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn required(&self, name: &str) -> MigrationResult<&Value> {
        self.get(name).ok_or_else(|| {
            MigrationError::invalid_arguments(&self.job, format!("unknown job argument `{name}`"))
        })
    }

    fn wrong_type(&self, name: &str, expected: &str) -> MigrationError {
        MigrationError::invalid_arguments(
            &self.job,
            format!("job argument `{name}` must be {expected}"),
        )
    }
}
