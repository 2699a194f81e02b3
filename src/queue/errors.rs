//! # Queue Error Types
//!
//! Structured error handling for the queue backends using thiserror.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Job not found: {jid}")]
    JobNotFound { jid: String },

    #[error("Unknown queue shard: {shard}")]
    UnknownShard { shard: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Network timeout: operation {operation} timed out")]
    Timeout { operation: String },
}

impl QueueError {
    pub fn database_connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn job_not_found(jid: impl Into<String>) -> Self {
        Self::JobNotFound { jid: jid.into() }
    }

    pub fn unknown_shard(shard: impl Into<String>) -> Self {
        Self::UnknownShard {
            shard: shard.into(),
        }
    }
}

impl From<sqlx::Error> for QueueError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => QueueError::database_query("query", "No rows found"),
            sqlx::Error::Database(db_err) => QueueError::database_query("database", db_err.to_string()),
            sqlx::Error::PoolTimedOut => QueueError::Timeout {
                operation: "database_pool".to_string(),
            },
            _ => QueueError::database_connection(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_syntax() || err.is_data() || err.is_eof() {
            QueueError::MessageDeserialization {
                message: err.to_string(),
            }
        } else {
            QueueError::MessageSerialization {
                message: err.to_string(),
            }
        }
    }
}

pub type QueueResult<T> = std::result::Result<T, QueueError>;
