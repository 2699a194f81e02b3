//! # Migration Error Types
//!
//! Structured error handling for the batching core, job definitions and the
//! queue coordinator using thiserror instead of `Box<dyn Error>` patterns.

use crate::config::ConfigurationError;
use crate::queue::QueueError;
use thiserror::Error;

/// PostgreSQL SQLSTATE raised when a statement is cancelled by `statement_timeout`
const QUERY_CANCELED_SQLSTATE: &str = "57014";

/// Error type shared by every migration operation
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Wrong number of job arguments for {job}: expected {expected}, given {actual}")]
    ArgumentCountMismatch {
        job: String,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid job arguments for {job}: {message}")]
    InvalidArguments { job: String, message: String },

    #[error("{job} must implement perform")]
    NotImplemented { job: String },

    #[error("Unknown background migration: {class_name}")]
    UnknownMigration { class_name: String },

    #[error("Unknown tracking database: {name} (must be one of [{allowed}])")]
    UnknownTrackingDatabase { name: String, allowed: String },

    #[error("Statement timeout: {message}")]
    StatementTimeout { message: String },

    #[error("Database error: {operation}: {message}")]
    Database { operation: String, message: String },

    #[error("{exception}: {source}")]
    SubBatch {
        exception: String,
        #[source]
        source: Box<MigrationError>,
    },

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Config(#[from] ConfigurationError),

    #[error(transparent)]
    Transform(#[from] anyhow::Error),
}

impl MigrationError {
    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Raised when a job uses sub-batching without declaring its operation name
    pub fn missing_operation_name(job: &str) -> Self {
        Self::configuration(
            job,
            "Operation name is required, please define it with `operation_name`",
        )
    }

    /// Raised when distinct batching is requested on a job that declares `scope_to`
    pub fn distinct_with_scope(job: &str) -> Self {
        Self::configuration(
            job,
            "distinct_each_batch can not be used when scope_to is defined",
        )
    }

    /// Create an invalid arguments error
    pub fn invalid_arguments(job: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidArguments {
            job: job.into(),
            message: message.into(),
        }
    }

    /// Create a not implemented error for a job without a `perform` body
    pub fn not_implemented(job: impl Into<String>) -> Self {
        Self::NotImplemented { job: job.into() }
    }

    /// Create a database error
    pub fn database(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Database {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a statement timeout error
    pub fn statement_timeout(message: impl Into<String>) -> Self {
        Self::StatementTimeout {
            message: message.into(),
        }
    }

    /// Whether this error (or the error it wraps) is a statement timeout
    pub fn is_statement_timeout(&self) -> bool {
        match self {
            Self::StatementTimeout { .. } => true,
            Self::SubBatch { source, .. } => source.is_statement_timeout(),
            _ => false,
        }
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err)
                if db_err.code().as_deref() == Some(QUERY_CANCELED_SQLSTATE) =>
            {
                MigrationError::statement_timeout(db_err.message().to_string())
            }
            sqlx::Error::Database(db_err) => MigrationError::database("query", db_err.to_string()),
            sqlx::Error::RowNotFound => MigrationError::database("query", "No rows found"),
            sqlx::Error::PoolTimedOut => {
                MigrationError::database("pool", "Timed out acquiring a connection")
            }
            _ => MigrationError::database("connection", err.to_string()),
        }
    }
}

/// Result type alias for migration operations
pub type MigrationResult<T> = std::result::Result<T, MigrationError>;
