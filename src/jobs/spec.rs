use crate::batching::{OperationName, RelationFilter};
use crate::error::{MigrationError, MigrationResult};
use crate::query_builder::QueryBuilder;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Classification label with no control-flow effect
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureCategory(String);

impl FeatureCategory {
    pub fn new(category: impl Into<String>) -> Self {
        Self(category.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for FeatureCategory {
    fn default() -> Self {
        Self("database".to_string())
    }
}

impl fmt::Display for FeatureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declarative definition of one migration: what it is called, which
/// positional arguments it takes, which database verb it performs and which
/// rows it is allowed to touch.
///
/// Built once at registration time and shared by every job instance.
///
/// ```rust
/// use background_migrations::jobs::JobSpec;
/// use background_migrations::batching::OperationName;
///
/// let spec = JobSpec::builder("BackfillIssueSearchData")
///     .job_arguments(["search_column"])
///     .operation_name(OperationName::UpdateAll)
///     .scope_to(|relation| relation.where_null("search_vector"))
///     .build()
///     .unwrap();
///
/// assert_eq!(spec.arity(), 1);
/// assert_eq!(spec.feature_category().as_str(), "database");
/// ```
#[derive(Debug, Clone)]
pub struct JobSpec {
    name: String,
    job_arguments: Vec<String>,
    operation_name: Option<OperationName>,
    scope_to: Option<RelationFilter>,
    feature_category: FeatureCategory,
    sub_batch_exception: Option<String>,
}

impl JobSpec {
    pub fn builder(name: impl Into<String>) -> JobSpecBuilder {
        JobSpecBuilder {
            name: name.into(),
            job_arguments: Vec::new(),
            operation_name: None,
            scope_to: None,
            feature_category: None,
            sub_batch_exception: None,
        }
    }

    /// Name jobs are enqueued and resolved under
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn job_arguments(&self) -> &[String] {
        &self.job_arguments
    }

    /// Number of positional job arguments the migration declares
    pub fn arity(&self) -> usize {
        self.job_arguments.len()
    }

    pub fn operation_name(&self) -> Option<&OperationName> {
        self.operation_name.as_ref()
    }

    /// The declared operation name, or the error every sub-batching helper raises without one
    pub fn require_operation_name(&self) -> MigrationResult<&OperationName> {
        self.operation_name
            .as_ref()
            .ok_or_else(|| MigrationError::missing_operation_name(&self.name))
    }

    pub fn scope_to(&self) -> Option<&RelationFilter> {
        self.scope_to.as_ref()
    }

    pub fn feature_category(&self) -> &FeatureCategory {
        &self.feature_category
    }

    /// Default label for statement timeouts raised inside a sub-batch
    pub fn sub_batch_exception(&self) -> Option<&str> {
        self.sub_batch_exception.as_deref()
    }
}

pub struct JobSpecBuilder {
    name: String,
    job_arguments: Vec<String>,
    operation_name: Option<OperationName>,
    scope_to: Option<RelationFilter>,
    feature_category: Option<FeatureCategory>,
    sub_batch_exception: Option<String>,
}

impl JobSpecBuilder {
    /// Names of the positional job arguments, in queue order
    pub fn job_arguments<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.job_arguments = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn operation_name(mut self, name: impl Into<OperationName>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Extra predicate ANDed onto every batch this migration touches
    pub fn scope_to<F>(mut self, filter: F) -> Self
    where
        F: Fn(QueryBuilder) -> QueryBuilder + Send + Sync + 'static,
    {
        self.scope_to = Some(RelationFilter::new(filter));
        self
    }

    pub fn feature_category(mut self, category: impl Into<String>) -> Self {
        self.feature_category = Some(FeatureCategory::new(category));
        self
    }

    pub fn sub_batch_exception(mut self, label: impl Into<String>) -> Self {
        self.sub_batch_exception = Some(label.into());
        self
    }

    pub fn build(self) -> MigrationResult<JobSpec> {
        if self.name.trim().is_empty() {
            return Err(MigrationError::configuration(
                "JobSpec",
                "migration name must not be empty",
            ));
        }

        let mut seen = HashSet::new();
        for argument in &self.job_arguments {
            if argument.is_empty() {
                return Err(MigrationError::configuration(
                    &self.name,
                    "job argument names must not be empty",
                ));
            }
            if !seen.insert(argument.as_str()) {
                return Err(MigrationError::configuration(
                    &self.name,
                    format!("job argument `{argument}` is declared more than once"),
                ));
            }
        }

        Ok(JobSpec {
            name: self.name,
            job_arguments: self.job_arguments,
            operation_name: self.operation_name,
            scope_to: self.scope_to,
            feature_category: self.feature_category.unwrap_or_default(),
            sub_batch_exception: self.sub_batch_exception,
        })
    }
}
