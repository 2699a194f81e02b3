//! # Job Registry
//!
//! Name-keyed factories for every migration the process can run. Jobs pulled
//! off the queue carry only a class name and positional arguments; the
//! registry turns those into a runnable [`MigrationJob`] or rejects the name
//! with a typed error.

use super::arguments::BatchingDescriptor;
use super::batched_job::{BatchedMigrationJob, MigrationJob, Transform, TransformMigration};
use super::spec::JobSpec;
use crate::batching::{Sleeper, TokioSleeper};
use crate::database::Connection;
use crate::error::{MigrationError, MigrationResult};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Builds the runnable job around a validated [`BatchedMigrationJob`]
pub type JobFactory =
    Arc<dyn Fn(BatchedMigrationJob) -> MigrationResult<Box<dyn MigrationJob>> + Send + Sync>;

#[derive(Clone)]
struct RegisteredJob {
    spec: Arc<JobSpec>,
    factory: JobFactory,
}

/// Registry statistics
#[derive(Debug, Clone)]
pub struct RegistryStats {
    pub total_jobs: usize,
    pub names: Vec<String>,
}

pub struct JobRegistry {
    jobs: DashMap<String, RegisteredJob>,
    sleeper: Arc<dyn Sleeper>,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("jobs", &self.names())
            .finish()
    }
}

impl JobRegistry {
    pub fn new() -> Self {
        Self {
            jobs: DashMap::new(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Pause primitive handed to every job this registry builds
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Register a migration under its spec name. Registering the same name
    /// twice is a configuration error.
    pub fn register<F>(&self, spec: JobSpec, factory: F) -> MigrationResult<()>
    where
        F: Fn(BatchedMigrationJob) -> MigrationResult<Box<dyn MigrationJob>>
            + Send
            + Sync
            + 'static,
    {
        let name = spec.name().to_string();
        match self.jobs.entry(name.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => Err(MigrationError::configuration(
                "JobRegistry",
                format!("{name} is already registered"),
            )),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(RegisteredJob {
                    spec: Arc::new(spec),
                    factory: Arc::new(factory),
                });
                info!(job_class = %name, "📝 Registered background migration");
                Ok(())
            }
        }
    }

    /// Register a closure-based migration driven by `each_sub_batch`
    pub fn register_transform(&self, spec: JobSpec, transform: Transform) -> MigrationResult<()> {
        self.register(spec, move |job| {
            Ok(Box::new(TransformMigration::new(job, transform.clone())) as Box<dyn MigrationJob>)
        })
    }

    /// Register a closure-based migration driven by `distinct_each_batch`
    pub fn register_distinct_transform(
        &self,
        spec: JobSpec,
        transform: Transform,
    ) -> MigrationResult<()> {
        self.register(spec, move |job| {
            Ok(Box::new(TransformMigration::new(job, transform.clone()).distinct())
                as Box<dyn MigrationJob>)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.jobs.contains_key(name)
    }

    pub fn spec(&self, name: &str) -> Option<Arc<JobSpec>> {
        self.jobs.get(name).map(|entry| entry.spec.clone())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn stats(&self) -> RegistryStats {
        let names = self.names();
        RegistryStats {
            total_jobs: names.len(),
            names,
        }
    }

    /// Build the job `name` from its positional queue arguments
    pub fn instantiate(
        &self,
        name: &str,
        args: &[Value],
        connection: Arc<dyn Connection>,
    ) -> MigrationResult<Box<dyn MigrationJob>> {
        let registered = self.lookup(name)?;
        let descriptor = BatchingDescriptor::from_queue_args(name, args)?;

        debug!(
            job_class = %name,
            start_id = descriptor.start_id,
            end_id = descriptor.end_id,
            database = connection.database_name(),
            "Instantiating background migration"
        );

        let job = BatchedMigrationJob::new(descriptor, registered.spec, connection)?
            .with_sleeper(self.sleeper.clone());
        (registered.factory)(job)
    }

    /// Build a generic (zero-range) instance of every registered migration
    /// and report the ones whose definition is inconsistent. Run once at
    /// startup.
    pub fn validate(&self, connection: Arc<dyn Connection>) -> MigrationResult<usize> {
        let mut failures = Vec::new();
        let names = self.names();

        for name in &names {
            let registered = self.lookup(name)?;
            let arguments = vec![Value::Null; registered.spec.arity()];
            let result = BatchedMigrationJob::generic(
                "",
                "id",
                arguments,
                registered.spec.clone(),
                connection.clone(),
            )
            .and_then(|job| (registered.factory)(job))
            .and_then(|job| {
                if job.job_name() == name {
                    Ok(())
                } else {
                    Err(MigrationError::configuration(
                        name.as_str(),
                        format!("factory builds {} instead", job.job_name()),
                    ))
                }
            });

            if let Err(err) = result {
                warn!(job_class = %name, error = %err, "Inconsistent background migration");
                failures.push(format!("{name}: {err}"));
            }
        }

        if failures.is_empty() {
            Ok(names.len())
        } else {
            Err(MigrationError::configuration(
                "JobRegistry",
                failures.join("; "),
            ))
        }
    }

    fn lookup(&self, name: &str) -> MigrationResult<RegisteredJob> {
        self.jobs
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MigrationError::UnknownMigration {
                class_name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batching::OperationName;
    use crate::jobs::batched_job::transform;
    use crate::test_helpers::InMemoryDatabase;
    use serde_json::json;

    fn noop_spec(name: &str) -> JobSpec {
        JobSpec::builder(name)
            .job_arguments(["column"])
            .operation_name(OperationName::UpdateAll)
            .build()
            .unwrap()
    }

    fn noop() -> Transform {
        transform(|_sub_batch, _arguments| async { Ok(0) })
    }

    #[test]
    fn test_unknown_name_is_typed_error() {
        let registry = JobRegistry::new();
        let db = Arc::new(InMemoryDatabase::new("main"));
        let err = registry.instantiate("Missing", &[], db).err().expect("expected an error");
        assert!(matches!(err, MigrationError::UnknownMigration { class_name } if class_name == "Missing"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let registry = JobRegistry::new();
        registry.register_transform(noop_spec("Backfill"), noop()).unwrap();
        assert!(registry.register_transform(noop_spec("Backfill"), noop()).is_err());
        assert_eq!(registry.stats().total_jobs, 1);
    }

    #[test]
    fn test_instantiate_from_queue_args() {
        let registry = JobRegistry::new();
        registry.register_transform(noop_spec("Backfill"), noop()).unwrap();
        let db = Arc::new(InMemoryDatabase::new("main"));

        let args = [json!(1), json!(10), json!("users"), json!("id"), json!(5), json!(0), json!("name")];
        let job = registry.instantiate("Backfill", &args, db.clone()).unwrap();
        assert_eq!(job.job_name(), "Backfill");

        let short = [json!(1), json!(10), json!("users"), json!("id"), json!(5), json!(0)];
        assert!(matches!(
            registry.instantiate("Backfill", &short, db),
            Err(MigrationError::ArgumentCountMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_reports_mismatched_factories() {
        let registry = JobRegistry::new();
        let db: Arc<dyn Connection> = Arc::new(InMemoryDatabase::new("main"));
        registry.register_transform(noop_spec("Backfill"), noop()).unwrap();
        assert_eq!(registry.validate(db.clone()).unwrap(), 1);

        let other = Arc::new(noop_spec("Other"));
        registry
            .register(noop_spec("Misnamed"), move |job| {
                let renamed = BatchedMigrationJob::generic(
                    job.batch_table(),
                    job.batch_column(),
                    job.job_arguments().values().to_vec(),
                    other.clone(),
                    job.connection().clone(),
                )?;
                Ok(Box::new(renamed) as Box<dyn MigrationJob>)
            })
            .unwrap();

        let err = registry.validate(db).unwrap_err();
        assert!(err.to_string().contains("Misnamed"));
    }
}
