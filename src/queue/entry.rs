use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::errors::QueueError;

/// The four places a queued job can live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobSet {
    /// Waiting for a future run time
    Scheduled,
    /// Ready for a worker
    Enqueued,
    /// Failed and backing off before another attempt
    Retry,
    /// Exhausted its retries
    Dead,
}

impl JobSet {
    /// Drain priority used when stealing
    pub const ALL: [JobSet; 4] = [
        JobSet::Scheduled,
        JobSet::Enqueued,
        JobSet::Retry,
        JobSet::Dead,
    ];

    /// Sets a normal worker will still pick up
    pub const LIVE: [JobSet; 2] = [JobSet::Scheduled, JobSet::Enqueued];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobSet::Scheduled => "scheduled",
            JobSet::Enqueued => "enqueued",
            JobSet::Retry => "retry",
            JobSet::Dead => "dead",
        }
    }
}

impl fmt::Display for JobSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobSet {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scheduled" => Ok(JobSet::Scheduled),
            "enqueued" => Ok(JobSet::Enqueued),
            "retry" => Ok(JobSet::Retry),
            "dead" => Ok(JobSet::Dead),
            other => Err(QueueError::MessageDeserialization {
                message: format!("unknown job set `{other}`"),
            }),
        }
    }
}

/// A job waiting in one of the queue's sets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub jid: String,
    pub job_set: JobSet,
    pub queue: String,
    /// Worker class that consumes the entry
    pub worker_class: String,
    /// Migration the worker runs
    pub class_name: String,
    pub args: Vec<Value>,
    pub enqueued_at: DateTime<Utc>,
    /// Run time for scheduled entries, next attempt for retries
    pub at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub error_message: Option<String>,
}

/// A job about to be pushed
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub queue: String,
    pub worker_class: String,
    pub class_name: String,
    pub args: Vec<Value>,
    pub at: Option<DateTime<Utc>>,
}

impl NewJob {
    pub fn new(
        queue: impl Into<String>,
        worker_class: impl Into<String>,
        class_name: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self {
            queue: queue.into(),
            worker_class: worker_class.into(),
            class_name: class_name.into(),
            args,
            at: None,
        }
    }

    /// Run no earlier than `at`
    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = Some(at);
        self
    }

    /// Set the job lands in when pushed at `now`
    pub fn target_set(&self, now: DateTime<Utc>) -> JobSet {
        match self.at {
            Some(at) if at > now => JobSet::Scheduled,
            _ => JobSet::Enqueued,
        }
    }

    /// Materialize the entry with a fresh jid
    pub fn into_entry(self, now: DateTime<Utc>) -> QueueEntry {
        let job_set = self.target_set(now);
        QueueEntry {
            jid: new_jid(),
            job_set,
            at: if job_set == JobSet::Scheduled { self.at } else { None },
            queue: self.queue,
            worker_class: self.worker_class,
            class_name: self.class_name,
            args: self.args,
            enqueued_at: now,
            retry_count: 0,
            error_message: None,
        }
    }
}

pub fn new_jid() -> String {
    Uuid::new_v4().simple().to_string()
}
