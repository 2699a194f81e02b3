use super::tracking_database::WorkerClass;
use crate::queue::{QueueBackend, QueueError, QueueResult};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Finds the queue shard a worker's jobs live on
pub trait ShardResolver: Send + Sync + fmt::Debug {
    fn resolve(&self, worker: &WorkerClass) -> QueueResult<Arc<dyn QueueBackend>>;
}

/// Resolver over a fixed map of shard name to backend
#[derive(Debug, Default)]
pub struct StaticShardResolver {
    shards: HashMap<String, Arc<dyn QueueBackend>>,
    resolutions: AtomicUsize,
}

impl StaticShardResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `backend` under its own name
    pub fn with_shard(mut self, backend: Arc<dyn QueueBackend>) -> Self {
        self.shards.insert(backend.name().to_string(), backend);
        self
    }

    /// Number of times a shard was resolved
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }
}

impl ShardResolver for StaticShardResolver {
    fn resolve(&self, worker: &WorkerClass) -> QueueResult<Arc<dyn QueueBackend>> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        self.shards
            .get(&worker.queue_shard)
            .cloned()
            .ok_or_else(|| QueueError::unknown_shard(&worker.queue_shard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryQueue;

    #[test]
    fn test_resolves_by_queue_shard() {
        let resolver = StaticShardResolver::new()
            .with_shard(Arc::new(MemoryQueue::new("default")))
            .with_shard(Arc::new(MemoryQueue::new("ci_shard")));

        let worker = WorkerClass::new("CiWorker", "background_migration_ci", "ci_shard");
        assert_eq!(resolver.resolve(&worker).unwrap().name(), "ci_shard");

        let missing = WorkerClass::new("GeoWorker", "geo", "geo_shard");
        assert!(matches!(
            resolver.resolve(&missing),
            Err(QueueError::UnknownShard { .. })
        ));
        assert_eq!(resolver.resolutions(), 2);
    }
}
