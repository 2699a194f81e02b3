use crate::batching::Sleeper;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;

/// Sleeper that records requested pauses instead of waiting
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    pauses: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pauses requested
    pub fn calls(&self) -> usize {
        self.pauses.lock().len()
    }

    /// Sum of every requested pause
    pub fn total(&self) -> Duration {
        self.pauses.lock().iter().sum()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.pauses.lock().push(duration);
    }
}
