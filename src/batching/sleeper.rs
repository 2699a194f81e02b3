use async_trait::async_trait;
use std::time::Duration;

/// Pause primitive used between sub-batches
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real wall-clock pause on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Convert a millisecond pause into a duration
pub fn pause_duration(pause_ms: u64) -> Duration {
    Duration::from_millis(pause_ms)
}
