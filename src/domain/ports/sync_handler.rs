use crate::domain::entities::{QueuedTask, RetryPolicy, SyncResult};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Service specific strategy that performs the external side effect of a task.
///
/// Expected failures come back as `SyncResult` values, never as panics. Each
/// implementation documents the actions it accepts.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    /// Queue namespace served by this handler, e.g. `"telegram"`.
    fn service_name(&self) -> &str;

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
    }

    fn max_retry_attempts(&self) -> u32 {
        self.retry_policy().max_attempts
    }

    /// Backoff before the given 1-based attempt.
    fn calculate_retry_delay(&self, attempt: u32) -> Duration {
        self.retry_policy().delay_for(attempt)
    }

    async fn process(&self, task: &QueuedTask, cancel: CancellationToken) -> SyncResult;
}
