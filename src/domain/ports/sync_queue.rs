use crate::domain::entities::{QueueStats, QueuedTask, RecoveryReport, RetryPolicy};
use crate::domain::errors::DomainResult;
use async_trait::async_trait;
use std::time::Duration;

/// Durable multi-queue storage, one namespace per service.
///
/// Every task lives in exactly one of pending, delayed, processing or failed.
/// All moves between them are atomic with respect to concurrent callers.
#[async_trait]
pub trait SyncQueueStore: Send + Sync {
    /// Append a task to the tail of the service's pending queue.
    async fn enqueue(&self, service: &str, task: &QueuedTask) -> DomainResult<()>;

    /// Move the head of pending into processing with a fresh lease, in one
    /// indivisible step. Due delayed tasks are promoted first, at most once
    /// per promotion interval per service.
    async fn dequeue(&self, service: &str) -> DomainResult<Option<QueuedTask>>;

    /// Promote due delayed tasks into pending, bounded by the batch size.
    /// Unlike `dequeue`, this always runs.
    async fn promote_due_tasks(&self, service: &str) -> DomainResult<u64>;

    /// Increment the attempt count, set `scheduled_for = now + delay` and park
    /// the task in the delayed queue. Returns the stored form.
    ///
    /// This and the other lease transitions only act while the task still
    /// holds the lease it was dequeued with; otherwise they log and do nothing.
    async fn schedule_retry(
        &self,
        service: &str,
        task: &QueuedTask,
        delay: Duration,
    ) -> DomainResult<QueuedTask>;

    /// Record the error and park the task in the failed queue.
    async fn move_to_failed(&self, service: &str, task: &QueuedTask, error: &str) -> DomainResult<()>;

    /// Drop the task's processing lease, keyed by task id.
    async fn remove_from_processing(
        &self,
        service: &str,
        task: &QueuedTask,
        credit_success: bool,
    ) -> DomainResult<()>;

    async fn get_stats(&self, service: &str) -> DomainResult<QueueStats>;

    /// Move every failed task back to pending. Returns how many moved.
    async fn retry_failed_tasks(&self, service: &str) -> DomainResult<u64>;

    /// Delete all four queues of a service. Lifetime counters are kept.
    async fn clear_queue(&self, service: &str) -> DomainResult<u64>;

    /// Reclaim processing entries whose lease expired, rescheduling or
    /// failing them per `policy`. Backend timeouts are logged, not returned.
    async fn recover_expired_tasks(
        &self,
        service: &str,
        policy: &RetryPolicy,
    ) -> DomainResult<RecoveryReport>;
}
