use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{metadata_keys, QueueStats, QueuedTask, RecoveryReport, RetryPolicy};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::sync_queue::SyncQueueStore;
use crate::domain::ports::time_service::TimeService;
use crate::infrastructure::persistence::Database;

// Lease transitions apply only while the task still holds the lease it was
// dequeued with: same id, still processing, attempt count unchanged. A task
// cleared or reclaimed by recovery in the meantime is left alone.
const LEASE_GUARD: &str = "id = ? AND service = ? AND state = 'processing'
     AND json_extract(body, '$.attempt_count') = ?";

const CREDIT_PROCESSED: &str = "INSERT INTO sync_queue_counters (service, total_processed, total_failed, last_processed_at)
     VALUES (?, 1, 0, ?)
     ON CONFLICT(service) DO UPDATE SET
         total_processed = total_processed + 1,
         last_processed_at = excluded.last_processed_at";

const CREDIT_FAILED: &str = "INSERT INTO sync_queue_counters (service, total_processed, total_failed, last_failed_at)
     VALUES (?, 0, 1, ?)
     ON CONFLICT(service) DO UPDATE SET
         total_failed = total_failed + 1,
         last_failed_at = excluded.last_failed_at";

/// Tuning knobs of the queue store.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Lease granted to a dequeued task before recovery may reclaim it.
    pub visibility_timeout: Duration,
    /// Minimum spacing between opportunistic promotion scans per service.
    pub promotion_interval: Duration,
    /// Most delayed tasks moved by one promotion pass.
    pub promotion_batch_size: u32,
    /// Most expired leases handled by one recovery pass.
    pub recovery_batch_size: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(300),
            promotion_interval: Duration::from_secs(30),
            promotion_batch_size: 100,
            recovery_batch_size: 100,
        }
    }
}

/// Per-service last-run stamps for the delayed task promotion scan, so a
/// burst of dequeue calls scans the delayed set once per interval.
struct PromotionThrottle {
    interval: Duration,
    last_run: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl PromotionThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: Mutex::new(HashMap::new()),
        }
    }

    /// Claims the scan slot for `service` if the interval has elapsed.
    fn try_acquire(&self, service: &str, now: DateTime<Utc>) -> bool {
        let mut last_run = match self.last_run.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let interval_ms = duration_ms(self.interval);
        match last_run.get(service) {
            Some(previous) if to_millis(now).saturating_sub(to_millis(*previous)) < interval_ms => false,
            _ => {
                last_run.insert(service.to_string(), now);
                true
            }
        }
    }
}

/// SQLite implementation of the SyncQueueStore.
///
/// All four queues share the `sync_tasks` table; the `state` column names the
/// queue a task is in, so a task can never sit in two queues at once. Each
/// transition is a single conditional statement or one transaction.
#[derive(Clone)]
pub struct SqliteSyncQueueStore {
    db: Database,
    config: QueueConfig,
    clock: Arc<dyn TimeService>,
    throttle: Arc<PromotionThrottle>,
}

impl SqliteSyncQueueStore {
    pub fn new(db: Database, config: QueueConfig, clock: Arc<dyn TimeService>) -> Self {
        let throttle = Arc::new(PromotionThrottle::new(config.promotion_interval));
        Self {
            db,
            config,
            clock,
            throttle,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn park_unreadable(&self, service: &str, id: &str, now_ms: i64) -> DomainResult<()> {
        let mut tx = self.db.pool().begin().await?;
        sqlx::query(
            "UPDATE sync_tasks
             SET state = 'failed', lease_expires_at = NULL, due_at = NULL, queued_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(CREDIT_FAILED)
            .bind(service)
            .bind(now_ms)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn recover_batch(
        &self,
        service: &str,
        policy: &RetryPolicy,
        report: &mut RecoveryReport,
    ) -> DomainResult<()> {
        let now = self.clock.now();
        let now_ms = to_millis(now);

        let rows = sqlx::query(
            "SELECT seq, body FROM sync_tasks
             WHERE service = ? AND state = 'processing' AND lease_expires_at <= ?
             ORDER BY lease_expires_at ASC
             LIMIT ?",
        )
        .bind(service)
        .bind(now_ms)
        .bind(i64::from(self.config.recovery_batch_size))
        .fetch_all(self.db.pool())
        .await?;

        for row in rows {
            let seq: i64 = row.try_get("seq")?;
            let body: String = row.try_get("body")?;

            let mut task = match QueuedTask::from_json(&body) {
                Ok(task) => task,
                Err(e) => {
                    warn!(service, seq, error = %e, "Discarding unreadable processing entry");
                    let deleted = sqlx::query("DELETE FROM sync_tasks WHERE seq = ? AND state = 'processing'")
                        .bind(seq)
                        .execute(self.db.pool())
                        .await?
                        .rows_affected();
                    report.discarded += deleted;
                    continue;
                }
            };

            task.metadata.insert(
                metadata_keys::LAST_ERROR.to_string(),
                "processing lease expired".to_string(),
            );
            task.metadata
                .insert(metadata_keys::RECOVERED_AT.to_string(), now.to_rfc3339());

            if policy.is_exhausted(task.attempt_count) {
                task.metadata
                    .insert(metadata_keys::FAILED_AT.to_string(), now.to_rfc3339());
                let body = task.to_json()?;

                let mut tx = self.db.pool().begin().await?;
                let moved = sqlx::query(
                    "UPDATE sync_tasks
                     SET state = 'failed', queued_at = ?, due_at = NULL, lease_expires_at = NULL, body = ?, updated_at = ?
                     WHERE seq = ? AND state = 'processing' AND lease_expires_at <= ?",
                )
                .bind(now_ms)
                .bind(&body)
                .bind(now_ms)
                .bind(seq)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?
                .rows_affected();
                if moved == 1 {
                    sqlx::query(CREDIT_FAILED)
                        .bind(service)
                        .bind(now_ms)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;

                if moved == 1 {
                    warn!(service, task_id = %task.id, attempts = task.attempt_count, "Expired task exhausted its retries");
                    report.failed += 1;
                }
            } else {
                task.attempt_count = task.attempt_count.saturating_add(1);
                let due_ms = now_ms.saturating_add(duration_ms(policy.delay_for(task.attempt_count)));
                task.scheduled_for = from_millis(due_ms);
                let body = task.to_json()?;

                let moved = sqlx::query(
                    "UPDATE sync_tasks
                     SET state = 'delayed', due_at = ?, lease_expires_at = NULL, body = ?, updated_at = ?
                     WHERE seq = ? AND state = 'processing' AND lease_expires_at <= ?",
                )
                .bind(due_ms)
                .bind(&body)
                .bind(now_ms)
                .bind(seq)
                .bind(now_ms)
                .execute(self.db.pool())
                .await?
                .rows_affected();

                if moved == 1 {
                    info!(service, task_id = %task.id, attempt = task.attempt_count, "Rescheduled task with expired lease");
                    report.retried += 1;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl SyncQueueStore for SqliteSyncQueueStore {
    async fn enqueue(&self, service: &str, task: &QueuedTask) -> DomainResult<()> {
        let now_ms = to_millis(self.clock.now());
        let body = task.to_json()?;

        sqlx::query(
            "INSERT INTO sync_tasks (id, service, state, queued_at, due_at, lease_expires_at, body, updated_at)
             VALUES (?, ?, 'pending', ?, NULL, NULL, ?, ?)",
        )
        .bind(&task.id)
        .bind(service)
        .bind(now_ms)
        .bind(&body)
        .bind(now_ms)
        .execute(self.db.pool())
        .await
        .map_err(|e| map_insert_error(e, &task.id))?;

        metrics::counter!("sync_tasks_enqueued_total", "service" => service.to_string()).increment(1);
        debug!(service, task_id = %task.id, action = %task.action, "Enqueued sync task");
        Ok(())
    }

    async fn dequeue(&self, service: &str) -> DomainResult<Option<QueuedTask>> {
        let now = self.clock.now();
        if self.throttle.try_acquire(service, now) {
            if let Err(e) = self.promote_due_tasks(service).await {
                warn!(service, error = %e, "Delayed task promotion failed");
            }
        }

        let now_ms = to_millis(now);
        let lease_expires_at = now_ms.saturating_add(duration_ms(self.config.visibility_timeout));

        // Single statement: the row goes from pending to processing with its
        // lease in one step, so no reader ever sees it in neither queue.
        let row = sqlx::query(
            "UPDATE sync_tasks
             SET state = 'processing', lease_expires_at = ?, updated_at = ?
             WHERE seq = (
                 SELECT seq FROM sync_tasks
                 WHERE service = ? AND state = 'pending'
                 ORDER BY queued_at ASC, COALESCE(due_at, 0) ASC, seq ASC
                 LIMIT 1
             )
             AND state = 'pending'
             RETURNING id, body",
        )
        .bind(lease_expires_at)
        .bind(now_ms)
        .bind(service)
        .fetch_optional(self.db.pool())
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let body: String = row.try_get("body")?;

        match QueuedTask::from_json(&body) {
            Ok(task) => Ok(Some(task)),
            Err(e) => {
                error!(service, task_id = %id, error = %e, "Dequeued unreadable task, moving to failed");
                self.park_unreadable(service, &id, now_ms).await?;
                Err(e)
            }
        }
    }

    async fn promote_due_tasks(&self, service: &str) -> DomainResult<u64> {
        let now_ms = to_millis(self.clock.now());

        let promoted = sqlx::query(
            "UPDATE sync_tasks
             SET state = 'pending', queued_at = ?, updated_at = ?
             WHERE seq IN (
                 SELECT seq FROM sync_tasks
                 WHERE service = ? AND state = 'delayed' AND due_at <= ?
                 ORDER BY due_at ASC, seq ASC
                 LIMIT ?
             )
             AND state = 'delayed'",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(service)
        .bind(now_ms)
        .bind(i64::from(self.config.promotion_batch_size))
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if promoted > 0 {
            debug!(service, promoted, "Promoted due delayed tasks");
        }
        Ok(promoted)
    }

    async fn schedule_retry(
        &self,
        service: &str,
        task: &QueuedTask,
        delay: Duration,
    ) -> DomainResult<QueuedTask> {
        let now_ms = to_millis(self.clock.now());
        let due_ms = now_ms.saturating_add(duration_ms(delay));

        let mut delayed = task.clone();
        delayed.attempt_count = delayed.attempt_count.saturating_add(1);
        delayed.scheduled_for = from_millis(due_ms);
        let body = delayed.to_json()?;

        let sql = format!(
            "UPDATE sync_tasks
             SET state = 'delayed', queued_at = ?, due_at = ?, lease_expires_at = NULL, body = ?, updated_at = ?
             WHERE {}",
            LEASE_GUARD
        );
        let moved = sqlx::query(&sql)
            .bind(now_ms)
            .bind(due_ms)
            .bind(&body)
            .bind(now_ms)
            .bind(&task.id)
            .bind(service)
            .bind(i64::from(task.attempt_count))
            .execute(self.db.pool())
            .await?
            .rows_affected();

        if moved == 0 {
            warn!(service, task_id = %task.id, "Task lost its processing lease, retry not scheduled");
            return Ok(delayed);
        }

        metrics::counter!("sync_tasks_retried_total", "service" => service.to_string()).increment(1);
        Ok(delayed)
    }

    async fn move_to_failed(&self, service: &str, task: &QueuedTask, error: &str) -> DomainResult<()> {
        let now = self.clock.now();
        let now_ms = to_millis(now);

        let mut failed = task.clone();
        failed
            .metadata
            .insert(metadata_keys::LAST_ERROR.to_string(), error.to_string());
        failed
            .metadata
            .insert(metadata_keys::FAILED_AT.to_string(), now.to_rfc3339());
        let body = failed.to_json()?;

        let sql = format!(
            "UPDATE sync_tasks
             SET state = 'failed', queued_at = ?, due_at = NULL, lease_expires_at = NULL, body = ?, updated_at = ?
             WHERE {}",
            LEASE_GUARD
        );
        let mut tx = self.db.pool().begin().await?;
        let moved = sqlx::query(&sql)
            .bind(now_ms)
            .bind(&body)
            .bind(now_ms)
            .bind(&failed.id)
            .bind(service)
            .bind(i64::from(task.attempt_count))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if moved == 1 {
            sqlx::query(CREDIT_FAILED)
                .bind(service)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if moved == 0 {
            warn!(service, task_id = %task.id, "Task lost its processing lease, not moved to failed");
            return Ok(());
        }

        metrics::counter!("sync_tasks_failed_total", "service" => service.to_string()).increment(1);
        Ok(())
    }

    async fn remove_from_processing(
        &self,
        service: &str,
        task: &QueuedTask,
        credit_success: bool,
    ) -> DomainResult<()> {
        let now_ms = to_millis(self.clock.now());

        let mut tx = self.db.pool().begin().await?;
        let sql = format!("DELETE FROM sync_tasks WHERE {}", LEASE_GUARD);
        let removed = sqlx::query(&sql)
            .bind(&task.id)
            .bind(service)
            .bind(i64::from(task.attempt_count))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if credit_success {
            sqlx::query(CREDIT_PROCESSED)
                .bind(service)
                .bind(now_ms)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        if removed == 0 {
            warn!(service, task_id = %task.id, "No processing lease found for task");
        }
        if credit_success {
            metrics::counter!("sync_tasks_succeeded_total", "service" => service.to_string()).increment(1);
        }
        Ok(())
    }

    async fn get_stats(&self, service: &str) -> DomainResult<QueueStats> {
        let mut stats = QueueStats::empty(service);

        let rows = sqlx::query(
            "SELECT state, COUNT(*) AS total FROM sync_tasks WHERE service = ? GROUP BY state",
        )
        .bind(service)
        .fetch_all(self.db.pool())
        .await?;

        for row in rows {
            let state: String = row.try_get("state")?;
            let total: i64 = row.try_get("total")?;
            let total = u64::try_from(total).unwrap_or_default();
            match state.as_str() {
                "pending" => stats.pending = total,
                "delayed" => stats.delayed = total,
                "processing" => stats.processing = total,
                "failed" => stats.failed = total,
                other => warn!(service, state = other, "Unknown queue state in sync_tasks"),
            }
        }

        let counters = sqlx::query(
            "SELECT total_processed, total_failed,
                    COALESCE(last_processed_at, 0) AS last_processed_at,
                    COALESCE(last_failed_at, 0) AS last_failed_at
             FROM sync_queue_counters WHERE service = ?",
        )
        .bind(service)
        .fetch_optional(self.db.pool())
        .await?;

        if let Some(row) = counters {
            let total_processed: i64 = row.try_get("total_processed")?;
            let total_failed: i64 = row.try_get("total_failed")?;
            // The Any driver cannot decode NULL into Option, so 0 stands for "never"
            let last_processed_at: i64 = row.try_get("last_processed_at")?;
            let last_failed_at: i64 = row.try_get("last_failed_at")?;
            stats.total_processed = u64::try_from(total_processed).unwrap_or_default();
            stats.total_failed = u64::try_from(total_failed).unwrap_or_default();
            stats.last_processed_at = non_zero_millis(last_processed_at);
            stats.last_failed_at = non_zero_millis(last_failed_at);
        }

        Ok(stats)
    }

    async fn retry_failed_tasks(&self, service: &str) -> DomainResult<u64> {
        let now_ms = to_millis(self.clock.now());

        let moved = sqlx::query(
            "UPDATE sync_tasks
             SET state = 'pending', queued_at = ?, due_at = NULL, lease_expires_at = NULL, updated_at = ?
             WHERE service = ? AND state = 'failed'",
        )
        .bind(now_ms)
        .bind(now_ms)
        .bind(service)
        .execute(self.db.pool())
        .await?
        .rows_affected();

        info!(service, moved, "Moved failed tasks back to pending");
        Ok(moved)
    }

    async fn clear_queue(&self, service: &str) -> DomainResult<u64> {
        let deleted = sqlx::query("DELETE FROM sync_tasks WHERE service = ?")
            .bind(service)
            .execute(self.db.pool())
            .await?
            .rows_affected();

        warn!(service, deleted, "Cleared all sync queues for service");
        Ok(deleted)
    }

    async fn recover_expired_tasks(
        &self,
        service: &str,
        policy: &RetryPolicy,
    ) -> DomainResult<RecoveryReport> {
        let mut report = RecoveryReport::default();

        match self.recover_batch(service, policy, &mut report).await {
            Ok(()) => {}
            Err(e) if e.is_retryable() => {
                warn!(service, error = %e, "Lease recovery interrupted by backend error");
            }
            Err(e) => return Err(e),
        }

        if report.total() > 0 {
            metrics::counter!("sync_tasks_recovered_total", "service" => service.to_string())
                .increment(report.retried + report.failed);
            info!(
                service,
                retried = report.retried,
                failed = report.failed,
                discarded = report.discarded,
                "Recovered tasks with expired leases"
            );
        }
        Ok(report)
    }
}

fn map_insert_error(err: sqlx::Error, id: &str) -> DomainError {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.message().contains("UNIQUE") {
            return DomainError::Conflict(format!("task {} is already queued", id));
        }
    }
    DomainError::Backend(err)
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn non_zero_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms > 0 {
        from_millis(ms)
    } else {
        None
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
