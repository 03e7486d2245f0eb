use futures::future::join_all;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{metadata_keys, QueuedTask, RecoveryReport, SyncResult};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::sync_handler::SyncHandler;
use crate::domain::ports::sync_queue::SyncQueueStore;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::time_service::TimeService;

#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// In-flight tasks per service.
    pub max_concurrent_tasks: usize,
    pub poll_interval: Duration,
    pub task_timeout: Duration,
    pub recovery_interval: Duration,
    /// Pause after a store error before dequeuing again.
    pub error_backoff: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            poll_interval: Duration::from_secs(1),
            task_timeout: Duration::from_secs(60),
            recovery_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// What happened to a single dequeued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Succeeded,
    Retried,
    Failed,
    /// The handler overran its timeout. The task keeps its lease and is
    /// settled by the next recovery sweep.
    TimedOut,
    /// Shutdown interrupted the handler. Left for lease recovery as well.
    Interrupted,
}

/// Per-task execution, cloned into every spawned unit of work.
#[derive(Clone)]
struct Dispatch {
    store: Arc<dyn SyncQueueStore>,
    clock: Arc<dyn TimeService>,
    task_timeout: Duration,
}

impl Dispatch {
    async fn execute(
        &self,
        handler: &Arc<dyn SyncHandler>,
        task: QueuedTask,
        shutdown: &CancellationToken,
    ) -> DomainResult<TaskOutcome> {
        let service = handler.service_name().to_string();
        let task_cancel = shutdown.child_token();

        debug!(service = %service, task_id = %task.id, action = %task.action, attempt = task.attempt_count, "Processing sync task");

        let invocation = AssertUnwindSafe(handler.process(&task, task_cancel.clone())).catch_unwind();
        let outcome = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!(service = %service, task_id = %task.id, "Shutdown interrupted task, leaving it for lease recovery");
                return Ok(TaskOutcome::Interrupted);
            }
            outcome = tokio::time::timeout(self.task_timeout, invocation) => outcome,
        };

        let result = match outcome {
            Err(_) => {
                task_cancel.cancel();
                warn!(
                    service = %service,
                    task_id = %task.id,
                    timeout_secs = self.task_timeout.as_secs(),
                    "Sync task timed out, leaving it for lease recovery"
                );
                metrics::counter!("sync_tasks_timed_out_total", "service" => service.clone()).increment(1);
                return Ok(TaskOutcome::TimedOut);
            }
            Ok(Err(panic)) => {
                let message = panic_message(&*panic);
                error!(service = %service, task_id = %task.id, panic = %message, "Sync handler panicked");
                SyncResult::retry(format!("handler panicked: {}", message))
            }
            Ok(Ok(result)) => result,
        };

        if result.is_success {
            self.store.remove_from_processing(&service, &task, true).await?;
            info!(service = %service, task_id = %task.id, action = %task.action, "Sync task succeeded");
            return Ok(TaskOutcome::Succeeded);
        }

        self.handle_failure(handler, &service, task, &result).await
    }

    async fn handle_failure(
        &self,
        handler: &Arc<dyn SyncHandler>,
        service: &str,
        task: QueuedTask,
        result: &SyncResult,
    ) -> DomainResult<TaskOutcome> {
        let error_text = result.error_text();
        let max_attempts = handler.max_retry_attempts();

        if !result.should_retry || task.attempt_count >= max_attempts {
            warn!(
                service,
                task_id = %task.id,
                attempts = task.attempt_count,
                max_attempts,
                retryable = result.should_retry,
                error = error_text,
                "Sync task failed permanently"
            );
            self.store.move_to_failed(service, &task, error_text).await?;
            return Ok(TaskOutcome::Failed);
        }

        let delay = result
            .custom_retry_delay
            .unwrap_or_else(|| handler.calculate_retry_delay(task.attempt_count + 1));
        let task = task
            .with_metadata(metadata_keys::LAST_ERROR, error_text)
            .with_metadata(metadata_keys::LAST_FAILED_AT, self.clock.now().to_rfc3339());

        let stored = self.store.schedule_retry(service, &task, delay).await?;
        warn!(
            service,
            task_id = %stored.id,
            attempt = stored.attempt_count,
            delay_secs = delay.as_secs(),
            error = error_text,
            "Sync task failed, retry scheduled"
        );
        Ok(TaskOutcome::Retried)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Drives dequeue, process and transition for every registered handler,
/// plus the periodic lease recovery sweep.
pub struct SyncQueueProcessor {
    dispatch: Dispatch,
    handlers: Vec<Arc<dyn SyncHandler>>,
    spawner: Arc<dyn TaskSpawner>,
    config: ProcessorConfig,
}

impl SyncQueueProcessor {
    pub fn new(
        store: Arc<dyn SyncQueueStore>,
        spawner: Arc<dyn TaskSpawner>,
        clock: Arc<dyn TimeService>,
        config: ProcessorConfig,
    ) -> Self {
        Self {
            dispatch: Dispatch {
                store,
                clock,
                task_timeout: config.task_timeout,
            },
            handlers: Vec::new(),
            spawner,
            config,
        }
    }

    /// Register a handler. A later handler for the same service replaces
    /// the earlier one.
    pub fn with_handler(mut self, handler: Arc<dyn SyncHandler>) -> Self {
        let service = handler.service_name().to_string();
        if let Some(pos) = self.handlers.iter().position(|h| h.service_name() == service) {
            warn!(service = %service, "Replacing previously registered sync handler");
            self.handlers.remove(pos);
        }
        self.handlers.push(handler);
        self
    }

    pub fn handlers(&self) -> &[Arc<dyn SyncHandler>] {
        &self.handlers
    }

    fn handler(&self, service: &str) -> DomainResult<&Arc<dyn SyncHandler>> {
        self.handlers
            .iter()
            .find(|h| h.service_name() == service)
            .ok_or_else(|| DomainError::NotFound(format!("No sync handler for service {}", service)))
    }

    /// Run until `cancel` fires. Returns once every loop has exited and the
    /// in-flight tasks have settled.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(services = self.handlers.len(), "Starting sync queue processor");

        let service_loops = self
            .handlers
            .iter()
            .map(|handler| self.service_loop(handler.clone(), cancel.clone()));
        tokio::join!(join_all(service_loops), self.recovery_loop(cancel.clone()));

        info!("Sync queue processor stopped");
    }

    async fn service_loop(&self, handler: Arc<dyn SyncHandler>, cancel: CancellationToken) {
        let service = handler.service_name().to_string();
        let slot_count = self.config.max_concurrent_tasks.max(1);
        let slots = Arc::new(Semaphore::new(slot_count));
        info!(service = %service, max_concurrent = slot_count, "Sync loop started");

        loop {
            let permit = tokio::select! {
                _ = cancel.cancelled() => break,
                permit = slots.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            match self.dispatch.store.dequeue(&service).await {
                Ok(Some(task)) => {
                    let dispatch = self.dispatch.clone();
                    let handler = handler.clone();
                    let shutdown = cancel.clone();
                    self.spawner.spawn(Box::pin(async move {
                        let _permit = permit;
                        let task_id = task.id.clone();
                        if let Err(e) = dispatch.execute(&handler, task, &shutdown).await {
                            error!(
                                service = handler.service_name(),
                                task_id = %task_id,
                                error = %e,
                                "Failed to record sync task outcome, lease recovery will retry it"
                            );
                        }
                    }));
                }
                Ok(None) => {
                    drop(permit);
                    if self.pause(self.config.poll_interval, &cancel).await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    error!(service = %service, error = %e, "Failed to dequeue sync task");
                    if self.pause(self.config.error_backoff, &cancel).await {
                        break;
                    }
                }
            }
        }

        // Wait for in-flight tasks; they observe the same token.
        let _ = slots.acquire_many(slot_count as u32).await;
        info!(service = %service, "Sync loop stopped");
    }

    async fn recovery_loop(&self, cancel: CancellationToken) {
        loop {
            self.recover_all().await;
            if self.pause(self.config.recovery_interval, &cancel).await {
                break;
            }
        }
    }

    /// One recovery sweep over every registered service.
    pub async fn recover_all(&self) -> RecoveryReport {
        let mut total = RecoveryReport::default();
        for handler in &self.handlers {
            let service = handler.service_name();
            match self
                .dispatch
                .store
                .recover_expired_tasks(service, &handler.retry_policy())
                .await
            {
                Ok(report) => {
                    if report.total() > 0 {
                        info!(
                            service,
                            retried = report.retried,
                            failed = report.failed,
                            discarded = report.discarded,
                            "Recovered expired sync tasks"
                        );
                    }
                    total.retried += report.retried;
                    total.failed += report.failed;
                    total.discarded += report.discarded;
                }
                Err(e) => error!(service, error = %e, "Lease recovery failed"),
            }
        }
        total
    }

    /// Dequeue and process a single task inline. Returns false when the
    /// service's queue had nothing ready.
    pub async fn process_once(&self, service: &str) -> DomainResult<bool> {
        Ok(self.process_next(service).await?.is_some())
    }

    /// Like [`process_once`](Self::process_once) but reports the outcome.
    pub async fn process_next(&self, service: &str) -> DomainResult<Option<TaskOutcome>> {
        let handler = self.handler(service)?.clone();
        let Some(task) = self.dispatch.store.dequeue(service).await? else {
            return Ok(None);
        };
        let outcome = self
            .dispatch
            .execute(&handler, task, &CancellationToken::new())
            .await?;
        Ok(Some(outcome))
    }

    /// Sleep unless cancelled first. Returns true on cancellation.
    async fn pause(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => true,
            _ = self.dispatch.clock.sleep(duration) => false,
        }
    }
}
