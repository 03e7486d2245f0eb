use async_trait::async_trait;
use notesync::domain::entities::{QueueStats, QueuedTask, RecoveryReport, RetryPolicy, SyncResult};
use notesync::domain::errors::{DomainError, DomainResult};
use notesync::domain::ports::sync_handler::SyncHandler;
use notesync::domain::ports::sync_queue::SyncQueueStore;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub enum Step {
    Return(SyncResult),
    Panic(&'static str),
    /// Block until the task's token is cancelled.
    Hang,
}

/// Handler that plays back a script of results, then a fallback.
pub struct ScriptedHandler {
    service: String,
    policy: RetryPolicy,
    steps: Mutex<VecDeque<Step>>,
    fallback: SyncResult,
    calls: AtomicUsize,
    seen: Mutex<Vec<QueuedTask>>,
}

impl ScriptedHandler {
    pub fn new(service: &str, max_attempts: u32) -> Self {
        Self {
            service: service.to_string(),
            policy: RetryPolicy::new(
                max_attempts,
                Duration::from_secs(60),
                2.0,
                Duration::from_secs(1800),
            ),
            steps: Mutex::new(VecDeque::new()),
            fallback: SyncResult::success(),
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    pub fn always(mut self, result: SyncResult) -> Self {
        self.fallback = result;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<QueuedTask> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl SyncHandler for ScriptedHandler {
    fn service_name(&self) -> &str {
        &self.service
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.policy.clone()
    }

    async fn process(&self, task: &QueuedTask, cancel: CancellationToken) -> SyncResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(task.clone());
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Return(result)) => result,
            Some(Step::Panic(message)) => panic!("{}", message),
            Some(Step::Hang) => {
                cancel.cancelled().await;
                SyncResult::retry("cancelled")
            }
            None => self.fallback.clone(),
        }
    }
}

/// Store whose every call fails, for best-effort paths.
pub struct OfflineStore;

fn offline<T>() -> DomainResult<T> {
    Err(DomainError::Internal("store offline".to_string()))
}

#[async_trait]
impl SyncQueueStore for OfflineStore {
    async fn enqueue(&self, _service: &str, _task: &QueuedTask) -> DomainResult<()> {
        offline()
    }

    async fn dequeue(&self, _service: &str) -> DomainResult<Option<QueuedTask>> {
        offline()
    }

    async fn promote_due_tasks(&self, _service: &str) -> DomainResult<u64> {
        offline()
    }

    async fn schedule_retry(&self, _service: &str, _task: &QueuedTask, _delay: Duration) -> DomainResult<QueuedTask> {
        offline()
    }

    async fn move_to_failed(&self, _service: &str, _task: &QueuedTask, _error: &str) -> DomainResult<()> {
        offline()
    }

    async fn remove_from_processing(&self, _service: &str, _task: &QueuedTask, _credit_success: bool) -> DomainResult<()> {
        offline()
    }

    async fn get_stats(&self, _service: &str) -> DomainResult<QueueStats> {
        offline()
    }

    async fn retry_failed_tasks(&self, _service: &str) -> DomainResult<u64> {
        offline()
    }

    async fn clear_queue(&self, _service: &str) -> DomainResult<u64> {
        offline()
    }

    async fn recover_expired_tasks(&self, _service: &str, _policy: &RetryPolicy) -> DomainResult<RecoveryReport> {
        offline()
    }
}
