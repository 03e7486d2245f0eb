use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::entities::{QueueStats, RecoveryReport};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::sync_handler::SyncHandler;
use crate::domain::ports::sync_queue::SyncQueueStore;

/// A service is reported unhealthy once its failed queue grows past this.
pub const DEFAULT_FAILED_THRESHOLD: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceHealth {
    pub service: String,
    pub pending: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub services: Vec<ServiceHealth>,
}

#[derive(Clone)]
pub struct SyncQueueAdminService {
    store: Arc<dyn SyncQueueStore>,
    handlers: Vec<Arc<dyn SyncHandler>>,
    failed_threshold: u64,
}

impl SyncQueueAdminService {
    pub fn new(store: Arc<dyn SyncQueueStore>, handlers: Vec<Arc<dyn SyncHandler>>) -> Self {
        Self {
            store,
            handlers,
            failed_threshold: DEFAULT_FAILED_THRESHOLD,
        }
    }

    pub fn with_failed_threshold(mut self, threshold: u64) -> Self {
        self.failed_threshold = threshold;
        self
    }

    pub fn services(&self) -> Vec<String> {
        self.handlers.iter().map(|h| h.service_name().to_string()).collect()
    }

    fn handler(&self, service: &str) -> DomainResult<&Arc<dyn SyncHandler>> {
        self.handlers
            .iter()
            .find(|h| h.service_name() == service)
            .ok_or_else(|| DomainError::NotFound(format!("Unknown sync service {}", service)))
    }

    pub async fn stats(&self, service: &str) -> DomainResult<QueueStats> {
        self.handler(service)?;
        self.store.get_stats(service).await
    }

    pub async fn all_stats(&self) -> DomainResult<Vec<QueueStats>> {
        let mut all = Vec::with_capacity(self.handlers.len());
        for handler in &self.handlers {
            all.push(self.store.get_stats(handler.service_name()).await?);
        }
        Ok(all)
    }

    pub async fn retry_failed(&self, service: &str) -> DomainResult<u64> {
        self.handler(service)?;
        let moved = self.store.retry_failed_tasks(service).await?;
        info!(service, moved, "Requeued failed sync tasks");
        Ok(moved)
    }

    /// Destructive: drops every queued task of the service.
    pub async fn clear(&self, service: &str) -> DomainResult<u64> {
        self.handler(service)?;
        let removed = self.store.clear_queue(service).await?;
        warn!(service, removed, "Cleared sync queues");
        Ok(removed)
    }

    pub async fn recover(&self, service: &str) -> DomainResult<RecoveryReport> {
        let policy = self.handler(service)?.retry_policy();
        self.store.recover_expired_tasks(service, &policy).await
    }

    /// Promote due delayed tasks now instead of waiting for the next dequeue.
    pub async fn promote(&self, service: &str) -> DomainResult<u64> {
        self.handler(service)?;
        self.store.promote_due_tasks(service).await
    }

    pub async fn health(&self) -> DomainResult<HealthReport> {
        let services: Vec<ServiceHealth> = self
            .all_stats()
            .await?
            .into_iter()
            .map(|stats| ServiceHealth {
                service: stats.service,
                pending: stats.pending,
                failed: stats.failed,
            })
            .collect();
        let healthy = services.iter().all(|s| s.failed <= self.failed_threshold);
        Ok(HealthReport { healthy, services })
    }
}
