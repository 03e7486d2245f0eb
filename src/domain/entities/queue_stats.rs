use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of one service's queues. Derived on read from queue
/// lengths and the lifetime counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueueStats {
    pub service: String,
    pub pending: u64,
    pub delayed: u64,
    pub processing: u64,
    pub failed: u64,
    pub total_processed: u64,
    pub total_failed: u64,
    pub last_processed_at: Option<DateTime<Utc>>,
    pub last_failed_at: Option<DateTime<Utc>>,
}

impl QueueStats {
    pub fn empty(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Default::default()
        }
    }

    /// Number of tasks currently held in any of the four queues.
    pub fn live_tasks(&self) -> u64 {
        self.pending + self.delayed + self.processing + self.failed
    }
}

/// Summary of one lease-recovery sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    /// Expired leases rescheduled into the delayed queue.
    pub retried: u64,
    /// Expired leases whose attempts were exhausted.
    pub failed: u64,
    /// Unparseable entries dropped from processing.
    pub discarded: u64,
}

impl RecoveryReport {
    pub fn total(&self) -> u64 {
        self.retried + self.failed + self.discarded
    }
}
