use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::time_service::TimeService;

/// Suppresses repeated requests seen within a short window.
///
/// Holds at most `capacity` keys. When full, the least recently seen key is
/// evicted. Expired keys are dropped by [`sweep`](Self::sweep), normally from
/// the background task started by [`spawn_sweeper`](Self::spawn_sweeper).
#[derive(Clone)]
pub struct RecentActivityTracker {
    seen: Arc<RwLock<HashMap<String, DateTime<Utc>>>>,
    capacity: usize,
    window: Duration,
    clock: Arc<dyn TimeService>,
}

impl RecentActivityTracker {
    pub fn new(capacity: usize, window: Duration, clock: Arc<dyn TimeService>) -> Self {
        Self {
            seen: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
            window,
            clock,
        }
    }

    /// Stable key for a request, hashing its parts so content is not kept
    /// in memory.
    pub fn key(parts: &[&str]) -> String {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
            hasher.update([0x1f]);
        }
        hex::encode(hasher.finalize())
    }

    /// Record `key`. Returns false when it was already seen inside the window.
    pub async fn check_and_record(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut seen = self.seen.write().await;

        if let Some(last) = seen.get(key) {
            if self.is_recent(now, *last) {
                return false;
            }
        }

        if seen.len() >= self.capacity && !seen.contains_key(key) {
            let oldest = seen
                .iter()
                .min_by_key(|(_, at)| **at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                seen.remove(&oldest);
            }
        }

        seen.insert(key.to_string(), now);
        true
    }

    /// Drop every key older than the window. Returns how many were removed.
    pub async fn sweep(&self) -> usize {
        let now = self.clock.now();
        let mut seen = self.seen.write().await;
        let before = seen.len();
        seen.retain(|_, at| self.is_recent(now, *at));
        before - seen.len()
    }

    /// Drop `key` so the next identical request is accepted.
    pub async fn forget(&self, key: &str) -> bool {
        self.seen.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.seen.read().await.len()
    }

    pub fn spawn_sweeper(&self, spawner: &dyn TaskSpawner, interval: Duration, cancel: CancellationToken) {
        let tracker = self.clone();
        spawner.spawn(Box::pin(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tracker.clock.sleep(interval) => {
                        let removed = tracker.sweep().await;
                        if removed > 0 {
                            debug!(removed, "Swept recent activity entries");
                        }
                    }
                }
            }
        }));
    }

    fn is_recent(&self, now: DateTime<Utc>, at: DateTime<Utc>) -> bool {
        match (now - at).to_std() {
            Ok(elapsed) => elapsed < self.window,
            // clock went backwards
            Err(_) => true,
        }
    }
}
