use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

/// Action verbs understood by the bundled handlers. Handlers may accept
/// additional verbs of their own, so `SyncTask::action` stays a plain string.
pub mod actions {
    pub const CREATE: &str = "CREATE";
    pub const UPDATE: &str = "UPDATE";
    pub const DELETE: &str = "DELETE";
    pub const UNDELETE: &str = "UNDELETE";
}

/// Metadata keys written by the queue itself.
pub mod metadata_keys {
    pub const LAST_ERROR: &str = "last_error";
    pub const LAST_FAILED_AT: &str = "last_failed_at";
    pub const FAILED_AT: &str = "failed_at";
    pub const RECOVERED_AT: &str = "recovered_at";
}

/// Envelope persisted in the queue.
///
/// `T` is the handler specific payload. Producers build a typed task and the
/// store persists it as [`QueuedTask`] (payload as loose JSON); the handler
/// re-types the payload on dequeue with [`SyncTask::decode_payload`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncTask<T = Value> {
    pub id: String,
    pub service: String,
    pub action: String,
    pub entity_id: String,
    pub user_id: String,
    pub payload: T,
    #[serde(default)]
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

/// A task as it lives in the store, with an untyped payload.
pub type QueuedTask = SyncTask<Value>;

impl<T> SyncTask<T> {
    pub fn new(
        service: impl Into<String>,
        action: impl Into<String>,
        entity_id: impl Into<String>,
        user_id: impl Into<String>,
        payload: T,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            service: service.into(),
            action: action.into(),
            entity_id: entity_id.into(),
            user_id: user_id.into(),
            payload,
            attempt_count: 0,
            created_at: Utc::now(),
            scheduled_for: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl<T: Serialize> SyncTask<T> {
    /// Convert into the store representation.
    pub fn into_queued(self) -> DomainResult<QueuedTask> {
        Ok(SyncTask {
            id: self.id,
            service: self.service,
            action: self.action,
            entity_id: self.entity_id,
            user_id: self.user_id,
            payload: serde_json::to_value(self.payload)?,
            attempt_count: self.attempt_count,
            created_at: self.created_at,
            scheduled_for: self.scheduled_for,
            metadata: self.metadata,
        })
    }
}

impl QueuedTask {
    /// Re-type the payload into the shape a handler expects.
    pub fn decode_payload<P: DeserializeOwned>(&self) -> DomainResult<P> {
        if self.payload.is_null() {
            return Err(DomainError::ValidationError(format!(
                "task {} has no payload",
                self.id
            )));
        }
        serde_json::from_value(self.payload.clone()).map_err(DomainError::from)
    }

    pub fn to_json(&self) -> DomainResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> DomainResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.map_or(true, |at| at <= now)
    }
}

/// Outcome of a single handler invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncResult {
    pub is_success: bool,
    pub error_message: Option<String>,
    /// Handler's recommendation. `false` sends the task straight to the
    /// failed queue regardless of remaining attempts.
    pub should_retry: bool,
    pub custom_retry_delay: Option<Duration>,
}

impl SyncResult {
    pub fn success() -> Self {
        Self {
            is_success: true,
            error_message: None,
            should_retry: false,
            custom_retry_delay: None,
        }
    }

    /// Transient failure, retried with the handler's backoff.
    pub fn retry(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error_message: Some(message.into()),
            should_retry: true,
            custom_retry_delay: None,
        }
    }

    /// Transient failure with an explicit delay, e.g. a platform `retry_after`.
    pub fn retry_after(message: impl Into<String>, delay: Duration) -> Self {
        Self {
            custom_retry_delay: Some(delay),
            ..Self::retry(message)
        }
    }

    /// Permanent failure; retrying cannot help.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            is_success: false,
            error_message: Some(message.into()),
            should_retry: false,
            custom_retry_delay: None,
        }
    }

    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("unknown error")
    }
}
