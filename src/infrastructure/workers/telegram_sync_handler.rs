use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::services::CredentialCache;
use crate::domain::entities::{
    actions, QueuedTask, RetryPolicy, SyncResult, TelegramSyncPayload, TELEGRAM_SERVICE,
};
use crate::domain::errors::DomainError;
use crate::domain::ports::credential_source::TelegramCredential;
use crate::domain::ports::note_repository::{ExternalIdField, NoteSyncRepository};
use crate::domain::ports::sync_handler::SyncHandler;
use crate::domain::ports::telegram_client::{ParseMode, PlatformError, TelegramClient};
use crate::domain::services::external_ids;

/// Longest text Telegram accepts in a single message.
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

const DOCUMENT_CAPTION_CHARS: usize = 200;

/// Mirrors notes into Telegram channels.
///
/// Actions: `CREATE`, `UNDELETE` (post again), `UPDATE`, `DELETE`. Every other
/// verb is a permanent failure.
pub struct TelegramSyncHandler {
    client: Arc<dyn TelegramClient>,
    credentials: CredentialCache,
    notes: Arc<dyn NoteSyncRepository>,
    retry_policy: RetryPolicy,
}

impl TelegramSyncHandler {
    pub fn new(
        client: Arc<dyn TelegramClient>,
        credentials: CredentialCache,
        notes: Arc<dyn NoteSyncRepository>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            client,
            credentials,
            notes,
            retry_policy,
        }
    }

    async fn create(
        &self,
        task: &QueuedTask,
        payload: &TelegramSyncPayload,
        credential: &TelegramCredential,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let message_id = match self.post_content(task, &payload.content, credential, cancel).await {
            Ok(id) => id,
            Err(e) => return failure_from(e, "send"),
        };

        self.record_message(task, &payload.channel_id, message_id).await;
        info!(task_id = %task.id, note_id = %task.entity_id, message_id, "Posted note to telegram");
        SyncResult::success()
    }

    async fn update(
        &self,
        task: &QueuedTask,
        payload: &TelegramSyncPayload,
        credential: &TelegramCredential,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let Some(message_id) = payload.message_id else {
            return SyncResult::fatal("telegram UPDATE requires message_id");
        };

        if exceeds_message_limit(&payload.content) {
            // Long content can't be edited into a text message; replace it.
            match cancellable(cancel, self.client.delete_message(credential, message_id)).await {
                Ok(()) | Err(PlatformError::NotFound(_)) => {}
                Err(e) => return failure_from(e, "delete before re-post"),
            }
            self.forget_message(task, &payload.channel_id, message_id).await;
            return self.create(task, payload, credential, cancel).await;
        }

        match self.edit_text(credential, message_id, &payload.content, cancel).await {
            Ok(()) | Err(PlatformError::NotModified) => {
                debug!(task_id = %task.id, message_id, "Edited telegram message");
                SyncResult::success()
            }
            Err(PlatformError::NotFound(reason)) => {
                info!(task_id = %task.id, message_id, %reason, "Message to edit is gone, posting again");
                self.forget_message(task, &payload.channel_id, message_id).await;
                self.create(task, payload, credential, cancel).await
            }
            Err(e) => failure_from(e, "edit"),
        }
    }

    async fn delete(
        &self,
        task: &QueuedTask,
        payload: &TelegramSyncPayload,
        credential: &TelegramCredential,
        cancel: &CancellationToken,
    ) -> SyncResult {
        let Some(message_id) = payload.message_id else {
            return SyncResult::fatal("telegram DELETE requires message_id");
        };

        match cancellable(cancel, self.client.delete_message(credential, message_id)).await {
            Ok(()) => {}
            Err(PlatformError::NotFound(reason)) => {
                info!(task_id = %task.id, message_id, %reason, "Telegram message already gone");
            }
            Err(e) => return failure_from(e, "delete"),
        }

        self.forget_message(task, &payload.channel_id, message_id).await;
        SyncResult::success()
    }

    async fn post_content(
        &self,
        task: &QueuedTask,
        content: &str,
        credential: &TelegramCredential,
        cancel: &CancellationToken,
    ) -> Result<i64, PlatformError> {
        if exceeds_message_limit(content) {
            let file_name = format!("note-{}.md", task.entity_id);
            let caption = document_caption(content);
            return cancellable(
                cancel,
                self.client
                    .send_document(credential, &file_name, content.as_bytes().to_vec(), &caption),
            )
            .await;
        }

        match cancellable(cancel, self.client.send_message(credential, content, ParseMode::Markdown)).await {
            Err(PlatformError::ParseEntities(reason)) => {
                debug!(task_id = %task.id, %reason, "Markdown rejected, sending plain text");
                cancellable(cancel, self.client.send_message(credential, content, ParseMode::Plain)).await
            }
            other => other,
        }
    }

    async fn edit_text(
        &self,
        credential: &TelegramCredential,
        message_id: i64,
        content: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PlatformError> {
        match cancellable(
            cancel,
            self.client
                .edit_message(credential, message_id, content, ParseMode::Markdown),
        )
        .await
        {
            Err(PlatformError::ParseEntities(_)) => {
                cancellable(
                    cancel,
                    self.client
                        .edit_message(credential, message_id, content, ParseMode::Plain),
                )
                .await
            }
            other => other,
        }
    }

    /// Bookkeeping failures are logged only: the remote side effect already
    /// happened and retrying the task would post twice.
    async fn record_message(&self, task: &QueuedTask, channel_id: &str, message_id: i64) {
        let entry = external_ids::format_entry(channel_id, &message_id.to_string());
        if let Err(e) = self
            .notes
            .append_external_id(&task.entity_id, ExternalIdField::TelegramMessageIds, &entry)
            .await
        {
            warn!(task_id = %task.id, note_id = %task.entity_id, error = %e, "Failed to record telegram message id");
        }
    }

    async fn forget_message(&self, task: &QueuedTask, channel_id: &str, message_id: i64) {
        let entry = external_ids::format_entry(channel_id, &message_id.to_string());
        match self
            .notes
            .remove_external_id(&task.entity_id, ExternalIdField::TelegramMessageIds, &entry)
            .await
        {
            Ok(()) => {}
            Err(DomainError::NotFound(_)) => {
                debug!(note_id = %task.entity_id, "Note already deleted, nothing to unlink");
            }
            Err(e) => {
                warn!(task_id = %task.id, note_id = %task.entity_id, error = %e, "Failed to remove telegram message id");
            }
        }
    }
}

#[async_trait]
impl SyncHandler for TelegramSyncHandler {
    fn service_name(&self) -> &str {
        TELEGRAM_SERVICE
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy.clone()
    }

    async fn process(&self, task: &QueuedTask, cancel: CancellationToken) -> SyncResult {
        let payload: TelegramSyncPayload = match task.decode_payload() {
            Ok(payload) => payload,
            Err(e) => return SyncResult::fatal(format!("invalid telegram payload: {}", e)),
        };
        if payload.channel_id.trim().is_empty() {
            return SyncResult::fatal("telegram payload has no channel_id");
        }

        let credential = match self.credentials.telegram(&payload.channel_id).await {
            Ok(Some(credential)) => credential,
            Ok(None) => {
                return SyncResult::fatal(format!(
                    "no telegram credential for channel {}",
                    payload.channel_id
                ))
            }
            Err(e) => return SyncResult::retry(format!("credential lookup failed: {}", e)),
        };

        match task.action.as_str() {
            actions::CREATE | actions::UNDELETE => self.create(task, &payload, &credential, &cancel).await,
            actions::UPDATE => self.update(task, &payload, &credential, &cancel).await,
            actions::DELETE => self.delete(task, &payload, &credential, &cancel).await,
            other => SyncResult::fatal(format!("unsupported telegram action {}", other)),
        }
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, PlatformError>>,
) -> Result<T, PlatformError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PlatformError::Transient("cancelled".to_string())),
        result = call => result,
    }
}

fn exceeds_message_limit(content: &str) -> bool {
    content.chars().count() > TELEGRAM_MESSAGE_LIMIT
}

fn document_caption(content: &str) -> String {
    let first_line = content.lines().find(|l| !l.trim().is_empty()).unwrap_or_default();
    let mut caption: String = first_line.chars().take(DOCUMENT_CAPTION_CHARS).collect();
    if first_line.chars().count() > DOCUMENT_CAPTION_CHARS {
        caption.push('…');
    }
    caption
}

fn failure_from(err: PlatformError, operation: &str) -> SyncResult {
    let message = format!("telegram {} failed: {}", operation, err);
    match err {
        PlatformError::RateLimited {
            retry_after: Some(delay),
        } => SyncResult::retry_after(message, delay),
        PlatformError::RateLimited { retry_after: None } | PlatformError::Transient(_) => {
            SyncResult::retry(message)
        }
        PlatformError::NotFound(_)
        | PlatformError::ParseEntities(_)
        | PlatformError::NotModified
        | PlatformError::Unauthorized(_)
        | PlatformError::Rejected(_) => SyncResult::fatal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_limit_counts_characters_not_bytes() {
        let cyrillic = "я".repeat(TELEGRAM_MESSAGE_LIMIT);
        assert!(!exceeds_message_limit(&cyrillic));
        assert!(exceeds_message_limit(&"a".repeat(TELEGRAM_MESSAGE_LIMIT + 1)));
    }

    #[test]
    fn test_caption_uses_first_non_blank_line() {
        assert_eq!(document_caption("\n\n# Title\nbody"), "# Title");
        let long = "x".repeat(DOCUMENT_CAPTION_CHARS + 10);
        let caption = document_caption(&long);
        assert_eq!(caption.chars().count(), DOCUMENT_CAPTION_CHARS + 1);
        assert!(caption.ends_with('…'));
    }

    #[test]
    fn test_failure_classification() {
        let limited = failure_from(
            PlatformError::RateLimited {
                retry_after: Some(Duration::from_secs(12)),
            },
            "send",
        );
        assert!(limited.should_retry);
        assert_eq!(limited.custom_retry_delay, Some(Duration::from_secs(12)));

        assert!(failure_from(PlatformError::Transient("reset".into()), "send").should_retry);
        assert!(!failure_from(PlatformError::Unauthorized("revoked".into()), "send").should_retry);
        assert!(!failure_from(PlatformError::Rejected("bad".into()), "send").should_retry);
    }
}
