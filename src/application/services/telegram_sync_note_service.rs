use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::application::services::RecentActivityTracker;
use crate::domain::entities::{actions, SyncTask, TelegramSyncPayload, TELEGRAM_SERVICE};
use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::ports::note_repository::{ExternalIdField, NoteSyncRepository};
use crate::domain::ports::sync_queue::SyncQueueStore;
use crate::domain::services::external_ids;

/// The parts of a note the Telegram producer looks at.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteSnapshot {
    pub id: String,
    pub user_id: String,
    pub content: String,
}

/// Turns note writes into Telegram sync tasks.
///
/// Sync is best effort relative to the note write: enqueue failures are
/// logged and never returned to the caller.
#[derive(Clone)]
pub struct TelegramSyncNoteService {
    store: Arc<dyn SyncQueueStore>,
    notes: Arc<dyn NoteSyncRepository>,
    recent: RecentActivityTracker,
}

impl TelegramSyncNoteService {
    pub fn new(
        store: Arc<dyn SyncQueueStore>,
        notes: Arc<dyn NoteSyncRepository>,
        recent: RecentActivityTracker,
    ) -> Self {
        Self { store, notes, recent }
    }

    /// Reconcile the channels a note is published to with `target_channels`.
    ///
    /// New channels get a CREATE, kept channels get an UPDATE when the content
    /// changed (`previous_content` of `None` counts as changed), dropped
    /// channels get a DELETE. Returns the number of tasks enqueued.
    pub async fn sync_note(
        &self,
        note: &NoteSnapshot,
        target_channels: &[String],
        previous_content: Option<&str>,
    ) -> usize {
        let mut targets: Vec<&str> = Vec::new();
        for channel in target_channels.iter().map(|c| c.trim()) {
            if !channel.is_empty() && !targets.contains(&channel) {
                targets.push(channel);
            }
        }

        // Keyed on the edit itself (from -> to), so reverting within the
        // window is a new request rather than a duplicate.
        let (has_previous, previous) = match previous_content {
            Some(previous) => ("1", previous),
            None => ("0", ""),
        };
        let dedup_key = RecentActivityTracker::key(&[
            "sync",
            &note.id,
            &targets.join(","),
            has_previous,
            previous,
            &note.content,
        ]);
        if !self.recent.check_and_record(&dedup_key).await {
            debug!(note_id = %note.id, "Skipping duplicate telegram sync request");
            return 0;
        }
        // A later delete must not be mistaken for the one before this write
        self.recent.forget(&delete_key(&note.id)).await;

        let published = match self.published_entries(&note.id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(note_id = %note.id, error = %e, "Failed to read telegram message ids, skipping sync");
                return 0;
            }
        };

        let content_changed = previous_content.map_or(true, |previous| previous != note.content);
        let mut enqueued = 0;

        for channel in &targets {
            match external_ids::find_for_account(&published, channel) {
                None => {
                    let payload = telegram_payload(channel, &note.content, None);
                    enqueued += self.enqueue(&note.id, &note.user_id, actions::CREATE, payload).await as usize;
                }
                Some(message_id) if content_changed => match message_id.parse::<i64>() {
                    Ok(message_id) => {
                        let payload = telegram_payload(channel, &note.content, Some(message_id));
                        enqueued += self.enqueue(&note.id, &note.user_id, actions::UPDATE, payload).await as usize;
                    }
                    Err(_) => {
                        warn!(note_id = %note.id, channel_id = %channel, message_id, "Ignoring malformed telegram message id");
                    }
                },
                Some(_) => {}
            }
        }

        let dropped: Vec<(&str, i64)> = published
            .iter()
            .filter_map(|entry| external_ids::split_entry(entry))
            .filter(|(channel, _)| !targets.contains(channel))
            .filter_map(|(channel, message_id)| message_id.parse().ok().map(|id| (channel, id)))
            .collect();
        for (channel, message_id) in dropped {
            let payload = telegram_payload(channel, "", Some(message_id));
            enqueued += self.enqueue(&note.id, &note.user_id, actions::DELETE, payload).await as usize;
        }

        if enqueued > 0 {
            info!(note_id = %note.id, enqueued, "Queued telegram sync tasks");
        }
        enqueued
    }

    /// Queue a DELETE for every message the note was published as.
    pub async fn sync_note_deleted(&self, note_id: &str, user_id: &str) -> usize {
        let dedup_key = delete_key(note_id);
        if !self.recent.check_and_record(&dedup_key).await {
            debug!(note_id, "Skipping duplicate telegram delete request");
            return 0;
        }

        let published = match self.published_entries(note_id).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(note_id, error = %e, "Failed to read telegram message ids, skipping delete sync");
                return 0;
            }
        };

        let mut enqueued = 0;
        for entry in &published {
            let Some((channel, message_id)) = external_ids::split_entry(entry) else {
                continue;
            };
            let Ok(message_id) = message_id.parse::<i64>() else {
                warn!(note_id, entry = %entry, "Ignoring malformed telegram message id");
                continue;
            };
            let payload = telegram_payload(channel, "", Some(message_id));
            enqueued += self.enqueue(note_id, user_id, actions::DELETE, payload).await as usize;
        }
        enqueued
    }

    async fn published_entries(&self, note_id: &str) -> DomainResult<Vec<String>> {
        match self
            .notes
            .external_ids(note_id, ExternalIdField::TelegramMessageIds)
            .await
        {
            Ok(entries) => Ok(entries),
            Err(DomainError::NotFound(_)) => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn enqueue(&self, note_id: &str, user_id: &str, action: &str, payload: TelegramSyncPayload) -> bool {
        let channel_id = payload.channel_id.clone();
        let result = match SyncTask::new(TELEGRAM_SERVICE, action, note_id, user_id, payload).into_queued() {
            Ok(task) => self.store.enqueue(TELEGRAM_SERVICE, &task).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!(note_id, channel_id = %channel_id, action, "Enqueued telegram sync task");
                true
            }
            Err(e) => {
                warn!(note_id, channel_id = %channel_id, action, error = %e, "Failed to enqueue telegram sync task");
                false
            }
        }
    }
}

fn delete_key(note_id: &str) -> String {
    RecentActivityTracker::key(&["delete", note_id])
}

fn telegram_payload(channel_id: &str, content: &str, message_id: Option<i64>) -> TelegramSyncPayload {
    TelegramSyncPayload {
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        message_id,
    }
}
