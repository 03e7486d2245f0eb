use crate::domain::errors::DomainResult;
use async_trait::async_trait;

/// Note columns holding comma-joined `account:externalId` entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternalIdField {
    TelegramMessageIds,
    MastodonStatusIds,
    FanfouStatusIds,
}

impl ExternalIdField {
    pub fn column(&self) -> &'static str {
        match self {
            ExternalIdField::TelegramMessageIds => "telegram_message_ids",
            ExternalIdField::MastodonStatusIds => "mastodon_status_ids",
            ExternalIdField::FanfouStatusIds => "fanfou_status_ids",
        }
    }
}

/// Narrow view of the note store used by sync code. Writes touch only the
/// named field, never the rest of the note.
#[async_trait]
pub trait NoteSyncRepository: Send + Sync {
    async fn external_ids(&self, note_id: &str, field: ExternalIdField) -> DomainResult<Vec<String>>;

    /// Add `entry` to the field unless already present.
    async fn append_external_id(&self, note_id: &str, field: ExternalIdField, entry: &str) -> DomainResult<()>;

    /// Remove `entry` from the field if present.
    async fn remove_external_id(&self, note_id: &str, field: ExternalIdField, entry: &str) -> DomainResult<()>;
}
