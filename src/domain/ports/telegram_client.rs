use crate::domain::ports::credential_source::TelegramCredential;
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Markdown,
    Plain,
}

/// Failure classes a platform call can end in.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PlatformError {
    /// Target message or chat does not exist (or can no longer be touched).
    #[error("not found: {0}")]
    NotFound(String),
    /// Formatted text rejected by the entity parser.
    #[error("can't parse entities: {0}")]
    ParseEntities(String),
    /// Edit with identical content.
    #[error("message is not modified")]
    NotModified,
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Request refused for a reason retrying won't change.
    #[error("rejected: {0}")]
    Rejected(String),
    /// Network error, 5xx or similar.
    #[error("transient failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait TelegramClient: Send + Sync {
    /// Returns the id of the posted message.
    async fn send_message(
        &self,
        credential: &TelegramCredential,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<i64, PlatformError>;

    async fn edit_message(
        &self,
        credential: &TelegramCredential,
        message_id: i64,
        text: &str,
        parse_mode: ParseMode,
    ) -> Result<(), PlatformError>;

    async fn delete_message(&self, credential: &TelegramCredential, message_id: i64) -> Result<(), PlatformError>;

    /// Upload `contents` as a file; returns the id of the posted message.
    async fn send_document(
        &self,
        credential: &TelegramCredential,
        file_name: &str,
        contents: Vec<u8>,
        caption: &str,
    ) -> Result<i64, PlatformError>;
}
