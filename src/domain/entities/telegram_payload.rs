use serde::{Deserialize, Serialize};

/// Queue namespace of the Telegram channel mirror.
pub const TELEGRAM_SERVICE: &str = "telegram";

/// Payload of a `telegram` task. Credentials are looked up by `channel_id`,
/// never carried here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelegramSyncPayload {
    pub channel_id: String,
    #[serde(default)]
    pub content: String,
    /// Remote message, required for UPDATE and DELETE.
    #[serde(default)]
    pub message_id: Option<i64>,
}
