use crate::domain::errors::DomainResult;
use async_trait::async_trait;

/// Secrets needed to post to one Telegram channel. Never stored in a task.
#[derive(Clone, PartialEq)]
pub struct TelegramCredential {
    pub channel_id: String,
    pub bot_token: String,
    pub chat_id: String,
}

impl std::fmt::Debug for TelegramCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramCredential")
            .field("channel_id", &self.channel_id)
            .field("bot_token", &"<redacted>")
            .field("chat_id", &self.chat_id)
            .finish()
    }
}

/// Backing source consulted by the credential cache on a miss.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    async fn load_telegram_credential(&self, channel_id: &str) -> DomainResult<Option<TelegramCredential>>;
}
