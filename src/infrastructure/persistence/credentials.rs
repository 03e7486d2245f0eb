use async_trait::async_trait;
use sqlx::Row;

use crate::domain::errors::DomainResult;
use crate::domain::ports::credential_source::{CredentialSource, TelegramCredential};
use crate::infrastructure::persistence::Database;

/// Reads channel credentials from the `telegram_channels` table.
#[derive(Clone)]
pub struct SqlCredentialSource {
    db: Database,
}

impl SqlCredentialSource {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialSource for SqlCredentialSource {
    async fn load_telegram_credential(&self, channel_id: &str) -> DomainResult<Option<TelegramCredential>> {
        let row = sqlx::query("SELECT id, bot_token, chat_id FROM telegram_channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(self.db.pool())
            .await?;

        match row {
            Some(row) => Ok(Some(TelegramCredential {
                channel_id: row.try_get("id")?,
                bot_token: row.try_get("bot_token")?,
                chat_id: row.try_get("chat_id")?,
            })),
            None => Ok(None),
        }
    }
}
