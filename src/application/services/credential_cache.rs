use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::domain::errors::DomainResult;
use crate::domain::ports::credential_source::{CredentialSource, TelegramCredential};

/// Read-mostly cache of platform credentials keyed by channel id.
///
/// Handlers resolve secrets here at processing time so that task payloads
/// never carry tokens. Misses fall through to the backing source.
#[derive(Clone)]
pub struct CredentialCache {
    source: Arc<dyn CredentialSource>,
    telegram: Arc<RwLock<HashMap<String, TelegramCredential>>>,
}

impl CredentialCache {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self {
            source,
            telegram: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn telegram(&self, channel_id: &str) -> DomainResult<Option<TelegramCredential>> {
        if let Some(credential) = self.telegram.read().await.get(channel_id) {
            return Ok(Some(credential.clone()));
        }

        let loaded = self.source.load_telegram_credential(channel_id).await?;
        if let Some(credential) = &loaded {
            debug!(channel_id, "Cached telegram credential");
            self.telegram
                .write()
                .await
                .insert(channel_id.to_string(), credential.clone());
        }
        Ok(loaded)
    }

    /// Drop a cached entry after the channel settings changed.
    pub async fn invalidate(&self, channel_id: &str) {
        self.telegram.write().await.remove(channel_id);
    }

    pub async fn len(&self) -> usize {
        self.telegram.read().await.len()
    }
}
