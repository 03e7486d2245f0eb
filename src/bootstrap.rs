use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::application::services::{
    CredentialCache, RecentActivityTracker, SyncQueueAdminService, TelegramSyncNoteService,
};
use crate::config::Config;
use crate::domain::ports::credential_source::CredentialSource;
use crate::domain::ports::note_repository::NoteSyncRepository;
use crate::domain::ports::sync_handler::SyncHandler;
use crate::domain::ports::sync_queue::SyncQueueStore;
use crate::domain::ports::task_spawner::TaskSpawner;
use crate::domain::ports::telegram_client::TelegramClient;
use crate::domain::ports::time_service::TimeService;
use crate::infrastructure::persistence::{
    Database, SqlCredentialSource, SqlNoteSyncRepository, SqliteSyncQueueStore,
};
use crate::infrastructure::providers::HttpTelegramClient;
use crate::infrastructure::runtime::{TokioTaskSpawner, TokioTimeService};
use crate::infrastructure::workers::{SyncQueueProcessor, TelegramSyncHandler};

const TELEGRAM_HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const RECENT_ACTIVITY_CAPACITY: usize = 10_000;
const RECENT_ACTIVITY_WINDOW: Duration = Duration::from_secs(10);
const RECENT_ACTIVITY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the sync worker needs, wired against one database.
pub struct SyncRuntime {
    pub db: Database,
    pub store: Arc<dyn SyncQueueStore>,
    pub processor: Arc<SyncQueueProcessor>,
    pub admin: SyncQueueAdminService,
    pub telegram_notes: TelegramSyncNoteService,
    pub credentials: CredentialCache,
    pub recent_activity: RecentActivityTracker,
    pub task_spawner: Arc<dyn TaskSpawner>,
}

impl SyncRuntime {
    /// Start the background work: the recent-activity sweeper and the
    /// processor loops. Both stop when `cancel` fires; the returned handle
    /// completes once the processor has drained.
    pub fn start(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        self.recent_activity.spawn_sweeper(
            self.task_spawner.as_ref(),
            RECENT_ACTIVITY_SWEEP_INTERVAL,
            cancel.clone(),
        );

        let processor = self.processor.clone();
        tokio::spawn(async move {
            processor.run(cancel).await;
        })
    }
}

pub async fn build_sync_runtime(
    db: Database,
    config: &Config,
) -> Result<SyncRuntime, Box<dyn std::error::Error + Send + Sync>> {
    let task_spawner = Arc::new(TokioTaskSpawner::new()) as Arc<dyn TaskSpawner>;
    let time_service = Arc::new(TokioTimeService::new()) as Arc<dyn TimeService>;

    let store = Arc::new(SqliteSyncQueueStore::new(
        db.clone(),
        config.queue_config(),
        time_service.clone(),
    )) as Arc<dyn SyncQueueStore>;

    let notes = Arc::new(SqlNoteSyncRepository::new(db.clone())) as Arc<dyn NoteSyncRepository>;
    let credentials =
        CredentialCache::new(Arc::new(SqlCredentialSource::new(db.clone())) as Arc<dyn CredentialSource>);

    let telegram_client = Arc::new(HttpTelegramClient::new(
        config.telegram_api_base.clone(),
        TELEGRAM_HTTP_TIMEOUT,
    )?) as Arc<dyn TelegramClient>;
    let telegram_handler = Arc::new(TelegramSyncHandler::new(
        telegram_client,
        credentials.clone(),
        notes.clone(),
        config.telegram_retry_policy(),
    )) as Arc<dyn SyncHandler>;
    tracing::info!(
        max_attempts = config.telegram_max_retry_attempts,
        "Telegram sync handler registered"
    );

    let processor = Arc::new(
        SyncQueueProcessor::new(
            store.clone(),
            task_spawner.clone(),
            time_service.clone(),
            config.processor_config(),
        )
        .with_handler(telegram_handler),
    );

    let admin = SyncQueueAdminService::new(store.clone(), processor.handlers().to_vec());

    let recent_activity =
        RecentActivityTracker::new(RECENT_ACTIVITY_CAPACITY, RECENT_ACTIVITY_WINDOW, time_service);
    let telegram_notes = TelegramSyncNoteService::new(store.clone(), notes, recent_activity.clone());

    Ok(SyncRuntime {
        db,
        store,
        processor,
        admin,
        telegram_notes,
        credentials,
        recent_activity,
        task_spawner,
    })
}
