pub mod credential_cache;
pub mod queue_admin_service;
pub mod recent_activity;
pub mod telegram_sync_note_service;

pub use credential_cache::CredentialCache;
pub use queue_admin_service::{HealthReport, ServiceHealth, SyncQueueAdminService, DEFAULT_FAILED_THRESHOLD};
pub use recent_activity::RecentActivityTracker;
pub use telegram_sync_note_service::{NoteSnapshot, TelegramSyncNoteService};
