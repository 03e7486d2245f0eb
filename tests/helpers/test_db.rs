use notesync::domain::entities::{QueuedTask, SyncTask};
use notesync::infrastructure::persistence::{Database, QueueConfig, SqliteSyncQueueStore};
use serde_json::json;
use sqlx::Row;
use std::sync::Arc;
use tempfile::TempDir;

use super::clock::ManualClock;

/// A migrated SQLite database in its own temp directory. The directory is
/// removed when this is dropped, so keep it alive for the whole test.
pub struct TestDb {
    pub db: Database,
    _dir: TempDir,
}

pub async fn setup_test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("notesync.db");
    let db_url = format!("sqlite://{}?mode=rwc", path.display());

    let db = Database::connect(&db_url)
        .await
        .expect("Failed to connect to test database");
    db.run_migrations().await.expect("Failed to run migrations");

    TestDb { db, _dir: dir }
}

pub fn store_with(db: &Database, clock: Arc<ManualClock>, config: QueueConfig) -> SqliteSyncQueueStore {
    SqliteSyncQueueStore::new(db.clone(), config, clock)
}

pub fn store(db: &Database, clock: Arc<ManualClock>) -> SqliteSyncQueueStore {
    store_with(db, clock, QueueConfig::default())
}

pub fn task(service: &str, action: &str, entity_id: &str) -> QueuedTask {
    SyncTask::new(service, action, entity_id, "user-1", json!({ "n": entity_id }))
}

/// Insert a note. `None` leaves telegram_message_ids NULL, as for a note
/// that was never synced.
pub async fn insert_note(db: &Database, note_id: &str, telegram_message_ids: Option<&str>) {
    let query = match telegram_message_ids {
        Some(ids) => sqlx::query("INSERT INTO notes (id, user_id, content, telegram_message_ids) VALUES (?, ?, ?, ?)")
            .bind(note_id)
            .bind("user-1")
            .bind("hello")
            .bind(ids),
        None => sqlx::query("INSERT INTO notes (id, user_id, content) VALUES (?, ?, ?)")
            .bind(note_id)
            .bind("user-1")
            .bind("hello"),
    };
    query.execute(db.pool()).await.expect("Failed to insert note");
}

/// The note's telegram_message_ids column, NULL read as empty.
pub async fn note_telegram_ids(db: &Database, note_id: &str) -> String {
    let row = sqlx::query("SELECT COALESCE(telegram_message_ids, '') AS ids FROM notes WHERE id = ?")
        .bind(note_id)
        .fetch_one(db.pool())
        .await
        .expect("Failed to read note");
    row.try_get("ids").expect("Failed to read column")
}

/// Whether the note's telegram_message_ids column is still NULL.
pub async fn note_telegram_ids_is_null(db: &Database, note_id: &str) -> bool {
    let row = sqlx::query("SELECT telegram_message_ids IS NULL AS unset FROM notes WHERE id = ?")
        .bind(note_id)
        .fetch_one(db.pool())
        .await
        .expect("Failed to read note");
    let unset: i64 = row.try_get("unset").expect("Failed to read column");
    unset == 1
}

pub async fn note_content(db: &Database, note_id: &str) -> String {
    let row = sqlx::query("SELECT content FROM notes WHERE id = ?")
        .bind(note_id)
        .fetch_one(db.pool())
        .await
        .expect("Failed to read note");
    row.try_get("content").expect("Failed to read column")
}

pub async fn insert_telegram_channel(db: &Database, channel_id: &str, bot_token: &str, chat_id: &str) {
    sqlx::query("INSERT INTO telegram_channels (id, user_id, bot_token, chat_id) VALUES (?, ?, ?, ?)")
        .bind(channel_id)
        .bind("user-1")
        .bind(bot_token)
        .bind(chat_id)
        .execute(db.pool())
        .await
        .expect("Failed to insert channel");
}

/// Body of a stored task, as raw JSON text.
pub async fn stored_body(db: &Database, task_id: &str) -> Option<String> {
    sqlx::query("SELECT body FROM sync_tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(db.pool())
        .await
        .expect("Failed to read task")
        .map(|row| row.try_get("body").expect("Failed to read body"))
}

pub async fn stored_state(db: &Database, task_id: &str) -> Option<String> {
    sqlx::query("SELECT state FROM sync_tasks WHERE id = ?")
        .bind(task_id)
        .fetch_optional(db.pool())
        .await
        .expect("Failed to read task")
        .map(|row| row.try_get("state").expect("Failed to read state"))
}
