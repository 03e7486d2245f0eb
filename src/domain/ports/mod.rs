pub mod credential_source;
pub mod note_repository;
pub mod sync_handler;
pub mod sync_queue;
pub mod task_spawner;
pub mod telegram_client;
pub mod time_service;
