mod helpers;

use helpers::*;
use notesync::domain::entities::{actions, metadata_keys, RetryPolicy};
use notesync::domain::errors::DomainError;
use notesync::domain::ports::sync_queue::SyncQueueStore;
use notesync::domain::ports::time_service::TimeService;
use notesync::infrastructure::persistence::QueueConfig;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "telegram";

#[tokio::test]
async fn test_success_path_updates_stats() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    let a = task(SERVICE, actions::CREATE, "note-a");
    store.enqueue(SERVICE, &a).await.unwrap();
    assert_eq!(store.get_stats(SERVICE).await.unwrap().pending, 1);

    let dequeued = store.dequeue(SERVICE).await.unwrap().expect("task A");
    assert_eq!(dequeued, a);
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, 1);

    store.remove_from_processing(SERVICE, &dequeued, true).await.unwrap();
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.total_processed, 1);
    assert_eq!(stats.last_processed_at, Some(clock.now()));
    assert_eq!(stats.last_failed_at, None);
}

#[tokio::test]
async fn test_dequeue_empty_queue_has_no_side_effects() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    assert!(store.dequeue(SERVICE).await.unwrap().is_none());
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.live_tasks(), 0);
    assert_eq!(stats.total_processed, 0);
    assert_eq!(stats.total_failed, 0);
}

#[tokio::test]
async fn test_fifo_order_within_service() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    let mut ids = Vec::new();
    for n in ["a", "b", "c", "d"] {
        let t = task(SERVICE, actions::CREATE, n);
        store.enqueue(SERVICE, &t).await.unwrap();
        ids.push(t.id);
    }

    for expected in ids {
        let next = store.dequeue(SERVICE).await.unwrap().unwrap();
        assert_eq!(next.id, expected);
    }
    assert!(store.dequeue(SERVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_services_are_isolated() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    store.enqueue("mastodon", &task("mastodon", actions::CREATE, "n1")).await.unwrap();

    assert!(store.dequeue(SERVICE).await.unwrap().is_none());
    assert!(store.dequeue("mastodon").await.unwrap().is_some());
}

#[tokio::test]
async fn test_duplicate_task_id_is_a_conflict() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    let a = task(SERVICE, actions::CREATE, "note-a");
    store.enqueue(SERVICE, &a).await.unwrap();
    let err = store.enqueue(SERVICE, &a).await.unwrap_err();
    assert!(matches!(err, DomainError::Conflict(_)));
    assert_eq!(store.get_stats(SERVICE).await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_schedule_retry_then_promotion_on_dequeue() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    let b = task(SERVICE, actions::UPDATE, "note-b");
    store.enqueue(SERVICE, &b).await.unwrap();
    let b = store.dequeue(SERVICE).await.unwrap().unwrap();

    let delayed = store
        .schedule_retry(SERVICE, &b, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(delayed.attempt_count, 1);
    assert_eq!(
        delayed.scheduled_for,
        Some(clock.now() + chrono::Duration::seconds(60))
    );

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.delayed, 1);
    assert_eq!(stats.processing, 0);

    // Not due yet
    clock.advance_secs(30);
    assert!(store.dequeue(SERVICE).await.unwrap().is_none());

    clock.advance_secs(31);
    let again = store.dequeue(SERVICE).await.unwrap().expect("promoted task");
    assert_eq!(again.id, b.id);
    assert_eq!(again.attempt_count, 1);
    assert_eq!(again.scheduled_for, delayed.scheduled_for);
}

#[tokio::test]
async fn test_promotion_scan_is_throttled_per_service() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    let t = task(SERVICE, actions::CREATE, "note-t");
    store.enqueue(SERVICE, &t).await.unwrap();
    let t = store.dequeue(SERVICE).await.unwrap().unwrap();
    store.schedule_retry(SERVICE, &t, Duration::from_secs(1)).await.unwrap();

    // Due, but the scan already ran within the last 30s
    clock.advance_secs(5);
    assert!(store.dequeue(SERVICE).await.unwrap().is_none());
    assert_eq!(store.get_stats(SERVICE).await.unwrap().delayed, 1);

    // Explicit promotion ignores the throttle
    assert_eq!(store.promote_due_tasks(SERVICE).await.unwrap(), 1);
    assert_eq!(store.dequeue(SERVICE).await.unwrap().unwrap().id, t.id);
}

#[tokio::test]
async fn test_promotion_respects_batch_cap() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let config = QueueConfig {
        promotion_batch_size: 3,
        ..QueueConfig::default()
    };
    let store = store_with(&test_db.db, clock.clone(), config);

    for i in 0..10 {
        let t = task(SERVICE, actions::CREATE, &format!("note-{}", i));
        store.enqueue(SERVICE, &t).await.unwrap();
        let t = store.dequeue(SERVICE).await.unwrap().unwrap();
        store.schedule_retry(SERVICE, &t, Duration::from_secs(1)).await.unwrap();
    }
    clock.advance_secs(2);

    assert_eq!(store.promote_due_tasks(SERVICE).await.unwrap(), 3);
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.pending, 3);
    assert_eq!(stats.delayed, 7);
}

#[tokio::test]
async fn test_move_to_failed_records_error_and_counters() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    let t = task(SERVICE, actions::DELETE, "note-f");
    store.enqueue(SERVICE, &t).await.unwrap();
    let t = store.dequeue(SERVICE).await.unwrap().unwrap();
    store.move_to_failed(SERVICE, &t, "chat not found").await.unwrap();

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_failed, 1);
    assert_eq!(stats.total_processed, 0);
    assert_eq!(stats.last_failed_at, Some(clock.now()));

    let body = stored_body(&test_db.db, &t.id).await.unwrap();
    let stored: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stored["metadata"][metadata_keys::LAST_ERROR], "chat not found");
    assert!(stored["metadata"][metadata_keys::FAILED_AT].is_string());
}

#[tokio::test]
async fn test_failed_tasks_can_be_retried() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    for n in ["x", "y"] {
        let t = task(SERVICE, actions::CREATE, n);
        store.enqueue(SERVICE, &t).await.unwrap();
        let t = store.dequeue(SERVICE).await.unwrap().unwrap();
        store.move_to_failed(SERVICE, &t, "boom").await.unwrap();
    }

    assert_eq!(store.retry_failed_tasks(SERVICE).await.unwrap(), 2);
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.pending, 2);
    // Lifetime counter is history, not a queue length
    assert_eq!(stats.total_failed, 2);
    assert!(store.dequeue(SERVICE).await.unwrap().is_some());
}

#[tokio::test]
async fn test_remove_from_processing_is_keyed_by_id() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    let t = task(SERVICE, actions::CREATE, "note-k");
    store.enqueue(SERVICE, &t).await.unwrap();
    let mut dequeued = store.dequeue(SERVICE).await.unwrap().unwrap();

    // A handler-side copy that no longer serializes identically
    dequeued.metadata.insert("local".to_string(), "edit".to_string());
    store.remove_from_processing(SERVICE, &dequeued, false).await.unwrap();

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.total_processed, 0);
}

#[tokio::test]
async fn test_cleared_task_is_not_resurrected() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    for n in ["r", "f"] {
        store.enqueue(SERVICE, &task(SERVICE, actions::CREATE, n)).await.unwrap();
    }
    let retried = store.dequeue(SERVICE).await.unwrap().unwrap();
    let failed = store.dequeue(SERVICE).await.unwrap().unwrap();
    assert_eq!(store.clear_queue(SERVICE).await.unwrap(), 2);

    // In-flight handlers report back after the clear
    store.schedule_retry(SERVICE, &retried, Duration::from_secs(60)).await.unwrap();
    store.move_to_failed(SERVICE, &failed, "boom").await.unwrap();

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.live_tasks(), 0);
    assert_eq!(stats.total_failed, 0);
    assert!(stored_state(&test_db.db, &retried.id).await.is_none());
    assert!(stored_state(&test_db.db, &failed.id).await.is_none());
}

#[tokio::test]
async fn test_stale_worker_cannot_touch_reclaimed_lease() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    store.enqueue(SERVICE, &task(SERVICE, actions::CREATE, "slow")).await.unwrap();
    let stale = store.dequeue(SERVICE).await.unwrap().unwrap();

    // Lease expires, recovery reschedules, a second worker picks it up
    clock.advance_secs(301);
    let report = store
        .recover_expired_tasks(SERVICE, &RetryPolicy::default())
        .await
        .unwrap();
    assert_eq!(report.retried, 1);
    clock.advance_secs(3600);
    store.promote_due_tasks(SERVICE).await.unwrap();
    let current = store.dequeue(SERVICE).await.unwrap().unwrap();
    assert_eq!(current.id, stale.id);
    assert_eq!(current.attempt_count, 1);

    // The first worker finally fails; the second worker's lease is kept
    store.schedule_retry(SERVICE, &stale, Duration::from_secs(60)).await.unwrap();
    store.move_to_failed(SERVICE, &stale, "late").await.unwrap();
    store.remove_from_processing(SERVICE, &stale, false).await.unwrap();
    assert_eq!(stored_state(&test_db.db, &stale.id).await.as_deref(), Some("processing"));
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!((stats.processing, stats.delayed, stats.failed), (1, 0, 0));

    store.remove_from_processing(SERVICE, &current, true).await.unwrap();
    assert!(stored_state(&test_db.db, &stale.id).await.is_none());
}

#[tokio::test]
async fn test_clear_queue_drops_every_state() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    for n in ["p", "q", "r", "s"] {
        store.enqueue(SERVICE, &task(SERVICE, actions::CREATE, n)).await.unwrap();
    }
    let processing = store.dequeue(SERVICE).await.unwrap().unwrap();
    let failed = store.dequeue(SERVICE).await.unwrap().unwrap();
    store.move_to_failed(SERVICE, &failed, "boom").await.unwrap();
    let delayed = store.dequeue(SERVICE).await.unwrap().unwrap();
    store.schedule_retry(SERVICE, &delayed, Duration::from_secs(60)).await.unwrap();
    store.enqueue("mastodon", &task("mastodon", actions::CREATE, "m")).await.unwrap();

    assert_eq!(store.clear_queue(SERVICE).await.unwrap(), 4);
    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.live_tasks(), 0);
    assert_eq!(stats.total_failed, 1);
    assert!(stored_state(&test_db.db, &processing.id).await.is_none());
    assert_eq!(store.get_stats("mastodon").await.unwrap().pending, 1);
}

#[tokio::test]
async fn test_recover_expired_lease_reschedules() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());
    let policy = RetryPolicy::default();

    let c = task(SERVICE, actions::CREATE, "note-c");
    store.enqueue(SERVICE, &c).await.unwrap();
    store.dequeue(SERVICE).await.unwrap().unwrap();

    // Lease still valid
    clock.advance_secs(299);
    assert_eq!(store.recover_expired_tasks(SERVICE, &policy).await.unwrap().total(), 0);

    clock.advance_secs(1);
    let report = store.recover_expired_tasks(SERVICE, &policy).await.unwrap();
    assert_eq!(report.retried, 1);
    assert_eq!(report.failed, 0);

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.delayed, 1);

    let body = stored_body(&test_db.db, &c.id).await.unwrap();
    let stored: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stored["attempt_count"], 1);
    assert!(stored["metadata"][metadata_keys::RECOVERED_AT].is_string());

    // Already reclaimed: a second sweep finds nothing
    assert_eq!(store.recover_expired_tasks(SERVICE, &policy).await.unwrap().total(), 0);
}

#[tokio::test]
async fn test_recover_exhausted_lease_fails_task() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());
    let policy = RetryPolicy::default();

    let mut c = task(SERVICE, actions::CREATE, "note-c");
    c.attempt_count = policy.max_attempts;
    store.enqueue(SERVICE, &c).await.unwrap();
    store.dequeue(SERVICE).await.unwrap().unwrap();

    clock.advance_secs(301);
    let report = store.recover_expired_tasks(SERVICE, &policy).await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(report.retried, 0);

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.total_failed, 1);
}

#[tokio::test]
async fn test_recovery_discards_unreadable_entries() {
    let test_db = setup_test_db().await;
    let clock = Arc::new(ManualClock::new());
    let store = store(&test_db.db, clock.clone());

    sqlx::query(
        "INSERT INTO sync_tasks (id, service, state, queued_at, lease_expires_at, body, updated_at)
         VALUES ('broken', ?, 'processing', 0, 0, '{not json', 0)",
    )
    .bind(SERVICE)
    .execute(test_db.db.pool())
    .await
    .unwrap();
    let good = task(SERVICE, actions::CREATE, "note-g");
    store.enqueue(SERVICE, &good).await.unwrap();
    store.dequeue(SERVICE).await.unwrap().unwrap();

    clock.advance_secs(301);
    let report = store
        .recover_expired_tasks(SERVICE, &RetryPolicy::default())
        .await
        .unwrap();
    assert_eq!(report.discarded, 1);
    assert_eq!(report.retried, 1);
    assert!(stored_state(&test_db.db, "broken").await.is_none());
}

#[tokio::test]
async fn test_unreadable_pending_entry_is_parked_in_failed() {
    let test_db = setup_test_db().await;
    let store = store(&test_db.db, Arc::new(ManualClock::new()));

    sqlx::query(
        "INSERT INTO sync_tasks (id, service, state, queued_at, body, updated_at)
         VALUES ('garbled', ?, 'pending', 0, '[]', 0)",
    )
    .bind(SERVICE)
    .execute(test_db.db.pool())
    .await
    .unwrap();

    assert!(store.dequeue(SERVICE).await.is_err());
    assert_eq!(stored_state(&test_db.db, "garbled").await.as_deref(), Some("failed"));
    // The queue keeps working
    assert!(store.dequeue(SERVICE).await.unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_dequeue_hands_out_each_task_once() {
    let test_db = setup_test_db().await;
    let store = Arc::new(store(&test_db.db, Arc::new(ManualClock::new())));

    let total = 40;
    for i in 0..total {
        store
            .enqueue(SERVICE, &task(SERVICE, actions::CREATE, &format!("n{}", i)))
            .await
            .unwrap();
    }

    let mut workers = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        workers.push(tokio::spawn(async move {
            let mut got = Vec::new();
            while let Some(t) = store.dequeue(SERVICE).await.unwrap() {
                got.push(t.id);
            }
            got
        }));
    }

    let mut seen = HashSet::new();
    for worker in workers {
        for id in worker.await.unwrap() {
            assert!(seen.insert(id), "task handed out twice");
        }
    }
    assert_eq!(seen.len(), total);

    let stats = store.get_stats(SERVICE).await.unwrap();
    assert_eq!(stats.pending, 0);
    assert_eq!(stats.processing, total as u64);
    assert_eq!(stats.live_tasks(), total as u64);
}
