//! Event pipeline tests: dispatch durability, backpressure, batching,
//! the unprocessed cursor, and retention maintenance.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use accolade::domain::errors::EngineError;
use accolade::domain::models::{event_types, EventFilter, IncomingEvent};
use accolade::domain::ports::EventRepository;
use accolade::services::ARCHIVE_TABLE;
use common::{
    seed_counter_achievement, test_config, test_engine, test_engine_with_config, wait_for,
    RecordingNotifier,
};

fn message_event(user_id: u64) -> IncomingEvent {
    IncomingEvent::new(user_id, 500, event_types::MESSAGE_SENT).with_data(json!({"messages": 1}))
}

#[tokio::test]
async fn test_dispatch_is_durable_before_return() {
    let engine = test_engine(RecordingNotifier::new()).await;
    // Engine not started: nothing will consume the queue, but the event
    // must already be in the log when dispatch returns.
    let id = engine.trigger.dispatch(message_event(42)).await.unwrap();

    let record = engine.events().get(id).await.unwrap().unwrap();
    assert_eq!(record.user_id, 42);
    assert!(!record.processed);
}

#[tokio::test]
async fn test_dispatch_rejects_invalid_events() {
    let engine = test_engine(RecordingNotifier::new()).await;
    let err = engine
        .trigger
        .dispatch(IncomingEvent::new(42, 500, "  "))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidEvent(_)));

    let err = engine
        .trigger
        .dispatch(IncomingEvent::new(42, 500, event_types::MESSAGE_SENT).with_data(json!(17)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidEvent(_)));
}

#[tokio::test]
async fn test_reject_policy_sheds_without_persisting() {
    let mut config = test_config();
    config.engine.queue_capacity = 2;
    config.engine.backpressure = accolade::domain::models::BackpressurePolicy::Reject;
    let engine = test_engine_with_config(RecordingNotifier::new(), config).await;
    // Not started: the queue fills and stays full.

    engine.trigger.dispatch(message_event(1)).await.unwrap();
    engine.trigger.dispatch(message_event(2)).await.unwrap();
    let err = engine.trigger.dispatch(message_event(3)).await.unwrap_err();
    assert!(matches!(err, EngineError::Busy));

    // The shed event left no stray row behind.
    let stats = engine.events().stats().await.unwrap();
    assert_eq!(stats.total, 2);
}

#[tokio::test]
async fn test_batch_insert_and_guild_queries() {
    let engine = test_engine(RecordingNotifier::new()).await;
    let events: Vec<IncomingEvent> = (1..=4).map(message_event).collect();
    let ids = engine.events().insert_batch(&events).await.unwrap();
    assert_eq!(ids.len(), 4);

    let by_guild = engine
        .events()
        .list_by_guild(500, &EventFilter::with_limit(10))
        .await
        .unwrap();
    assert_eq!(by_guild.len(), 4);

    let by_user = engine
        .events()
        .list_by_user(2, &EventFilter::with_limit(10))
        .await
        .unwrap();
    assert_eq!(by_user.len(), 1);
}

#[tokio::test]
async fn test_mark_processed_counts_only_fresh_flips() {
    let engine = test_engine(RecordingNotifier::new()).await;
    let ids = engine
        .events()
        .insert_batch(&(1..=3).map(message_event).collect::<Vec<_>>())
        .await
        .unwrap();

    assert_eq!(engine.events().mark_processed(&ids).await.unwrap(), 3);
    // Idempotence: re-marking is a counted no-op.
    assert_eq!(engine.events().mark_processed(&ids).await.unwrap(), 0);
}

#[tokio::test]
async fn test_replay_drains_backlog_written_while_down() {
    let notifier = RecordingNotifier::new();
    let engine = test_engine(Arc::clone(&notifier)).await;
    let achievement_id = seed_counter_achievement(&engine, "backlog", 3.0, 10).await;

    // Backlog written while the engine was down.
    let events: Vec<IncomingEvent> = (0..3).map(|_| message_event(42)).collect();
    engine.events().insert_batch(&events).await.unwrap();

    engine.start().await;
    let drained = wait_for!(Duration::from_secs(5), {
        engine
            .events()
            .stats()
            .await
            .map(|stats| stats.unprocessed == 0)
            .unwrap_or(false)
    });
    assert!(drained, "replay should process the backlog");

    let progress = engine
        .tracker
        .get_progress(42, achievement_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.current_value, 3.0);
    assert_eq!(engine.awards.list_for_user(42).await.unwrap().len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_maintenance_archives_and_cleans() {
    let engine = test_engine(RecordingNotifier::new()).await;

    // Old processed event (archive candidate) and old unprocessed event
    // (cleanup candidate).
    let mut old_processed = message_event(1);
    old_processed.timestamp = Utc::now() - chrono::Duration::days(200);
    let mut old_unprocessed = message_event(2);
    old_unprocessed.timestamp = Utc::now() - chrono::Duration::days(200);
    let mut fresh = message_event(3);
    fresh.timestamp = Utc::now();

    let processed_id = engine.events().insert(&old_processed).await.unwrap();
    let unprocessed_id = engine.events().insert(&old_unprocessed).await.unwrap();
    let fresh_id = engine.events().insert(&fresh).await.unwrap();
    engine.events().mark_processed(&[processed_id]).await.unwrap();

    engine.maintenance.run_once().await.unwrap();

    // Archived out of the live table; stale unprocessed row deleted;
    // fresh row untouched.
    assert!(engine.events().get(processed_id).await.unwrap().is_none());
    assert!(engine.events().get(unprocessed_id).await.unwrap().is_none());
    assert!(engine.events().get(fresh_id).await.unwrap().is_some());

    let (archived,): (i64,) =
        sqlx::query_as(&format!("SELECT COUNT(*) FROM {ARCHIVE_TABLE}"))
            .fetch_one(engine.pool())
            .await
            .unwrap();
    assert_eq!(archived, 1);
}

#[tokio::test]
async fn test_shutdown_leaves_queued_events_for_next_start() {
    let notifier = RecordingNotifier::new();
    let engine = test_engine(Arc::clone(&notifier)).await;
    seed_counter_achievement(&engine, "paused", 10.0, 10).await;

    // Queue an event without starting, then shut down.
    engine.trigger.dispatch(message_event(42)).await.unwrap();
    engine.trigger.shutdown().await;

    let stats = engine.events().stats().await.unwrap();
    assert_eq!(stats.unprocessed, 1);

    // Dispatch after shutdown is refused.
    let err = engine.trigger.dispatch(message_event(42)).await.unwrap_err();
    assert!(matches!(err, EngineError::Shutdown));
}
