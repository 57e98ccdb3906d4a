//! End-to-end award flow: counter completion, concurrent crossings,
//! replay after a simulated crash, and award-service laws.

mod common;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use accolade::domain::models::{event_types, IncomingEvent, ProgressDelta};
use accolade::domain::ports::EventRepository;
use accolade::services::AwardOutcome;
use common::{seed_counter_achievement, test_engine, wait_for, RecordingNotifier};

fn message_event(user_id: u64, guild_id: u64) -> IncomingEvent {
    IncomingEvent::new(user_id, guild_id, event_types::MESSAGE_SENT)
        .with_data(json!({"messages": 1}))
}

#[tokio::test]
async fn test_simple_counter_award() {
    let notifier = RecordingNotifier::new();
    let engine = test_engine(Arc::clone(&notifier)).await;
    let achievement_id = seed_counter_achievement(&engine, "chatty", 3.0, 10).await;
    engine.start().await;

    for _ in 0..3 {
        engine.trigger.dispatch(message_event(42, 500)).await.unwrap();
    }

    let awarded = wait_for!(Duration::from_secs(5), {
        engine
            .awards
            .list_for_user(42)
            .await
            .map(|list| list.len() == 1)
            .unwrap_or(false)
    });
    assert!(awarded, "award did not land");

    let progress = engine
        .tracker
        .get_progress(42, achievement_id)
        .await
        .unwrap()
        .unwrap();
    assert!(progress.current_value >= 3.0);

    // Exactly one award row and one DM notification for it.
    let awards = engine.awards.list_for_user(42).await.unwrap();
    assert_eq!(awards.len(), 1);
    assert_eq!(awards[0].achievement_id, achievement_id);

    let notified = wait_for!(Duration::from_secs(5), notifier.sent_dms().await == 1);
    assert!(notified, "dm was not sent");
    let history = engine.router.delivery_history(42, 10).await.unwrap();
    assert_eq!(history.len(), 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_threshold_crossing_awards_once() {
    let notifier = RecordingNotifier::new();
    let engine = test_engine(Arc::clone(&notifier)).await;
    let achievement_id = seed_counter_achievement(&engine, "racer", 3.0, 10).await;
    engine.start().await;

    // Bring user 42 to the edge.
    for _ in 0..2 {
        engine.trigger.dispatch(message_event(42, 500)).await.unwrap();
    }
    let at_edge = wait_for!(Duration::from_secs(5), {
        engine
            .tracker
            .get_progress(42, achievement_id)
            .await
            .ok()
            .flatten()
            .is_some_and(|p| p.current_value == 2.0)
    });
    assert!(at_edge);

    // Two events racing across the threshold.
    let (a, b) = tokio::join!(
        engine.trigger.dispatch(message_event(42, 500)),
        engine.trigger.dispatch(message_event(42, 500)),
    );
    a.unwrap();
    b.unwrap();

    let settled = wait_for!(Duration::from_secs(5), {
        engine
            .tracker
            .get_progress(42, achievement_id)
            .await
            .ok()
            .flatten()
            .is_some_and(|p| p.current_value == 4.0)
    });
    assert!(settled, "both increments should land");

    let awards = engine.awards.list_for_user(42).await.unwrap();
    assert_eq!(awards.len(), 1, "unique constraint must hold one award");

    engine.shutdown().await;
}

#[tokio::test]
async fn test_maybe_award_laws() {
    let engine = test_engine(RecordingNotifier::new()).await;
    let achievement_id = seed_counter_achievement(&engine, "laws", 3.0, 10).await;

    // No progress row: not eligible.
    assert_eq!(
        engine.awards.maybe_award(7, achievement_id, 500).await.unwrap(),
        AwardOutcome::NotEligible
    );

    // Below target: not eligible.
    engine
        .tracker
        .apply(7, achievement_id, ProgressDelta::Set(2.0))
        .await
        .unwrap();
    assert_eq!(
        engine.awards.maybe_award(7, achievement_id, 500).await.unwrap(),
        AwardOutcome::NotEligible
    );

    // At target: awarded once, then AlreadyAwarded forever.
    engine
        .tracker
        .apply(7, achievement_id, ProgressDelta::Set(3.0))
        .await
        .unwrap();
    assert!(matches!(
        engine.awards.maybe_award(7, achievement_id, 500).await.unwrap(),
        AwardOutcome::Awarded(_)
    ));
    for _ in 0..3 {
        assert_eq!(
            engine.awards.maybe_award(7, achievement_id, 500).await.unwrap(),
            AwardOutcome::AlreadyAwarded
        );
    }
    assert_eq!(engine.awards.list_for_user(7).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_after_crash_is_idempotent() {
    let notifier = RecordingNotifier::new();
    let engine = test_engine(Arc::clone(&notifier)).await;
    let achievement_id = seed_counter_achievement(&engine, "crashy", 3.0, 10).await;

    // Simulate the pre-crash half: the event is durable, its delta was
    // applied and the award inserted, but mark_processed never ran.
    let mut event = message_event(42, 500);
    event.event_data = json!({"messages": 3});
    let event_id = engine.events().insert(&event).await.unwrap();
    let progress_repo =
        accolade::adapters::sqlite::SqliteProgressRepository::new(engine.pool().clone());
    accolade::domain::ports::ProgressRepository::apply_for_event(
        &progress_repo,
        42,
        achievement_id,
        &ProgressDelta::Inc(3.0),
        event_id,
    )
    .await
    .unwrap();
    engine.awards.maybe_award(42, achievement_id, 500).await.unwrap();
    let deliveries_before = engine.router.delivery_history(42, 10).await.unwrap().len();

    // Restart: replay picks the event up and re-applies it.
    engine.start().await;
    let replayed = wait_for!(Duration::from_secs(5), {
        engine
            .events()
            .get(event_id)
            .await
            .ok()
            .flatten()
            .is_some_and(|record| record.processed)
    });
    assert!(replayed, "replay should mark the event processed");

    // Exactly-once: the replayed delta did not double-count, the award
    // is still singular, and no new notification was produced.
    let progress = engine
        .tracker
        .get_progress(42, achievement_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(progress.current_value, 3.0);
    let awards = engine.awards.list_for_user(42).await.unwrap();
    assert_eq!(awards.len(), 1);
    let deliveries_after = engine.router.delivery_history(42, 10).await.unwrap().len();
    assert_eq!(deliveries_after, deliveries_before);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_admin_grant_and_revoke_events() {
    let engine = test_engine(RecordingNotifier::new()).await;
    let achievement_id = seed_counter_achievement(&engine, "granted", 5.0, 10).await;
    engine.start().await;

    let grant = IncomingEvent::new(42, 500, event_types::GRANTED)
        .with_data(json!({"achievement_id": achievement_id}));
    engine.trigger.dispatch(grant).await.unwrap();

    let granted = wait_for!(Duration::from_secs(5), {
        engine
            .awards
            .list_for_user(42)
            .await
            .map(|list| list.len() == 1)
            .unwrap_or(false)
    });
    assert!(granted);

    let revoke = IncomingEvent::new(42, 500, event_types::REVOKED)
        .with_data(json!({"achievement_id": achievement_id}));
    engine.trigger.dispatch(revoke).await.unwrap();

    let revoked = wait_for!(Duration::from_secs(5), {
        engine
            .awards
            .list_for_user(42)
            .await
            .map(|list| list.is_empty())
            .unwrap_or(false)
    });
    assert!(revoked);

    engine.shutdown().await;
}

#[tokio::test]
async fn test_unknown_event_type_is_processed_without_effect() {
    let engine = test_engine(RecordingNotifier::new()).await;
    seed_counter_achievement(&engine, "quiet", 3.0, 10).await;
    engine.start().await;

    let event = IncomingEvent::new(42, 500, "achievement.totally_unknown")
        .with_data(json!({"messages": 1}));
    let event_id = engine.trigger.dispatch(event).await.unwrap();

    let processed = wait_for!(Duration::from_secs(5), {
        engine
            .events()
            .get(event_id)
            .await
            .ok()
            .flatten()
            .is_some_and(|record| record.processed)
    });
    assert!(processed, "unknown types still reach the terminal state");
    assert!(engine.awards.list_for_user(42).await.unwrap().is_empty());

    engine.shutdown().await;
}
