//! Shared fixtures and helpers for integration tests.

// Not every test binary exercises every helper.
#![allow(dead_code, unused_macros, unused_imports)]

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use accolade::adapters::sqlite::create_test_pool;
use accolade::domain::models::{
    Criteria, EngineConfig, NewAchievement, NewCategory,
};
use accolade::domain::ports::{DeliveryOutcome, NotificationPayload, Notifier};
use accolade::AchievementEngine;

/// A recorded outbound send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Dm { user_id: u64 },
    Announcement { guild_id: u64, channel_id: u64 },
}

/// Test notifier: records every send and replays scripted outcomes
/// (defaulting to `Ok` when the script runs dry).
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<Sent>>,
    dm_outcomes: Mutex<VecDeque<DeliveryOutcome>>,
    announcement_outcomes: Mutex<VecDeque<DeliveryOutcome>>,
}

impl RecordingNotifier {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            dm_outcomes: Mutex::new(VecDeque::new()),
            announcement_outcomes: Mutex::new(VecDeque::new()),
        })
    }

    pub async fn script_dm(&self, outcomes: impl IntoIterator<Item = DeliveryOutcome>) {
        self.dm_outcomes.lock().await.extend(outcomes);
    }

    pub async fn sent_dms(&self) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| matches!(s, Sent::Dm { .. }))
            .count()
    }

    pub async fn sent_announcements(&self) -> usize {
        self.sent
            .lock()
            .await
            .iter()
            .filter(|s| matches!(s, Sent::Announcement { .. }))
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_dm(&self, user_id: u64, _payload: &NotificationPayload) -> DeliveryOutcome {
        let outcome = self
            .dm_outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or(DeliveryOutcome::Ok);
        if outcome == DeliveryOutcome::Ok {
            self.sent.lock().await.push(Sent::Dm { user_id });
        }
        outcome
    }

    async fn send_announcement(
        &self,
        guild_id: u64,
        channel_id: u64,
        _payload: &NotificationPayload,
    ) -> DeliveryOutcome {
        let outcome = self
            .announcement_outcomes
            .lock()
            .await
            .pop_front()
            .unwrap_or(DeliveryOutcome::Ok);
        if outcome == DeliveryOutcome::Ok {
            self.sent
                .lock()
                .await
                .push(Sent::Announcement { guild_id, channel_id });
        }
        outcome
    }
}

/// Test config: fast replay, tiny backoff, in-memory database.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.engine.replay_interval_seconds = 1;
    config.engine.shutdown_grace_secs = 2;
    config.notifications.retry_backoff_base_seconds = 1;
    config.notifications.dm_rate_limit_seconds = 0;
    config
}

/// Build an engine on an in-memory database.
pub async fn test_engine(notifier: Arc<RecordingNotifier>) -> AchievementEngine {
    test_engine_with_config(notifier, test_config()).await
}

pub async fn test_engine_with_config(
    notifier: Arc<RecordingNotifier>,
    config: EngineConfig,
) -> AchievementEngine {
    let pool = create_test_pool().await.expect("test pool");
    AchievementEngine::build_with_pool(pool, config, notifier)
        .await
        .expect("engine build")
}

/// Create a category and a counter achievement under it; returns the
/// achievement id.
pub async fn seed_counter_achievement(
    engine: &AchievementEngine,
    name: &str,
    target: f64,
    points: i64,
) -> i64 {
    let category = engine
        .catalog
        .create_category(NewCategory {
            name: format!("{name}-category"),
            description: String::new(),
            parent_id: None,
            display_order: 0,
            icon_emoji: None,
        })
        .await
        .expect("category");

    engine
        .catalog
        .create_achievement(NewAchievement {
            name: name.to_string(),
            description: format!("{name} achievement"),
            category_id: category.id,
            criteria: Criteria::Counter {
                target_value: target,
                counter_field: "messages".to_string(),
            },
            points,
            badge_url: None,
            role_reward: None,
            is_hidden: false,
        })
        .await
        .expect("achievement")
        .id
}

/// Poll an async condition until it holds or the timeout elapses.
/// Expands inline so the condition can borrow freely.
macro_rules! wait_for {
    ($timeout:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + $timeout;
        let mut satisfied = false;
        while tokio::time::Instant::now() < deadline {
            if $cond {
                satisfied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
        satisfied
    }};
}
pub(crate) use wait_for;
