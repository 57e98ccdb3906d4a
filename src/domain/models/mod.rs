//! Domain models
//!
//! Pure domain entities with validation rules. Framework-agnostic; no
//! infrastructure concerns.

pub mod achievement;
pub mod category;
pub mod config;
pub mod event;
pub mod notification;
pub mod progress;
pub mod user_achievement;

pub use achievement::{
    Achievement, AchievementPatch, AchievementType, CompareOp, Condition, Criteria, NewAchievement,
};
pub use category::{
    Category, CategoryNode, CategoryPatch, NewCategory, MAX_CATEGORY_LEVEL,
};
pub use config::{
    BackpressurePolicy, CacheConfig, DatabaseConfig, EngineConfig, EventRetentionConfig,
    NotificationConfig, ObservabilityConfig, RateLimitPolicy, TriggerEngineConfig,
};
pub use event::{event_types, EventFilter, EventRecord, EventStats, IncomingEvent};
pub use notification::{
    DeliveryStatus, GlobalNotificationSettings, NotificationDeliveryRecord, NotificationKind,
    NotificationPreference, ResolvedRoute,
};
pub use progress::{AchievementProgress, ProgressDelta, TransitionReport};
pub use user_achievement::{AchievementPopularity, UserAchievement, UserAchievementStats};
