//! Domain ports (interfaces) for the achievement engine.

pub mod achievement_repository;
pub mod category_repository;
pub mod event_repository;
pub mod notification_repository;
pub mod notifier;
pub mod progress_repository;
pub mod user_achievement_repository;

pub use achievement_repository::{AchievementFilter, AchievementRepository};
pub use category_repository::CategoryRepository;
pub use event_repository::EventRepository;
pub use notification_repository::NotificationRepository;
pub use notifier::{DeliveryOutcome, NotificationPayload, Notifier};
pub use progress_repository::ProgressRepository;
pub use user_achievement_repository::UserAchievementRepository;
