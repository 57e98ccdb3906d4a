//! SQLite persistence adapters.

pub mod achievement_repository;
pub mod category_repository;
pub mod connection;
pub mod event_repository;
pub mod migrations;
pub mod notification_repository;
pub mod progress_repository;
pub mod user_achievement_repository;

pub use achievement_repository::SqliteAchievementRepository;
pub use category_repository::SqliteCategoryRepository;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use event_repository::SqliteEventRepository;
pub use migrations::{all_embedded_migrations, Migration, MigrationError, Migrator};
pub use notification_repository::SqliteNotificationRepository;
pub use progress_repository::SqliteProgressRepository;
pub use user_achievement_repository::SqliteUserAchievementRepository;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Timestamps are written as RFC 3339 from Rust, but SQLite's
/// `datetime('now')` defaults produce `YYYY-MM-DD HH:MM:SS`; accept both.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| Utc.from_utc_datetime(&naive))
        })
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_both_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(parse_datetime("2026-03-01T12:30:00+00:00"), expected);
        assert_eq!(parse_datetime("2026-03-01 12:30:00"), expected);
    }
}
