//! SQLite implementation of the `NotificationRepository` port.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{
    DeliveryStatus, GlobalNotificationSettings, NotificationDeliveryRecord, NotificationKind,
    NotificationPreference,
};
use crate::domain::ports::NotificationRepository;

#[derive(Clone)]
pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PreferenceRow {
    user_id: i64,
    guild_id: i64,
    dm_enabled: i64,
    announcement_enabled: i64,
    notification_types: String,
    updated_at: String,
}

fn row_to_preference(row: PreferenceRow) -> Result<NotificationPreference, StorageError> {
    let notification_types: Vec<String> = serde_json::from_str(&row.notification_types)
        .map_err(|e| StorageError::Integrity(format!("invalid notification_types: {e}")))?;
    Ok(NotificationPreference {
        user_id: row.user_id as u64,
        guild_id: row.guild_id as u64,
        dm_enabled: row.dm_enabled != 0,
        announcement_enabled: row.announcement_enabled != 0,
        notification_types,
        updated_at: parse_datetime(&row.updated_at),
    })
}

#[derive(Debug, sqlx::FromRow)]
struct SettingsRow {
    guild_id: i64,
    announcement_channel_id: Option<i64>,
    announcement_enabled: i64,
    rate_limit_seconds: i64,
    important_only: i64,
    updated_at: String,
}

impl From<SettingsRow> for GlobalNotificationSettings {
    fn from(row: SettingsRow) -> Self {
        GlobalNotificationSettings {
            guild_id: row.guild_id as u64,
            announcement_channel_id: row.announcement_channel_id.map(|id| id as u64),
            announcement_enabled: row.announcement_enabled != 0,
            rate_limit_seconds: row.rate_limit_seconds as u32,
            important_only: row.important_only != 0,
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRow {
    id: i64,
    user_id: i64,
    guild_id: i64,
    achievement_id: i64,
    notification_type: String,
    sent_at: String,
    delivery_status: String,
    error_message: Option<String>,
    retry_count: i64,
}

fn row_to_delivery(row: DeliveryRow) -> Result<NotificationDeliveryRecord, StorageError> {
    let kind = NotificationKind::from_str(&row.notification_type).ok_or_else(|| {
        StorageError::Integrity(format!(
            "unknown notification kind '{}'",
            row.notification_type
        ))
    })?;
    let status = DeliveryStatus::from_str(&row.delivery_status).ok_or_else(|| {
        StorageError::Integrity(format!("unknown delivery status '{}'", row.delivery_status))
    })?;

    Ok(NotificationDeliveryRecord {
        id: row.id,
        user_id: row.user_id as u64,
        guild_id: row.guild_id as u64,
        achievement_id: row.achievement_id,
        kind,
        sent_at: parse_datetime(&row.sent_at),
        status,
        error_message: row.error_message,
        retry_count: row.retry_count as u32,
    })
}

const DELIVERY_COLUMNS: &str = "id, user_id, guild_id, achievement_id, notification_type, \
     sent_at, delivery_status, error_message, retry_count";

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn get_preference(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<NotificationPreference>, StorageError> {
        let row: Option<PreferenceRow> = sqlx::query_as(
            "SELECT user_id, guild_id, dm_enabled, announcement_enabled, \
                    notification_types, updated_at \
             FROM notification_preferences WHERE user_id = ? AND guild_id = ?",
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        row.map(row_to_preference).transpose()
    }

    async fn upsert_preference(
        &self,
        preference: &NotificationPreference,
    ) -> Result<(), StorageError> {
        let types_json = serde_json::to_string(&preference.notification_types)
            .map_err(|e| StorageError::Unknown(format!("notification_types: {e}")))?;

        sqlx::query(
            "INSERT INTO notification_preferences \
                 (user_id, guild_id, dm_enabled, announcement_enabled, notification_types) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(user_id, guild_id) DO UPDATE SET \
                 dm_enabled = excluded.dm_enabled, \
                 announcement_enabled = excluded.announcement_enabled, \
                 notification_types = excluded.notification_types",
        )
        .bind(preference.user_id as i64)
        .bind(preference.guild_id as i64)
        .bind(i64::from(preference.dm_enabled))
        .bind(i64::from(preference.announcement_enabled))
        .bind(&types_json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_guild_settings(
        &self,
        guild_id: u64,
    ) -> Result<Option<GlobalNotificationSettings>, StorageError> {
        let row: Option<SettingsRow> = sqlx::query_as(
            "SELECT guild_id, announcement_channel_id, announcement_enabled, \
                    rate_limit_seconds, important_only, updated_at \
             FROM global_notification_settings WHERE guild_id = ?",
        )
        .bind(guild_id as i64)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(GlobalNotificationSettings::from))
    }

    async fn upsert_guild_settings(
        &self,
        settings: &GlobalNotificationSettings,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO global_notification_settings \
                 (guild_id, announcement_channel_id, announcement_enabled, \
                  rate_limit_seconds, important_only) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(guild_id) DO UPDATE SET \
                 announcement_channel_id = excluded.announcement_channel_id, \
                 announcement_enabled = excluded.announcement_enabled, \
                 rate_limit_seconds = excluded.rate_limit_seconds, \
                 important_only = excluded.important_only",
        )
        .bind(settings.guild_id as i64)
        .bind(settings.announcement_channel_id.map(|id| id as i64))
        .bind(i64::from(settings.announcement_enabled))
        .bind(i64::from(settings.rate_limit_seconds))
        .bind(i64::from(settings.important_only))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn create_delivery(
        &self,
        user_id: u64,
        guild_id: u64,
        achievement_id: i64,
        kind: NotificationKind,
    ) -> Result<NotificationDeliveryRecord, StorageError> {
        let result = sqlx::query(
            "INSERT INTO notification_events \
                 (user_id, guild_id, achievement_id, notification_type, sent_at, delivery_status) \
             VALUES (?, ?, ?, ?, ?, 'pending')",
        )
        .bind(user_id as i64)
        .bind(guild_id as i64)
        .bind(achievement_id)
        .bind(kind.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.get_delivery(result.last_insert_rowid())
            .await?
            .ok_or(StorageError::NotFound)
    }

    async fn update_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE notification_events \
             SET delivery_status = ?, error_message = ?, retry_count = ?, sent_at = ? \
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(i64::from(retry_count))
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_delivery(
        &self,
        id: i64,
    ) -> Result<Option<NotificationDeliveryRecord>, StorageError> {
        let sql = format!("SELECT {DELIVERY_COLUMNS} FROM notification_events WHERE id = ?");
        let row: Option<DeliveryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_delivery).transpose()
    }

    async fn list_deliveries_for_user(
        &self,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<NotificationDeliveryRecord>, StorageError> {
        let sql = format!(
            "SELECT {DELIVERY_COLUMNS} FROM notification_events \
             WHERE user_id = ? ORDER BY sent_at DESC LIMIT ?"
        );
        let rows: Vec<DeliveryRow> = sqlx::query_as(&sql)
            .bind(user_id as i64)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_delivery).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        all_embedded_migrations, create_test_pool, Migrator, SqliteAchievementRepository,
        SqliteCategoryRepository,
    };
    use crate::domain::models::{Criteria, NewAchievement, NewCategory};
    use crate::domain::ports::{AchievementRepository, CategoryRepository};

    async fn setup() -> (SqliteNotificationRepository, i64) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();

        let category = SqliteCategoryRepository::new(pool.clone())
            .create(
                &NewCategory {
                    name: "testing".to_string(),
                    description: String::new(),
                    parent_id: None,
                    display_order: 0,
                    icon_emoji: None,
                },
                0,
            )
            .await
            .unwrap();
        let achievement = SqliteAchievementRepository::new(pool.clone())
            .create(&NewAchievement {
                name: "chatty".to_string(),
                description: String::new(),
                category_id: category.id,
                criteria: Criteria::Counter {
                    target_value: 3.0,
                    counter_field: "messages".to_string(),
                },
                points: 10,
                badge_url: None,
                role_reward: None,
                is_hidden: false,
            })
            .await
            .unwrap();

        (SqliteNotificationRepository::new(pool), achievement.id)
    }

    #[tokio::test]
    async fn test_preference_upsert_round_trip() {
        let (repo, _) = setup().await;
        assert!(repo.get_preference(42, 500).await.unwrap().is_none());

        let mut preference = NotificationPreference::defaults(42, 500);
        preference.dm_enabled = false;
        preference.notification_types = vec!["milestone".to_string()];
        repo.upsert_preference(&preference).await.unwrap();

        let stored = repo.get_preference(42, 500).await.unwrap().unwrap();
        assert!(!stored.dm_enabled);
        assert_eq!(stored.notification_types, vec!["milestone".to_string()]);

        // Second upsert overwrites.
        preference.dm_enabled = true;
        repo.upsert_preference(&preference).await.unwrap();
        assert!(repo.get_preference(42, 500).await.unwrap().unwrap().dm_enabled);
    }

    #[tokio::test]
    async fn test_guild_settings_round_trip() {
        let (repo, _) = setup().await;
        let mut settings = GlobalNotificationSettings::defaults(500);
        settings.announcement_enabled = true;
        settings.announcement_channel_id = Some(123);
        settings.rate_limit_seconds = 30;
        repo.upsert_guild_settings(&settings).await.unwrap();

        let stored = repo.get_guild_settings(500).await.unwrap().unwrap();
        assert!(stored.announcement_enabled);
        assert_eq!(stored.announcement_channel_id, Some(123));
        assert_eq!(stored.rate_limit_seconds, 30);
    }

    #[tokio::test]
    async fn test_delivery_lifecycle() {
        let (repo, achievement_id) = setup().await;
        let record = repo
            .create_delivery(42, 500, achievement_id, NotificationKind::Dm)
            .await
            .unwrap();
        assert_eq!(record.status, DeliveryStatus::Pending);
        assert_eq!(record.retry_count, 0);

        repo.update_delivery(record.id, DeliveryStatus::Failed, Some("timeout"), 1)
            .await
            .unwrap();
        let failed = repo.get_delivery(record.id).await.unwrap().unwrap();
        assert_eq!(failed.status, DeliveryStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("timeout"));
        assert_eq!(failed.retry_count, 1);

        repo.update_delivery(record.id, DeliveryStatus::Sent, None, 1)
            .await
            .unwrap();
        let sent = repo.get_delivery(record.id).await.unwrap().unwrap();
        assert_eq!(sent.status, DeliveryStatus::Sent);

        let history = repo.list_deliveries_for_user(42, 10).await.unwrap();
        assert_eq!(history.len(), 1);
    }
}
