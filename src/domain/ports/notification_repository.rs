//! Notification persistence port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{
    DeliveryStatus, GlobalNotificationSettings, NotificationDeliveryRecord, NotificationKind,
    NotificationPreference,
};

/// Persistence interface for preferences, guild settings, and the
/// delivery log.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn get_preference(
        &self,
        user_id: u64,
        guild_id: u64,
    ) -> Result<Option<NotificationPreference>, StorageError>;

    async fn upsert_preference(
        &self,
        preference: &NotificationPreference,
    ) -> Result<(), StorageError>;

    async fn get_guild_settings(
        &self,
        guild_id: u64,
    ) -> Result<Option<GlobalNotificationSettings>, StorageError>;

    async fn upsert_guild_settings(
        &self,
        settings: &GlobalNotificationSettings,
    ) -> Result<(), StorageError>;

    /// Open a PENDING delivery record for an attempt.
    async fn create_delivery(
        &self,
        user_id: u64,
        guild_id: u64,
        achievement_id: i64,
        kind: NotificationKind,
    ) -> Result<NotificationDeliveryRecord, StorageError>;

    /// Update the outcome of an attempt. Returns affected rows.
    async fn update_delivery(
        &self,
        id: i64,
        status: DeliveryStatus,
        error_message: Option<&str>,
        retry_count: u32,
    ) -> Result<u64, StorageError>;

    async fn get_delivery(
        &self,
        id: i64,
    ) -> Result<Option<NotificationDeliveryRecord>, StorageError>;

    /// Delivery history for one user, newest first.
    async fn list_deliveries_for_user(
        &self,
        user_id: u64,
        limit: u32,
    ) -> Result<Vec<NotificationDeliveryRecord>, StorageError>;
}
