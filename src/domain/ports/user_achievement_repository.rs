//! Earned-achievement repository port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{AchievementPopularity, UserAchievement, UserAchievementStats};

/// Persistence interface for award rows. Only the award service writes
/// through this port.
#[async_trait]
pub trait UserAchievementRepository: Send + Sync {
    /// Insert relying on the `(user_id, achievement_id)` unique
    /// constraint: `Ok(Some)` on a fresh award, `Ok(None)` when the row
    /// already existed.
    async fn try_award(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<UserAchievement>, StorageError>;

    async fn get(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<UserAchievement>, StorageError>;

    async fn get_by_id(&self, id: i64) -> Result<Option<UserAchievement>, StorageError>;

    /// Earned achievements for one user, newest first.
    async fn list_for_user(&self, user_id: u64) -> Result<Vec<UserAchievement>, StorageError>;

    async fn mark_notified(&self, id: i64) -> Result<u64, StorageError>;

    /// Admin revoke. Returns affected rows.
    async fn revoke(&self, user_id: u64, achievement_id: i64) -> Result<u64, StorageError>;

    async fn user_stats(&self, user_id: u64) -> Result<UserAchievementStats, StorageError>;

    /// Most-earned achievements, descending.
    async fn popular(&self, limit: u32) -> Result<Vec<AchievementPopularity>, StorageError>;
}
