//! Achievement repository port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{Achievement, AchievementPatch, AchievementType, NewAchievement};

/// Filter criteria for listing achievements.
#[derive(Debug, Clone, Default)]
pub struct AchievementFilter {
    pub category_id: Option<i64>,
    pub achievement_type: Option<AchievementType>,
    pub active_only: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AchievementFilter {
    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }
}

/// Persistence interface for achievement definitions.
#[async_trait]
pub trait AchievementRepository: Send + Sync {
    async fn create(&self, achievement: &NewAchievement) -> Result<Achievement, StorageError>;

    async fn get(&self, id: i64) -> Result<Option<Achievement>, StorageError>;

    async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>, StorageError>;

    /// Active achievements of one type; the trigger engine's candidate set.
    async fn list_active_by_type(
        &self,
        achievement_type: AchievementType,
    ) -> Result<Vec<Achievement>, StorageError>;

    async fn update(&self, id: i64, patch: &AchievementPatch) -> Result<u64, StorageError>;

    /// Hard delete; FK cascade removes user_achievements and progress.
    async fn delete(&self, id: i64) -> Result<u64, StorageError>;

    /// Cascade helper for category soft-deactivation.
    async fn set_active_by_categories(
        &self,
        category_ids: &[i64],
        active: bool,
    ) -> Result<u64, StorageError>;

    async fn count(&self, category_id: Option<i64>) -> Result<u64, StorageError>;
}
