//! Award service: the single at-most-once award path.
//!
//! The `(user_id, achievement_id)` unique constraint is the arbiter;
//! concurrent crossings resolve to one award and one `AlreadyAwarded`.
//! Awards are published on a broadcast channel after the insert commits,
//! so the router (and any role binder the host wires up) observes them
//! strictly after the row exists.

use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::errors::StorageError;
use crate::domain::models::{
    Achievement, AchievementPopularity, UserAchievement, UserAchievementStats,
};
use crate::domain::ports::{AchievementRepository, ProgressRepository, UserAchievementRepository};

/// In-process award signal.
#[derive(Debug, Clone)]
pub struct AwardEvent {
    pub user_achievement: UserAchievement,
    pub achievement: Achievement,
    pub guild_id: u64,
}

/// Result of an award attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    Awarded(UserAchievement),
    AlreadyAwarded,
    /// Progress has not reached the target.
    NotEligible,
}

pub struct AwardService {
    user_achievements: Arc<dyn UserAchievementRepository>,
    achievements: Arc<dyn AchievementRepository>,
    progress: Arc<dyn ProgressRepository>,
    awards_tx: broadcast::Sender<AwardEvent>,
}

impl AwardService {
    pub fn new(
        user_achievements: Arc<dyn UserAchievementRepository>,
        achievements: Arc<dyn AchievementRepository>,
        progress: Arc<dyn ProgressRepository>,
        channel_capacity: usize,
    ) -> Self {
        let (awards_tx, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            user_achievements,
            achievements,
            progress,
            awards_tx,
        }
    }

    /// Subscribe to award signals. Late subscribers only see awards
    /// granted after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<AwardEvent> {
        self.awards_tx.subscribe()
    }

    /// Idempotent award gated on progress. Repeated calls after success
    /// return `AlreadyAwarded` and never create a second row.
    #[instrument(skip(self))]
    pub async fn maybe_award(
        &self,
        user_id: u64,
        achievement_id: i64,
        guild_id: u64,
    ) -> Result<AwardOutcome, StorageError> {
        let Some(progress) = self.progress.get(user_id, achievement_id).await? else {
            return Ok(AwardOutcome::NotEligible);
        };
        if !progress.is_complete() {
            return Ok(AwardOutcome::NotEligible);
        }
        self.insert_award(user_id, achievement_id, guild_id).await
    }

    /// Admin path: award without the progress gate. Still idempotent.
    #[instrument(skip(self))]
    pub async fn award_directly(
        &self,
        user_id: u64,
        achievement_id: i64,
        guild_id: u64,
    ) -> Result<AwardOutcome, StorageError> {
        self.insert_award(user_id, achievement_id, guild_id).await
    }

    async fn insert_award(
        &self,
        user_id: u64,
        achievement_id: i64,
        guild_id: u64,
    ) -> Result<AwardOutcome, StorageError> {
        let achievement = self
            .achievements
            .get(achievement_id)
            .await?
            .ok_or(StorageError::NotFound)?;

        let Some(user_achievement) =
            self.user_achievements.try_award(user_id, achievement_id).await?
        else {
            return Ok(AwardOutcome::AlreadyAwarded);
        };

        info!(
            user_id,
            achievement_id,
            points = achievement.points,
            "achievement awarded"
        );

        // Insert is committed; failures past this point must not undo it.
        let event = AwardEvent {
            user_achievement: user_achievement.clone(),
            achievement,
            guild_id,
        };
        if self.awards_tx.send(event).is_err() {
            // No live subscriber. The notified flag stays false, so a
            // router started later can still reconcile.
            warn!(user_id, achievement_id, "award emitted with no subscribers");
        }

        Ok(AwardOutcome::Awarded(user_achievement))
    }

    pub async fn mark_notified(&self, user_achievement_id: i64) -> Result<(), StorageError> {
        self.user_achievements.mark_notified(user_achievement_id).await?;
        Ok(())
    }

    /// Admin revoke: removes the award row and any progress. Returns
    /// whether an award existed.
    #[instrument(skip(self))]
    pub async fn revoke(&self, user_id: u64, achievement_id: i64) -> Result<bool, StorageError> {
        let revoked = self.user_achievements.revoke(user_id, achievement_id).await? > 0;
        self.progress.delete(user_id, achievement_id).await?;
        Ok(revoked)
    }

    pub async fn list_for_user(&self, user_id: u64) -> Result<Vec<UserAchievement>, StorageError> {
        self.user_achievements.list_for_user(user_id).await
    }

    pub async fn user_stats(&self, user_id: u64) -> Result<UserAchievementStats, StorageError> {
        self.user_achievements.user_stats(user_id).await
    }

    pub async fn popular_achievements(
        &self,
        limit: u32,
    ) -> Result<Vec<AchievementPopularity>, StorageError> {
        self.user_achievements.popular(limit).await
    }
}
