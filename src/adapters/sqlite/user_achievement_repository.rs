//! SQLite implementation of the `UserAchievementRepository` port.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{AchievementPopularity, UserAchievement, UserAchievementStats};
use crate::domain::ports::UserAchievementRepository;

#[derive(Clone)]
pub struct SqliteUserAchievementRepository {
    pool: SqlitePool,
}

impl SqliteUserAchievementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserAchievementRow {
    id: i64,
    user_id: i64,
    achievement_id: i64,
    earned_at: String,
    notified: i64,
}

impl From<UserAchievementRow> for UserAchievement {
    fn from(row: UserAchievementRow) -> Self {
        UserAchievement {
            id: row.id,
            user_id: row.user_id as u64,
            achievement_id: row.achievement_id,
            earned_at: parse_datetime(&row.earned_at),
            notified: row.notified != 0,
        }
    }
}

#[async_trait]
impl UserAchievementRepository for SqliteUserAchievementRepository {
    async fn try_award(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<UserAchievement>, StorageError> {
        // The unique constraint is the arbiter: zero rows affected means
        // the award already existed, which is not an error here.
        let result = sqlx::query(
            "INSERT INTO user_achievements (user_id, achievement_id, earned_at, notified) \
             VALUES (?, ?, ?, 0) \
             ON CONFLICT(user_id, achievement_id) DO NOTHING",
        )
        .bind(user_id as i64)
        .bind(achievement_id)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(user_id, achievement_id).await
    }

    async fn get(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<UserAchievement>, StorageError> {
        let row: Option<UserAchievementRow> = sqlx::query_as(
            "SELECT id, user_id, achievement_id, earned_at, notified \
             FROM user_achievements WHERE user_id = ? AND achievement_id = ?",
        )
        .bind(user_id as i64)
        .bind(achievement_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserAchievement::from))
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<UserAchievement>, StorageError> {
        let row: Option<UserAchievementRow> = sqlx::query_as(
            "SELECT id, user_id, achievement_id, earned_at, notified \
             FROM user_achievements WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserAchievement::from))
    }

    async fn list_for_user(&self, user_id: u64) -> Result<Vec<UserAchievement>, StorageError> {
        let rows: Vec<UserAchievementRow> = sqlx::query_as(
            "SELECT id, user_id, achievement_id, earned_at, notified \
             FROM user_achievements WHERE user_id = ? ORDER BY earned_at DESC",
        )
        .bind(user_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(UserAchievement::from).collect())
    }

    async fn mark_notified(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE user_achievements SET notified = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn revoke(&self, user_id: u64, achievement_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM user_achievements WHERE user_id = ? AND achievement_id = ?",
        )
        .bind(user_id as i64)
        .bind(achievement_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn user_stats(&self, user_id: u64) -> Result<UserAchievementStats, StorageError> {
        let (earned_count, total_points): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(a.points), 0) \
             FROM user_achievements ua \
             JOIN achievements a ON a.id = ua.achievement_id \
             WHERE ua.user_id = ?",
        )
        .bind(user_id as i64)
        .fetch_one(&self.pool)
        .await?;

        Ok(UserAchievementStats {
            earned_count: earned_count as u64,
            total_points,
        })
    }

    async fn popular(&self, limit: u32) -> Result<Vec<AchievementPopularity>, StorageError> {
        let rows: Vec<(i64, i64)> = sqlx::query_as(
            "SELECT achievement_id, COUNT(*) AS earned \
             FROM user_achievements \
             GROUP BY achievement_id \
             ORDER BY earned DESC, achievement_id ASC \
             LIMIT ?",
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(achievement_id, earned_count)| AchievementPopularity {
                achievement_id,
                earned_count: earned_count as u64,
            })
            .collect())
    }
}
