//! SQLite implementation of the `ProgressRepository` port.
//!
//! `apply` is the heart of the engine: a single transaction reads the
//! live target, rewrites the row, and reports the threshold edge.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{
    AchievementProgress, AchievementType, Criteria, ProgressDelta, TransitionReport,
};
use crate::domain::ports::ProgressRepository;

#[derive(Clone)]
pub struct SqliteProgressRepository {
    pool: SqlitePool,
}

impl SqliteProgressRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str =
    "id, user_id, achievement_id, current_value, target_value, progress_data, last_updated";

#[derive(Debug, sqlx::FromRow)]
struct ProgressRow {
    id: i64,
    user_id: i64,
    achievement_id: i64,
    current_value: f64,
    target_value: f64,
    progress_data: Option<String>,
    last_updated: String,
}

fn row_to_progress(row: ProgressRow) -> Result<AchievementProgress, StorageError> {
    let progress_data = row
        .progress_data
        .as_deref()
        .map(serde_json::from_str)
        .transpose()
        .map_err(|e| StorageError::Integrity(format!("invalid progress_data: {e}")))?;

    Ok(AchievementProgress {
        id: row.id,
        user_id: row.user_id as u64,
        achievement_id: row.achievement_id,
        current_value: row.current_value,
        target_value: row.target_value,
        progress_data,
        last_updated: parse_datetime(&row.last_updated),
    })
}

/// The core read-modify-write: refresh the target from the live
/// definition, apply the delta, and compute the transition report, all
/// inside the caller's transaction.
async fn apply_in_tx(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_id: u64,
    achievement_id: i64,
    delta: &ProgressDelta,
) -> Result<(TransitionReport, AchievementProgress), StorageError> {
    let definition: Option<(String, String)> =
        sqlx::query_as("SELECT type, criteria FROM achievements WHERE id = ?")
            .bind(achievement_id)
            .fetch_optional(&mut **tx)
            .await?;
    let Some((type_str, criteria_json)) = definition else {
        return Err(StorageError::NotFound);
    };
    let achievement_type = AchievementType::from_str(&type_str)
        .ok_or_else(|| StorageError::Integrity(format!("unknown type '{type_str}'")))?;
    let target = Criteria::from_json(achievement_type, &criteria_json)
        .map_err(|e| StorageError::Integrity(format!("invalid criteria: {e}")))?
        .target_value();

    let select_sql = format!(
        "SELECT {SELECT_COLUMNS} FROM achievement_progress \
         WHERE user_id = ? AND achievement_id = ?"
    );
    let existing: Option<ProgressRow> = sqlx::query_as(&select_sql)
        .bind(user_id as i64)
        .bind(achievement_id)
        .fetch_optional(&mut **tx)
        .await?;

    let previous = existing.as_ref().map_or(0.0, |row| row.current_value);
    let existing_data = existing.and_then(|row| row.progress_data);

    let (current, data_json) = match delta {
        ProgressDelta::Set(value) => (value.max(0.0), existing_data),
        ProgressDelta::Inc(amount) => ((previous + amount).max(0.0), existing_data),
        ProgressDelta::Merge(data) => (
            previous,
            Some(serde_json::to_string(data).map_err(|e| {
                StorageError::Unknown(format!("progress_data serialization: {e}"))
            })?),
        ),
        ProgressDelta::SetWithData(value, data) => (
            value.max(0.0),
            Some(serde_json::to_string(data).map_err(|e| {
                StorageError::Unknown(format!("progress_data serialization: {e}"))
            })?),
        ),
    };

    sqlx::query(
        "INSERT INTO achievement_progress \
             (user_id, achievement_id, current_value, target_value, progress_data, last_updated) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(user_id, achievement_id) DO UPDATE SET \
             current_value = excluded.current_value, \
             target_value = excluded.target_value, \
             progress_data = excluded.progress_data, \
             last_updated = excluded.last_updated",
    )
    .bind(user_id as i64)
    .bind(achievement_id)
    .bind(current)
    .bind(target)
    .bind(&data_json)
    .bind(Utc::now().to_rfc3339())
    .execute(&mut **tx)
    .await?;

    let written: ProgressRow = sqlx::query_as(&select_sql)
        .bind(user_id as i64)
        .bind(achievement_id)
        .fetch_one(&mut **tx)
        .await?;

    let report = TransitionReport::new(previous, current, target);
    Ok((report, row_to_progress(written)?))
}

#[async_trait]
impl ProgressRepository for SqliteProgressRepository {
    async fn get(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<AchievementProgress>, StorageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_progress \
             WHERE user_id = ? AND achievement_id = ?"
        );
        let row: Option<ProgressRow> = sqlx::query_as(&sql)
            .bind(user_id as i64)
            .bind(achievement_id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_progress).transpose()
    }

    async fn list_for_user(
        &self,
        user_id: u64,
    ) -> Result<Vec<AchievementProgress>, StorageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_progress \
             WHERE user_id = ? ORDER BY last_updated DESC"
        );
        let rows: Vec<ProgressRow> = sqlx::query_as(&sql)
            .bind(user_id as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_progress).collect()
    }

    async fn apply(
        &self,
        user_id: u64,
        achievement_id: i64,
        delta: &ProgressDelta,
    ) -> Result<(TransitionReport, AchievementProgress), StorageError> {
        let mut tx = self.pool.begin().await?;
        let applied = apply_in_tx(&mut tx, user_id, achievement_id, delta).await?;
        tx.commit().await?;
        Ok(applied)
    }

    async fn apply_for_event(
        &self,
        user_id: u64,
        achievement_id: i64,
        delta: &ProgressDelta,
        event_id: i64,
    ) -> Result<Option<(TransitionReport, AchievementProgress)>, StorageError> {
        let mut tx = self.pool.begin().await?;

        // The dedup marker and the progress write commit together, so a
        // replayed event can never double-count.
        let marker = sqlx::query(
            "INSERT INTO achievement_event_applications (event_id, achievement_id, user_id) \
             VALUES (?, ?, ?) \
             ON CONFLICT(event_id, achievement_id) DO NOTHING",
        )
        .bind(event_id)
        .bind(achievement_id)
        .bind(user_id as i64)
        .execute(&mut *tx)
        .await?;

        if marker.rows_affected() == 0 {
            return Ok(None);
        }

        let applied = apply_in_tx(&mut tx, user_id, achievement_id, delta).await?;
        tx.commit().await?;
        Ok(Some(applied))
    }

    async fn delete(&self, user_id: u64, achievement_id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "DELETE FROM achievement_progress WHERE user_id = ? AND achievement_id = ?",
        )
        .bind(user_id as i64)
        .bind(achievement_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_all_for_user(&self, user_id: u64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM achievement_progress WHERE user_id = ?")
            .bind(user_id as i64)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn users_near_completion(
        &self,
        achievement_id: i64,
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<AchievementProgress>, StorageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_progress \
             WHERE achievement_id = ? \
               AND target_value > 0 \
               AND current_value < target_value \
               AND current_value / target_value >= ? \
             ORDER BY current_value / target_value DESC \
             LIMIT ?"
        );
        let rows: Vec<ProgressRow> = sqlx::query_as(&sql)
            .bind(achievement_id)
            .bind(threshold)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_progress).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{
        all_embedded_migrations, create_test_pool, Migrator, SqliteAchievementRepository,
        SqliteCategoryRepository,
    };
    use crate::domain::models::{NewAchievement, NewCategory};
    use crate::domain::ports::{AchievementRepository, CategoryRepository};
    use serde_json::json;

    async fn setup() -> (SqliteProgressRepository, i64) {
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

        (SqliteProgressRepository::new(pool), achievement.id)
    }

    #[tokio::test]
    async fn test_apply_inserts_then_updates() {
        let (repo, achievement_id) = setup().await;

        let (report, progress) = repo
            .apply(42, achievement_id, &ProgressDelta::Inc(1.0))
            .await
            .unwrap();
        assert_eq!(report.previous, 0.0);
        assert_eq!(report.current, 1.0);
        assert!(!report.crossed_threshold);
        assert_eq!(progress.current_value, 1.0);
        assert_eq!(progress.target_value, 3.0);

        let (report, _) = repo
            .apply(42, achievement_id, &ProgressDelta::Inc(1.0))
            .await
            .unwrap();
        assert_eq!(report.previous, 1.0);
        assert_eq!(report.current, 2.0);
    }

    #[tokio::test]
    async fn test_apply_reports_threshold_edge_exactly_once() {
        let (repo, achievement_id) = setup().await;

        for _ in 0..2 {
            repo.apply(42, achievement_id, &ProgressDelta::Inc(1.0))
                .await
                .unwrap();
        }
        let (report, _) = repo
            .apply(42, achievement_id, &ProgressDelta::Inc(1.0))
            .await
            .unwrap();
        assert!(report.crossed_threshold);

        // Past the target: no further edge.
        let (report, _) = repo
            .apply(42, achievement_id, &ProgressDelta::Inc(1.0))
            .await
            .unwrap();
        assert!(!report.crossed_threshold);
    }

    #[tokio::test]
    async fn test_apply_merge_keeps_value() {
        let (repo, achievement_id) = setup().await;
        repo.apply(42, achievement_id, &ProgressDelta::Inc(2.0))
            .await
            .unwrap();

        let (report, progress) = repo
            .apply(
                42,
                achievement_id,
                &ProgressDelta::Merge(json!({"streak_anchor": "2026-01-01"})),
            )
            .await
            .unwrap();
        assert_eq!(report.current, 2.0);
        assert_eq!(
            progress.progress_data,
            Some(json!({"streak_anchor": "2026-01-01"}))
        );
    }

    #[tokio::test]
    async fn test_apply_missing_achievement_is_not_found() {
        let (repo, _) = setup().await;
        let err = repo
            .apply(42, 9999, &ProgressDelta::Inc(1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_inc_clamps_at_zero() {
        let (repo, achievement_id) = setup().await;
        let (report, _) = repo
            .apply(42, achievement_id, &ProgressDelta::Inc(-5.0))
            .await
            .unwrap();
        assert_eq!(report.current, 0.0);
    }

    #[tokio::test]
    async fn test_apply_for_event_is_exactly_once() {
        let (repo, achievement_id) = setup().await;
        let events = crate::adapters::sqlite::SqliteEventRepository::new(repo.pool.clone());
        let event_id = crate::domain::ports::EventRepository::insert(
            &events,
            &crate::domain::models::IncomingEvent::new(
                42,
                500,
                crate::domain::models::event_types::MESSAGE_SENT,
            )
            .with_data(json!({"messages": 1})),
        )
        .await
        .unwrap();

        let first = repo
            .apply_for_event(42, achievement_id, &ProgressDelta::Inc(1.0), event_id)
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().0.current, 1.0);

        // Replaying the same event is a no-op.
        let replay = repo
            .apply_for_event(42, achievement_id, &ProgressDelta::Inc(1.0), event_id)
            .await
            .unwrap();
        assert!(replay.is_none());
        let progress = repo.get(42, achievement_id).await.unwrap().unwrap();
        assert_eq!(progress.current_value, 1.0);
    }

    #[tokio::test]
    async fn test_users_near_completion() {
        let (repo, achievement_id) = setup().await;
        repo.apply(1, achievement_id, &ProgressDelta::Set(2.5))
            .await
            .unwrap();
        repo.apply(2, achievement_id, &ProgressDelta::Set(1.0))
            .await
            .unwrap();
        repo.apply(3, achievement_id, &ProgressDelta::Set(3.0))
            .await
            .unwrap();

        let near = repo
            .users_near_completion(achievement_id, 0.8, 10)
            .await
            .unwrap();
        // User 3 completed (excluded); user 2 is below the threshold.
        assert_eq!(near.len(), 1);
        assert_eq!(near[0].user_id, 1);
    }
}
