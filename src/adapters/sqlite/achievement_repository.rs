//! SQLite implementation of the `AchievementRepository` port.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{
    Achievement, AchievementPatch, AchievementType, Criteria, NewAchievement,
};
use crate::domain::ports::{AchievementFilter, AchievementRepository};

#[derive(Clone)]
pub struct SqliteAchievementRepository {
    pool: SqlitePool,
}

impl SqliteAchievementRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, name, description, category_id, type, criteria, points, \
     badge_url, role_reward, is_hidden, is_active, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct AchievementRow {
    id: i64,
    name: String,
    description: String,
    category_id: i64,
    #[sqlx(rename = "type")]
    achievement_type: String,
    criteria: String,
    points: i64,
    badge_url: Option<String>,
    role_reward: Option<String>,
    is_hidden: i64,
    is_active: i64,
    created_at: String,
    updated_at: String,
}

fn row_to_achievement(row: AchievementRow) -> Result<Achievement, StorageError> {
    let achievement_type = AchievementType::from_str(&row.achievement_type).ok_or_else(|| {
        StorageError::Integrity(format!("unknown achievement type '{}'", row.achievement_type))
    })?;
    let criteria = Criteria::from_json(achievement_type, &row.criteria)
        .map_err(|e| StorageError::Integrity(format!("invalid criteria: {e}")))?;

    Ok(Achievement {
        id: row.id,
        name: row.name,
        description: row.description,
        category_id: row.category_id,
        achievement_type,
        criteria,
        points: row.points,
        badge_url: row.badge_url,
        role_reward: row.role_reward,
        is_hidden: row.is_hidden != 0,
        is_active: row.is_active != 0,
        created_at: parse_datetime(&row.created_at),
        updated_at: parse_datetime(&row.updated_at),
    })
}

#[async_trait]
impl AchievementRepository for SqliteAchievementRepository {
    async fn create(&self, achievement: &NewAchievement) -> Result<Achievement, StorageError> {
        let criteria_json = serde_json::to_string(&achievement.criteria)
            .map_err(|e| StorageError::Unknown(format!("criteria serialization: {e}")))?;

        let result = sqlx::query(
            "INSERT INTO achievements \
                 (name, description, category_id, type, criteria, points, badge_url, \
                  role_reward, is_hidden) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&achievement.name)
        .bind(&achievement.description)
        .bind(achievement.category_id)
        .bind(achievement.criteria.achievement_type().as_str())
        .bind(&criteria_json)
        .bind(achievement.points)
        .bind(&achievement.badge_url)
        .bind(&achievement.role_reward)
        .bind(i64::from(achievement.is_hidden))
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id).await?.ok_or(StorageError::NotFound)
    }

    async fn get(&self, id: i64) -> Result<Option<Achievement>, StorageError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM achievements WHERE id = ?");
        let row: Option<AchievementRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_achievement).transpose()
    }

    async fn list(&self, filter: &AchievementFilter) -> Result<Vec<Achievement>, StorageError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM achievements WHERE 1 = 1");
        if filter.category_id.is_some() {
            sql.push_str(" AND category_id = ?");
        }
        if filter.achievement_type.is_some() {
            sql.push_str(" AND type = ?");
        }
        if filter.active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY category_id ASC, name ASC");
        if filter.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }
        if filter.offset.is_some() {
            sql.push_str(" OFFSET ?");
        }

        let mut query = sqlx::query_as::<_, AchievementRow>(&sql);
        if let Some(category_id) = filter.category_id {
            query = query.bind(category_id);
        }
        if let Some(ty) = filter.achievement_type {
            query = query.bind(ty.as_str());
        }
        if let Some(limit) = filter.limit {
            query = query.bind(i64::from(limit));
        }
        if let Some(offset) = filter.offset {
            query = query.bind(i64::from(offset));
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.into_iter().map(row_to_achievement).collect()
    }

    async fn list_active_by_type(
        &self,
        achievement_type: AchievementType,
    ) -> Result<Vec<Achievement>, StorageError> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievements \
             WHERE type = ? AND is_active = 1 ORDER BY id ASC"
        );
        let rows: Vec<AchievementRow> = sqlx::query_as(&sql)
            .bind(achievement_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(row_to_achievement).collect()
    }

    async fn update(&self, id: i64, patch: &AchievementPatch) -> Result<u64, StorageError> {
        let mut sets: Vec<&str> = Vec::new();
        if patch.name.is_some() {
            sets.push("name = ?");
        }
        if patch.description.is_some() {
            sets.push("description = ?");
        }
        if patch.category_id.is_some() {
            sets.push("category_id = ?");
        }
        if patch.criteria.is_some() {
            // Criteria and type always move together.
            sets.push("criteria = ?");
            sets.push("type = ?");
        }
        if patch.points.is_some() {
            sets.push("points = ?");
        }
        if patch.badge_url.is_some() {
            sets.push("badge_url = ?");
        }
        if patch.role_reward.is_some() {
            sets.push("role_reward = ?");
        }
        if patch.is_hidden.is_some() {
            sets.push("is_hidden = ?");
        }
        if patch.is_active.is_some() {
            sets.push("is_active = ?");
        }
        if sets.is_empty() {
            return Ok(0);
        }

        let criteria_json = match &patch.criteria {
            Some(criteria) => Some(
                serde_json::to_string(criteria)
                    .map_err(|e| StorageError::Unknown(format!("criteria serialization: {e}")))?,
            ),
            None => None,
        };

        let sql = format!("UPDATE achievements SET {} WHERE id = ?", sets.join(", "));
        let mut query = sqlx::query(&sql);
        if let Some(ref name) = patch.name {
            query = query.bind(name);
        }
        if let Some(ref description) = patch.description {
            query = query.bind(description);
        }
        if let Some(category_id) = patch.category_id {
            query = query.bind(category_id);
        }
        if let Some(ref criteria) = patch.criteria {
            query = query.bind(criteria_json.as_deref().unwrap_or_default());
            query = query.bind(criteria.achievement_type().as_str());
        }
        if let Some(points) = patch.points {
            query = query.bind(points);
        }
        if let Some(ref badge_url) = patch.badge_url {
            query = query.bind(badge_url.as_deref());
        }
        if let Some(ref role_reward) = patch.role_reward {
            query = query.bind(role_reward.as_deref());
        }
        if let Some(is_hidden) = patch.is_hidden {
            query = query.bind(i64::from(is_hidden));
        }
        if let Some(is_active) = patch.is_active {
            query = query.bind(i64::from(is_active));
        }

        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM achievements WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn set_active_by_categories(
        &self,
        category_ids: &[i64],
        active: bool,
    ) -> Result<u64, StorageError> {
        if category_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = vec!["?"; category_ids.len()].join(", ");
        let sql = format!(
            "UPDATE achievements SET is_active = ? WHERE category_id IN ({placeholders})"
        );
        let mut query = sqlx::query(&sql).bind(i64::from(active));
        for category_id in category_ids {
            query = query.bind(category_id);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn count(&self, category_id: Option<i64>) -> Result<u64, StorageError> {
        let (count,): (i64,) = match category_id {
            Some(category_id) => {
                sqlx::query_as("SELECT COUNT(*) FROM achievements WHERE category_id = ?")
                    .bind(category_id)
                    .fetch_one(&self.pool)
                    .await?
            }
            None => {
                sqlx::query_as("SELECT COUNT(*) FROM achievements")
                    .fetch_one(&self.pool)
                    .await?
            }
        };
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::{all_embedded_migrations, create_test_pool, Migrator};
    use crate::domain::models::NewCategory;
    use crate::domain::ports::CategoryRepository;

    async fn setup() -> (SqliteAchievementRepository, i64) {
        let pool = create_test_pool().await.unwrap();
        Migrator::new(pool.clone())
            .run_embedded_migrations(all_embedded_migrations())
            .await
            .unwrap();
        let categories = crate::adapters::sqlite::SqliteCategoryRepository::new(pool.clone());
        let category = categories
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
        (SqliteAchievementRepository::new(pool), category.id)
    }

    fn counter(name: &str, category_id: i64, target: f64) -> NewAchievement {
        NewAchievement {
            name: name.to_string(),
            description: String::new(),
            category_id,
            criteria: Criteria::Counter {
                target_value: target,
                counter_field: "messages".to_string(),
            },
            points: 10,
            badge_url: None,
            role_reward: None,
            is_hidden: false,
        }
    }

    #[tokio::test]
    async fn test_create_round_trips_criteria() {
        let (repo, category_id) = setup().await;
        let created = repo.create(&counter("chatty", category_id, 3.0)).await.unwrap();
        assert_eq!(created.achievement_type, AchievementType::Counter);
        assert_eq!(created.criteria.target_value(), 3.0);

        let fetched = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(fetched, created);
    }

    #[tokio::test]
    async fn test_update_criteria_moves_type() {
        let (repo, category_id) = setup().await;
        let created = repo.create(&counter("chatty", category_id, 3.0)).await.unwrap();

        let patch = AchievementPatch {
            criteria: Some(Criteria::Milestone {
                target_value: 50.0,
                milestone_type: "voice_minutes".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(repo.update(created.id, &patch).await.unwrap(), 1);

        let updated = repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(updated.achievement_type, AchievementType::Milestone);
        assert_eq!(updated.criteria.target_value(), 50.0);
    }

    #[tokio::test]
    async fn test_list_active_by_type() {
        let (repo, category_id) = setup().await;
        let a = repo.create(&counter("a", category_id, 1.0)).await.unwrap();
        let b = repo.create(&counter("b", category_id, 2.0)).await.unwrap();
        repo.update(
            b.id,
            &AchievementPatch {
                is_active: Some(false),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let active = repo.list_active_by_type(AchievementType::Counter).await.unwrap();
        assert_eq!(active.iter().map(|x| x.id).collect::<Vec<_>>(), vec![a.id]);
    }

    #[tokio::test]
    async fn test_missing_category_is_integrity_error() {
        let (repo, _) = setup().await;
        let err = repo.create(&counter("orphan", 9999, 1.0)).await.unwrap_err();
        assert!(matches!(err, StorageError::Integrity(_)));
    }

    #[tokio::test]
    async fn test_count_by_category() {
        let (repo, category_id) = setup().await;
        repo.create(&counter("a", category_id, 1.0)).await.unwrap();
        repo.create(&counter("b", category_id, 2.0)).await.unwrap();
        assert_eq!(repo.count(Some(category_id)).await.unwrap(), 2);
        assert_eq!(repo.count(None).await.unwrap(), 2);
    }
}
