//! SQLite implementation of the `CategoryRepository` port.

use async_trait::async_trait;
use sqlx::SqlitePool;

use super::parse_datetime;
use crate::domain::errors::StorageError;
use crate::domain::models::{Category, CategoryPatch, NewCategory};
use crate::domain::ports::CategoryRepository;

#[derive(Clone)]
pub struct SqliteCategoryRepository {
    pool: SqlitePool,
}

impl SqliteCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT_COLUMNS: &str = "id, name, description, parent_id, level, display_order, \
     icon_emoji, is_expanded, is_active, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct CategoryRow {
    id: i64,
    name: String,
    description: String,
    parent_id: Option<i64>,
    level: i64,
    display_order: i64,
    icon_emoji: Option<String>,
    is_expanded: i64,
    is_active: i64,
    created_at: String,
    updated_at: String,
}

impl From<CategoryRow> for Category {
    fn from(row: CategoryRow) -> Self {
        Category {
            id: row.id,
            name: row.name,
            description: row.description,
            parent_id: row.parent_id,
            level: row.level,
            display_order: row.display_order,
            icon_emoji: row.icon_emoji,
            is_expanded: row.is_expanded != 0,
            is_active: row.is_active != 0,
            created_at: parse_datetime(&row.created_at),
            updated_at: parse_datetime(&row.updated_at),
        }
    }
}

#[async_trait]
impl CategoryRepository for SqliteCategoryRepository {
    async fn create(&self, category: &NewCategory, level: i64) -> Result<Category, StorageError> {
        let result = sqlx::query(
            "INSERT INTO achievement_categories \
                 (name, description, parent_id, level, display_order, icon_emoji) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&category.name)
        .bind(&category.description)
        .bind(category.parent_id)
        .bind(level)
        .bind(category.display_order)
        .bind(&category.icon_emoji)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.get(id).await?.ok_or(StorageError::NotFound)
    }

    async fn get(&self, id: i64) -> Result<Option<Category>, StorageError> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM achievement_categories WHERE id = ?");
        let row: Option<CategoryRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Category::from))
    }

    async fn get_by_name(
        &self,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Option<Category>, StorageError> {
        let sql = match parent_id {
            Some(_) => format!(
                "SELECT {SELECT_COLUMNS} FROM achievement_categories \
                 WHERE parent_id = ? AND name = ?"
            ),
            None => format!(
                "SELECT {SELECT_COLUMNS} FROM achievement_categories \
                 WHERE parent_id IS NULL AND name = ?"
            ),
        };
        let mut query = sqlx::query_as::<_, CategoryRow>(&sql);
        if let Some(parent) = parent_id {
            query = query.bind(parent);
        }
        let row = query.bind(name).fetch_optional(&self.pool).await?;
        Ok(row.map(Category::from))
    }

    async fn list_all(&self, active_only: bool) -> Result<Vec<Category>, StorageError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM achievement_categories");
        if active_only {
            sql.push_str(" WHERE is_active = 1");
        }
        sql.push_str(" ORDER BY level ASC, display_order ASC, name ASC");

        let rows: Vec<CategoryRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn list_children(
        &self,
        parent_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<Category>, StorageError> {
        let mut sql = format!(
            "SELECT {SELECT_COLUMNS} FROM achievement_categories WHERE parent_id {}",
            if parent_id.is_some() { "= ?" } else { "IS NULL" }
        );
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        sql.push_str(" ORDER BY display_order ASC, name ASC");

        let mut query = sqlx::query_as::<_, CategoryRow>(&sql);
        if let Some(parent) = parent_id {
            query = query.bind(parent);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Category::from).collect())
    }

    async fn update(&self, id: i64, patch: &CategoryPatch) -> Result<u64, StorageError> {
        let mut sets: Vec<&str> = Vec::new();
        if patch.name.is_some() {
            sets.push("name = ?");
        }
        if patch.description.is_some() {
            sets.push("description = ?");
        }
        if patch.display_order.is_some() {
            sets.push("display_order = ?");
        }
        if patch.icon_emoji.is_some() {
            sets.push("icon_emoji = ?");
        }
        if sets.is_empty() {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE achievement_categories SET {} WHERE id = ?",
            sets.join(", ")
        );
        let mut query = sqlx::query(&sql);
        if let Some(ref name) = patch.name {
            query = query.bind(name);
        }
        if let Some(ref description) = patch.description {
            query = query.bind(description);
        }
        if let Some(display_order) = patch.display_order {
            query = query.bind(display_order);
        }
        if let Some(ref icon_emoji) = patch.icon_emoji {
            query = query.bind(icon_emoji.as_deref());
        }
        let result = query.bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn reparent(
        &self,
        id: i64,
        new_parent: Option<i64>,
        level_delta: i64,
    ) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query("UPDATE achievement_categories SET parent_id = ? WHERE id = ?")
            .bind(new_parent)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        if moved > 0 && level_delta != 0 {
            sqlx::query(
                "UPDATE achievement_categories SET level = level + ? WHERE id IN ( \
                     WITH RECURSIVE subtree(id) AS ( \
                         SELECT id FROM achievement_categories WHERE id = ? \
                         UNION ALL \
                         SELECT c.id FROM achievement_categories c \
                         JOIN subtree s ON c.parent_id = s.id \
                     ) SELECT id FROM subtree)",
            )
            .bind(level_delta)
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(moved)
    }

    async fn subtree_ids(&self, id: i64) -> Result<Vec<i64>, StorageError> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "WITH RECURSIVE subtree(id) AS ( \
                 SELECT id FROM achievement_categories WHERE id = ? \
                 UNION ALL \
                 SELECT c.id FROM achievement_categories c \
                 JOIN subtree s ON c.parent_id = s.id \
             ) SELECT id FROM subtree",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn max_subtree_level(&self, id: i64) -> Result<i64, StorageError> {
        let row: Option<(Option<i64>,)> = sqlx::query_as(
            "WITH RECURSIVE subtree(id, level) AS ( \
                 SELECT id, level FROM achievement_categories WHERE id = ? \
                 UNION ALL \
                 SELECT c.id, c.level FROM achievement_categories c \
                 JOIN subtree s ON c.parent_id = s.id \
             ) SELECT MAX(level) FROM subtree",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.and_then(|(level,)| level).unwrap_or(0))
    }

    async fn count_children(&self, id: i64, active_only: bool) -> Result<u64, StorageError> {
        let mut sql =
            "SELECT COUNT(*) FROM achievement_categories WHERE parent_id = ?".to_string();
        if active_only {
            sql.push_str(" AND is_active = 1");
        }
        let (count,): (i64,) = sqlx::query_as(&sql).bind(id).fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    async fn set_active_subtree(&self, id: i64, active: bool) -> Result<u64, StorageError> {
        let result = sqlx::query(
            "UPDATE achievement_categories SET is_active = ? WHERE id IN ( \
                 WITH RECURSIVE subtree(id) AS ( \
                     SELECT id FROM achievement_categories WHERE id = ? \
                     UNION ALL \
                     SELECT c.id FROM achievement_categories c \
                     JOIN subtree s ON c.parent_id = s.id \
                 ) SELECT id FROM subtree)",
        )
        .bind(i64::from(active))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn set_expanded(&self, id: i64, expanded: bool) -> Result<u64, StorageError> {
        let result = sqlx::query("UPDATE achievement_categories SET is_expanded = ? WHERE id = ?")
            .bind(i64::from(expanded))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: i64) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM achievement_categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
