//! Catalog service: category tree and achievement CRUD.
//!
//! Owns the tree invariants (no cycles, bounded depth, per-parent unique
//! names) and keeps the lookup cache coherent with write-through
//! invalidation.

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::adapters::cache::{CacheManager, CacheType};
use crate::domain::errors::{CatalogError, StorageError};
use crate::domain::models::{
    Achievement, AchievementPatch, Category, CategoryNode, CategoryPatch, NewAchievement,
    NewCategory, MAX_CATEGORY_LEVEL,
};
use crate::domain::ports::{AchievementFilter, AchievementRepository, CategoryRepository};

const MAX_NAME_LEN: usize = 100;
const MAX_ROLE_REWARD_LEN: usize = 100;

pub struct CatalogService {
    categories: Arc<dyn CategoryRepository>,
    achievements: Arc<dyn AchievementRepository>,
    cache: Arc<CacheManager>,
}

impl CatalogService {
    pub fn new(
        categories: Arc<dyn CategoryRepository>,
        achievements: Arc<dyn AchievementRepository>,
        cache: Arc<CacheManager>,
    ) -> Self {
        Self {
            categories,
            achievements,
            cache,
        }
    }

    // -- categories ---------------------------------------------------------

    #[instrument(skip(self, category), fields(name = %category.name))]
    pub async fn create_category(&self, category: NewCategory) -> Result<Category, CatalogError> {
        validate_name(&category.name)?;

        let level = match category.parent_id {
            Some(parent_id) => {
                let parent = self
                    .get_category(parent_id)
                    .await?
                    .ok_or(CatalogError::ParentMissing(parent_id))?;
                if parent.level >= MAX_CATEGORY_LEVEL {
                    return Err(CatalogError::DepthExceeded {
                        max: MAX_CATEGORY_LEVEL,
                    });
                }
                parent.level + 1
            }
            None => 0,
        };

        if self
            .categories
            .get_by_name(category.parent_id, &category.name)
            .await?
            .is_some()
        {
            return Err(CatalogError::DuplicateName {
                name: category.name,
                parent_id: category.parent_id,
            });
        }

        let created = self.categories.create(&category, level).await?;
        self.invalidate_tree_shape().await;
        info!(category_id = created.id, level, "category created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_category(
        &self,
        id: i64,
        patch: CategoryPatch,
    ) -> Result<Category, CatalogError> {
        let existing = self
            .get_category(id)
            .await?
            .ok_or(CatalogError::CategoryNotFound(id))?;

        if let Some(ref name) = patch.name {
            validate_name(name)?;
        }

        // Duplicate-name check against the parent the node will end up under.
        let target_parent = patch.parent_id.unwrap_or(existing.parent_id);
        let target_name = patch.name.clone().unwrap_or_else(|| existing.name.clone());
        if target_parent != existing.parent_id || patch.name.is_some() {
            if let Some(sibling) = self.categories.get_by_name(target_parent, &target_name).await? {
                if sibling.id != id {
                    return Err(CatalogError::DuplicateName {
                        name: target_name,
                        parent_id: target_parent,
                    });
                }
            }
        }

        if let Some(new_parent) = patch.parent_id {
            if new_parent != existing.parent_id {
                self.validate_move(&existing, new_parent).await?;
                let new_level = match new_parent {
                    Some(parent_id) => {
                        self.categories
                            .get(parent_id)
                            .await?
                            .ok_or(CatalogError::ParentMissing(parent_id))?
                            .level
                            + 1
                    }
                    None => 0,
                };
                self.categories
                    .reparent(id, new_parent, new_level - existing.level)
                    .await?;
            }
        }

        self.categories.update(id, &patch).await?;

        self.cache
            .invalidate(CacheType::CategoryById, &category_key(id))
            .await;
        self.invalidate_tree_shape().await;

        self.categories
            .get(id)
            .await?
            .ok_or(CatalogError::CategoryNotFound(id))
    }

    /// Reject moves that would create a cycle or overflow the depth bound.
    async fn validate_move(
        &self,
        category: &Category,
        new_parent: Option<i64>,
    ) -> Result<(), CatalogError> {
        let Some(parent_id) = new_parent else {
            return Ok(());
        };

        let parent = self
            .categories
            .get(parent_id)
            .await?
            .ok_or(CatalogError::ParentMissing(parent_id))?;

        // Depth-limited ancestor walk from the new parent; hitting the
        // moved node means it would become its own ancestor.
        let mut cursor = Some(parent.clone());
        let mut steps = 0;
        while let Some(node) = cursor {
            if node.id == category.id {
                return Err(CatalogError::CycleDetected(category.id));
            }
            steps += 1;
            if steps > MAX_CATEGORY_LEVEL + 1 {
                break;
            }
            cursor = match node.parent_id {
                Some(ancestor_id) => self.categories.get(ancestor_id).await?,
                None => None,
            };
        }

        let subtree_height = self.categories.max_subtree_level(category.id).await? - category.level;
        if parent.level + 1 + subtree_height > MAX_CATEGORY_LEVEL {
            return Err(CatalogError::DepthExceeded {
                max: MAX_CATEGORY_LEVEL,
            });
        }
        Ok(())
    }

    /// Hard delete. With `force`, the whole subtree goes and FK cascade
    /// removes its achievements plus their user rows; without it, any
    /// active child blocks the delete.
    #[instrument(skip(self))]
    pub async fn delete_category(&self, id: i64, force: bool) -> Result<(), CatalogError> {
        let _existing = self
            .get_category(id)
            .await?
            .ok_or(CatalogError::CategoryNotFound(id))?;

        if !force && self.categories.count_children(id, true).await? > 0 {
            return Err(CatalogError::HasChildren(id));
        }

        let subtree = self.categories.subtree_ids(id).await?;
        let deleted = self.categories.delete(id).await?;
        if deleted == 0 {
            return Err(CatalogError::CategoryNotFound(id));
        }

        for category_id in &subtree {
            self.cache
                .invalidate(CacheType::CategoryById, &category_key(*category_id))
                .await;
        }
        // Achievement ids under the subtree are gone from storage but not
        // enumerable anymore; drop the whole family.
        self.cache.invalidate_type(CacheType::AchievementById);
        self.invalidate_tree_shape().await;
        info!(category_id = id, subtree = subtree.len(), "category deleted");
        Ok(())
    }

    /// Soft lifecycle: flip `is_active` for the subtree and its
    /// achievements without deleting anything.
    #[instrument(skip(self))]
    pub async fn set_category_active(&self, id: i64, active: bool) -> Result<u64, CatalogError> {
        let affected = self.categories.set_active_subtree(id, active).await?;
        if affected == 0 {
            return Err(CatalogError::CategoryNotFound(id));
        }
        let subtree = self.categories.subtree_ids(id).await?;
        self.achievements
            .set_active_by_categories(&subtree, active)
            .await?;

        for category_id in &subtree {
            self.cache
                .invalidate(CacheType::CategoryById, &category_key(*category_id))
                .await;
        }
        self.cache.invalidate_type(CacheType::AchievementById);
        self.invalidate_tree_shape().await;
        Ok(affected)
    }

    pub async fn set_category_expanded(&self, id: i64, expanded: bool) -> Result<(), CatalogError> {
        if self.categories.set_expanded(id, expanded).await? == 0 {
            return Err(CatalogError::CategoryNotFound(id));
        }
        self.cache
            .invalidate(CacheType::CategoryById, &category_key(id))
            .await;
        Ok(())
    }

    pub async fn get_category(&self, id: i64) -> Result<Option<Category>, StorageError> {
        let key = category_key(id);
        if let Some(cached) = self.cache.get::<Category>(CacheType::CategoryById, &key).await {
            return Ok(Some(cached));
        }
        let category = self.categories.get(id).await?;
        if let Some(ref found) = category {
            self.cache.insert(CacheType::CategoryById, key, found).await;
        }
        Ok(category)
    }

    pub async fn list_root_categories(&self) -> Result<Vec<Category>, StorageError> {
        if let Some(cached) = self
            .cache
            .get::<Vec<Category>>(CacheType::RootCategories, "all")
            .await
        {
            return Ok(cached);
        }
        let roots = self.categories.list_children(None, true).await?;
        self.cache
            .insert(CacheType::RootCategories, "all", &roots)
            .await;
        Ok(roots)
    }

    pub async fn list_child_categories(
        &self,
        parent_id: i64,
    ) -> Result<Vec<Category>, StorageError> {
        let key = children_key(parent_id);
        if let Some(cached) = self
            .cache
            .get::<Vec<Category>>(CacheType::ChildrenByParent, &key)
            .await
        {
            return Ok(cached);
        }
        let children = self.categories.list_children(Some(parent_id), true).await?;
        self.cache
            .insert(CacheType::ChildrenByParent, key, &children)
            .await;
        Ok(children)
    }

    /// Ordered tree. With `root`, only that subtree; otherwise the forest
    /// of active roots. Siblings sort by `(display_order, name)`.
    pub async fn get_tree(&self, root: Option<i64>) -> Result<Vec<CategoryNode>, CatalogError> {
        let all = self.categories.list_all(true).await?;
        let mut children_of: std::collections::HashMap<Option<i64>, Vec<Category>> =
            std::collections::HashMap::new();
        for category in all {
            children_of.entry(category.parent_id).or_default().push(category);
        }

        fn build(
            parent: Option<i64>,
            children_of: &mut std::collections::HashMap<Option<i64>, Vec<Category>>,
        ) -> Vec<CategoryNode> {
            let Some(level) = children_of.remove(&parent) else {
                return Vec::new();
            };
            level
                .into_iter()
                .map(|category| {
                    let children = build(Some(category.id), children_of);
                    CategoryNode { category, children }
                })
                .collect()
        }

        match root {
            None => Ok(build(None, &mut children_of)),
            Some(root_id) => {
                let root_category = self
                    .get_category(root_id)
                    .await?
                    .ok_or(CatalogError::CategoryNotFound(root_id))?;
                let children = build(Some(root_id), &mut children_of);
                Ok(vec![CategoryNode {
                    category: root_category,
                    children,
                }])
            }
        }
    }

    /// Root-to-node path.
    pub async fn get_category_path(&self, id: i64) -> Result<Vec<Category>, CatalogError> {
        let mut path = Vec::new();
        let mut cursor = Some(
            self.get_category(id)
                .await?
                .ok_or(CatalogError::CategoryNotFound(id))?,
        );
        while let Some(node) = cursor {
            cursor = match node.parent_id {
                Some(parent_id) => self.get_category(parent_id).await?,
                None => None,
            };
            path.push(node);
            if path.len() as i64 > MAX_CATEGORY_LEVEL + 1 {
                break;
            }
        }
        path.reverse();
        Ok(path)
    }

    // -- achievements -------------------------------------------------------

    #[instrument(skip(self, achievement), fields(name = %achievement.name))]
    pub async fn create_achievement(
        &self,
        achievement: NewAchievement,
    ) -> Result<Achievement, CatalogError> {
        validate_name(&achievement.name)?;
        validate_role_reward(achievement.role_reward.as_deref())?;
        if achievement.points < 0 {
            return Err(CatalogError::Validation(format!(
                "points must be non-negative, got {}",
                achievement.points
            )));
        }
        achievement
            .criteria
            .validate(achievement.criteria.achievement_type())
            .map_err(CatalogError::Validation)?;

        self.get_category(achievement.category_id)
            .await?
            .ok_or(CatalogError::CategoryNotFound(achievement.category_id))?;

        let created = self.achievements.create(&achievement).await?;
        self.invalidate_tree_shape().await;
        info!(achievement_id = created.id, "achievement created");
        Ok(created)
    }

    #[instrument(skip(self, patch))]
    pub async fn update_achievement(
        &self,
        id: i64,
        patch: AchievementPatch,
    ) -> Result<Achievement, CatalogError> {
        if let Some(ref name) = patch.name {
            validate_name(name)?;
        }
        if let Some(ref role_reward) = patch.role_reward {
            validate_role_reward(role_reward.as_deref())?;
        }
        if let Some(points) = patch.points {
            if points < 0 {
                return Err(CatalogError::Validation(format!(
                    "points must be non-negative, got {points}"
                )));
            }
        }
        if let Some(ref criteria) = patch.criteria {
            criteria
                .validate(criteria.achievement_type())
                .map_err(CatalogError::Validation)?;
        }
        if let Some(category_id) = patch.category_id {
            self.get_category(category_id)
                .await?
                .ok_or(CatalogError::CategoryNotFound(category_id))?;
        }

        if self.achievements.update(id, &patch).await? == 0 {
            return Err(CatalogError::AchievementNotFound(id));
        }

        self.cache
            .invalidate(CacheType::AchievementById, &achievement_key(id))
            .await;
        self.invalidate_tree_shape().await;

        self.achievements
            .get(id)
            .await?
            .ok_or(CatalogError::AchievementNotFound(id))
    }

    #[instrument(skip(self))]
    pub async fn delete_achievement(&self, id: i64) -> Result<(), CatalogError> {
        if self.achievements.delete(id).await? == 0 {
            return Err(CatalogError::AchievementNotFound(id));
        }
        self.cache
            .invalidate(CacheType::AchievementById, &achievement_key(id))
            .await;
        self.invalidate_tree_shape().await;
        debug!(achievement_id = id, "achievement deleted");
        Ok(())
    }

    pub async fn get_achievement(&self, id: i64) -> Result<Option<Achievement>, StorageError> {
        let key = achievement_key(id);
        if let Some(cached) = self
            .cache
            .get::<Achievement>(CacheType::AchievementById, &key)
            .await
        {
            return Ok(Some(cached));
        }
        let achievement = self.achievements.get(id).await?;
        if let Some(ref found) = achievement {
            self.cache
                .insert(CacheType::AchievementById, key, found)
                .await;
        }
        Ok(achievement)
    }

    pub async fn list_achievements(
        &self,
        filter: &AchievementFilter,
    ) -> Result<Vec<Achievement>, StorageError> {
        self.achievements.list(filter).await
    }

    pub async fn count_achievements(&self, category_id: Option<i64>) -> Result<u64, StorageError> {
        self.achievements.count(category_id).await
    }

    async fn invalidate_tree_shape(&self) {
        self.cache.invalidate_type(CacheType::RootCategories);
        self.cache.invalidate_type(CacheType::ChildrenByParent);
    }
}

fn validate_name(name: &str) -> Result<(), CatalogError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(CatalogError::Validation("name must not be empty".to_string()));
    }
    if trimmed.len() > MAX_NAME_LEN {
        return Err(CatalogError::Validation(format!(
            "name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_role_reward(role_reward: Option<&str>) -> Result<(), CatalogError> {
    if let Some(role) = role_reward {
        if role.len() > MAX_ROLE_REWARD_LEN {
            return Err(CatalogError::Validation(format!(
                "role_reward exceeds {MAX_ROLE_REWARD_LEN} characters"
            )));
        }
    }
    Ok(())
}

fn category_key(id: i64) -> String {
    format!("category_by_id:{id}")
}

fn achievement_key(id: i64) -> String {
    format!("achievement_by_id:{id}")
}

fn children_key(parent_id: i64) -> String {
    format!("children_by_parent:{parent_id}")
}
