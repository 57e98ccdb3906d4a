//! Category repository port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{Category, CategoryPatch, NewCategory};

/// Persistence interface for the category tree.
///
/// Tree *validation* (cycles, depth, duplicate names) lives in the catalog
/// service; implementations only guarantee the primitive operations and
/// their cascades.
#[async_trait]
pub trait CategoryRepository: Send + Sync {
    /// Insert a category at the given level. Fails `Conflict` on a
    /// duplicate `(parent_id, name)`.
    async fn create(&self, category: &NewCategory, level: i64) -> Result<Category, StorageError>;

    async fn get(&self, id: i64) -> Result<Option<Category>, StorageError>;

    /// Sibling lookup used for duplicate-name checks.
    async fn get_by_name(
        &self,
        parent_id: Option<i64>,
        name: &str,
    ) -> Result<Option<Category>, StorageError>;

    /// All categories ordered `(level, display_order, name)`.
    async fn list_all(&self, active_only: bool) -> Result<Vec<Category>, StorageError>;

    /// Direct children of `parent_id` (roots when `None`), ordered
    /// `(display_order, name)`.
    async fn list_children(
        &self,
        parent_id: Option<i64>,
        active_only: bool,
    ) -> Result<Vec<Category>, StorageError>;

    /// Apply a patch excluding re-parenting. Returns affected rows.
    async fn update(&self, id: i64, patch: &CategoryPatch) -> Result<u64, StorageError>;

    /// Move a node under a new parent and shift every level in its
    /// subtree by `level_delta`, atomically.
    async fn reparent(
        &self,
        id: i64,
        new_parent: Option<i64>,
        level_delta: i64,
    ) -> Result<u64, StorageError>;

    /// Ids of the whole subtree rooted at `id` (inclusive).
    async fn subtree_ids(&self, id: i64) -> Result<Vec<i64>, StorageError>;

    /// Highest level found inside the subtree rooted at `id`.
    async fn max_subtree_level(&self, id: i64) -> Result<i64, StorageError>;

    async fn count_children(&self, id: i64, active_only: bool) -> Result<u64, StorageError>;

    /// Flip `is_active` across the whole subtree. Returns affected rows.
    async fn set_active_subtree(&self, id: i64, active: bool) -> Result<u64, StorageError>;

    async fn set_expanded(&self, id: i64, expanded: bool) -> Result<u64, StorageError>;

    /// Hard delete; FK cascade removes descendant categories and their
    /// achievements (and those achievements' user rows).
    async fn delete(&self, id: i64) -> Result<u64, StorageError>;
}
