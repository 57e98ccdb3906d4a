//! Category domain model.
//!
//! Categories form a tree (bounded depth) that groups achievements for
//! display and administration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum category nesting level. Level 0 is a root; a node at level 9
/// cannot have children.
pub const MAX_CATEGORY_LEVEL: i64 = 9;

/// A node in the achievement category tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub description: String,
    /// `None` for roots.
    pub parent_id: Option<i64>,
    /// Derived: `parent.level + 1`, 0 for roots.
    pub level: i64,
    pub display_order: i64,
    pub icon_emoji: Option<String>,
    /// UI hint only; no semantics in the engine.
    pub is_expanded: bool,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted when creating a category.
#[derive(Debug, Clone, Default)]
pub struct NewCategory {
    pub name: String,
    pub description: String,
    pub parent_id: Option<i64>,
    pub display_order: i64,
    pub icon_emoji: Option<String>,
}

/// Partial update for a category. `None` fields are left untouched.
///
/// `parent_id` uses a double `Option`: the outer layer is "change or not",
/// the inner is the new parent (`None` re-roots the node).
#[derive(Debug, Clone, Default)]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<Option<i64>>,
    pub display_order: Option<i64>,
    pub icon_emoji: Option<Option<String>>,
}

impl CategoryPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.parent_id.is_none()
            && self.display_order.is_none()
            && self.icon_emoji.is_none()
    }
}

/// A category together with its ordered children, as returned by tree
/// queries. Siblings are ordered by `(display_order, name)`.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryNode {
    pub category: Category,
    pub children: Vec<CategoryNode>,
}

impl CategoryNode {
    /// Total number of nodes in this subtree, including self.
    pub fn size(&self) -> usize {
        1 + self.children.iter().map(CategoryNode::size).sum::<usize>()
    }

    /// Depth of this subtree (1 for a leaf).
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(CategoryNode::depth)
            .max()
            .unwrap_or(0)
    }
}
