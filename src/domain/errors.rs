//! Error taxonomy for the achievement engine.
//!
//! One thiserror enum per concern, each with transience helpers so
//! callers can decide between retry, absorb, and surface.

use thiserror::Error;

/// Storage-level failures, classified from the underlying driver.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Uniqueness or other constraint conflict.
    #[error("Storage conflict: {0}")]
    Conflict(String),

    /// Referenced row missing.
    #[error("Row not found")]
    NotFound,

    /// Referential-integrity violation (foreign key, check).
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Pool borrow or statement deadline exceeded.
    #[error("Storage timeout")]
    Timeout,

    #[error("Storage error: {0}")]
    Unknown(String),
}

impl StorageError {
    /// Transient failures are retried by the event pipeline; the rest
    /// surface to the caller.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Unknown(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::PoolTimedOut => Self::Timeout,
            sqlx::Error::Database(db) => {
                if db.is_unique_violation() {
                    Self::Conflict(db.message().to_string())
                } else if db.is_foreign_key_violation() || db.is_check_violation() {
                    Self::Integrity(db.message().to_string())
                } else {
                    Self::Unknown(db.message().to_string())
                }
            }
            _ => Self::Unknown(err.to_string()),
        }
    }
}

/// Catalog (category/achievement CRUD) failures.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Bad input: empty name, negative target, oversized field.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Category not found: {0}")]
    CategoryNotFound(i64),

    #[error("Achievement not found: {0}")]
    AchievementNotFound(i64),

    /// Sibling with the same name already exists under this parent.
    #[error("Duplicate name '{name}' under parent {parent_id:?}")]
    DuplicateName {
        name: String,
        parent_id: Option<i64>,
    },

    #[error("Parent category not found: {0}")]
    ParentMissing(i64),

    /// Re-parenting would make the node its own ancestor.
    #[error("Cycle detected: category {0} cannot become its own descendant")]
    CycleDetected(i64),

    /// The move would push some node past the maximum level.
    #[error("Depth exceeded: category tree is limited to {max} levels")]
    DepthExceeded { max: i64 },

    /// Non-forced delete on a category with active children.
    #[error("Category {0} has children; use force to cascade")]
    HasChildren(i64),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl CatalogError {
    pub const fn is_conflict(&self) -> bool {
        matches!(
            self,
            Self::DuplicateName { .. }
                | Self::CycleDetected(_)
                | Self::DepthExceeded { .. }
                | Self::HasChildren(_)
        )
    }
}

/// Trigger-engine pipeline failures.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input queue full and the producer opted out of blocking.
    #[error("Event queue is full")]
    Busy,

    /// Event failed shape validation before persistence.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Engine is shutting down; no new events accepted.
    #[error("Engine is shut down")]
    Shutdown,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// An evaluator misbehaved on one candidate. The event is still marked
/// processed; this is logged, never surfaced to the dispatcher.
#[derive(Debug, Error)]
#[error("Evaluator for achievement {achievement_id} failed: {message}")]
pub struct EvaluatorError {
    pub achievement_id: i64,
    pub message: String,
}

/// Notification delivery failures, as classified from the sink result.
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Worth retrying with backoff (network blip, rate limit upstream).
    #[error("Transient delivery failure: {0}")]
    Transient(String),

    /// Terminal (forbidden DM, unknown channel). No retry.
    #[error("Permanent delivery failure: {0}")]
    Permanent(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl NotifyError {
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_transience() {
        assert!(StorageError::Timeout.is_transient());
        assert!(StorageError::Unknown("disk".to_string()).is_transient());
        assert!(!StorageError::Conflict("unique".to_string()).is_transient());
        assert!(!StorageError::NotFound.is_transient());
    }

    #[test]
    fn test_catalog_conflicts() {
        assert!(CatalogError::CycleDetected(1).is_conflict());
        assert!(CatalogError::DepthExceeded { max: 9 }.is_conflict());
        assert!(CatalogError::HasChildren(3).is_conflict());
        assert!(!CatalogError::CategoryNotFound(1).is_conflict());
    }

    #[test]
    fn test_notify_transience() {
        assert!(NotifyError::Transient("timeout".to_string()).is_transient());
        assert!(!NotifyError::Permanent("forbidden".to_string()).is_transient());
    }

    #[test]
    fn test_row_not_found_maps_to_not_found() {
        let err = StorageError::from(sqlx::Error::RowNotFound);
        assert!(matches!(err, StorageError::NotFound));
    }
}
