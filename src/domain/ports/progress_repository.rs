//! Progress repository port.

use async_trait::async_trait;

use crate::domain::errors::StorageError;
use crate::domain::models::{AchievementProgress, ProgressDelta, TransitionReport};

/// Persistence interface for per-user progress rows.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    async fn get(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<AchievementProgress>, StorageError>;

    async fn list_for_user(&self, user_id: u64)
        -> Result<Vec<AchievementProgress>, StorageError>;

    /// Atomic read-modify-write of one progress row.
    ///
    /// In a single transaction: re-reads `target_value` from the live
    /// achievement definition, reads the current row (inserting if
    /// absent), applies the delta, and computes the transition report
    /// before commit. Fails `NotFound` if the achievement is gone.
    ///
    /// Callers serialize per `(user_id, achievement_id)`; the unique
    /// constraint backstops lost races.
    async fn apply(
        &self,
        user_id: u64,
        achievement_id: i64,
        delta: &ProgressDelta,
    ) -> Result<(TransitionReport, AchievementProgress), StorageError>;

    /// Like [`apply`](Self::apply), but keyed to a source event for
    /// exactly-once application: the first call for a given
    /// `(event_id, achievement_id)` applies the delta and returns
    /// `Some`; any later call (a replay) is a no-op returning `None`.
    /// The dedup marker commits in the same transaction as the write.
    async fn apply_for_event(
        &self,
        user_id: u64,
        achievement_id: i64,
        delta: &ProgressDelta,
        event_id: i64,
    ) -> Result<Option<(TransitionReport, AchievementProgress)>, StorageError>;

    /// Remove one progress row. Returns affected rows.
    async fn delete(&self, user_id: u64, achievement_id: i64) -> Result<u64, StorageError>;

    async fn delete_all_for_user(&self, user_id: u64) -> Result<u64, StorageError>;

    /// Users whose fraction `current/target` is at least `threshold` but
    /// who have not completed yet; ops/admin query.
    async fn users_near_completion(
        &self,
        achievement_id: i64,
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<AchievementProgress>, StorageError>;
}
