//! Progress tracker: serialized apply and event evaluation.

use std::sync::Arc;
use tracing::{debug, instrument};

use crate::domain::errors::{EvaluatorError, StorageError};
use crate::domain::models::{
    Achievement, AchievementProgress, EventRecord, ProgressDelta, TransitionReport,
};
use crate::domain::ports::ProgressRepository;
use crate::services::evaluators::EvaluatorRegistry;
use crate::services::lock_table::LockTable;

/// Outcome of offering one event to one achievement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EventOutcome {
    /// The event did not affect this achievement.
    NotApplicable,
    /// Progress was applied; the report carries the threshold edge.
    Applied(TransitionReport),
    /// A replayed event whose delta already landed. `complete` lets the
    /// engine re-attempt the (idempotent) award in case the original run
    /// crashed between the progress commit and the award insert.
    AlreadyApplied { complete: bool },
}

pub struct ProgressTracker {
    progress: Arc<dyn ProgressRepository>,
    registry: Arc<EvaluatorRegistry>,
    locks: LockTable,
}

impl ProgressTracker {
    pub fn new(progress: Arc<dyn ProgressRepository>, registry: Arc<EvaluatorRegistry>) -> Self {
        Self {
            progress,
            registry,
            locks: LockTable::new(),
        }
    }

    /// Apply an explicit delta (admin/manual path). Serialized per
    /// `(user_id, achievement_id)`; the threshold edge is computed inside
    /// the same transaction that writes the value.
    #[instrument(skip(self, delta))]
    pub async fn apply(
        &self,
        user_id: u64,
        achievement_id: i64,
        delta: ProgressDelta,
    ) -> Result<(TransitionReport, AchievementProgress), StorageError> {
        let _guard = self.locks.acquire(user_id, achievement_id).await;
        self.progress.apply(user_id, achievement_id, &delta).await
    }

    /// Offer one event to one candidate achievement. The per-key lock
    /// spans the evaluator's read of prior state and the write, so
    /// concurrent events for the same pair cannot interleave.
    pub async fn apply_event(
        &self,
        achievement: &Achievement,
        event: &EventRecord,
    ) -> Result<Result<EventOutcome, EvaluatorError>, StorageError> {
        let Some(evaluator) = self.registry.get(achievement.achievement_type) else {
            return Ok(Err(EvaluatorError {
                achievement_id: achievement.id,
                message: format!(
                    "no evaluator registered for type {}",
                    achievement.achievement_type
                ),
            }));
        };

        let _guard = self.locks.acquire(event.user_id, achievement.id).await;

        let before = self.progress.get(event.user_id, achievement.id).await?;
        let delta = match evaluator.apply_event(achievement, event, before.as_ref()) {
            Ok(Some(delta)) => delta,
            Ok(None) => return Ok(Ok(EventOutcome::NotApplicable)),
            Err(e) => return Ok(Err(e)),
        };

        let Some((report, _)) = self
            .progress
            .apply_for_event(event.user_id, achievement.id, &delta, event.id)
            .await?
        else {
            // Replay of an event that already counted.
            let complete = before.as_ref().is_some_and(|p| evaluator.is_satisfied(p));
            return Ok(Ok(EventOutcome::AlreadyApplied { complete }));
        };
        debug!(
            user_id = event.user_id,
            achievement_id = achievement.id,
            current = report.current,
            crossed = report.crossed_threshold,
            "progress applied"
        );
        Ok(Ok(EventOutcome::Applied(report)))
    }

    pub async fn get_progress(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<Option<AchievementProgress>, StorageError> {
        self.progress.get(user_id, achievement_id).await
    }

    pub async fn list_user_progress(
        &self,
        user_id: u64,
    ) -> Result<Vec<AchievementProgress>, StorageError> {
        self.progress.list_for_user(user_id).await
    }

    /// Admin reset. Returns whether a row existed.
    pub async fn reset_progress(
        &self,
        user_id: u64,
        achievement_id: i64,
    ) -> Result<bool, StorageError> {
        let _guard = self.locks.acquire(user_id, achievement_id).await;
        Ok(self.progress.delete(user_id, achievement_id).await? > 0)
    }

    pub async fn users_near_completion(
        &self,
        achievement_id: i64,
        threshold: f64,
        limit: u32,
    ) -> Result<Vec<AchievementProgress>, StorageError> {
        self.progress
            .users_near_completion(achievement_id, threshold, limit)
            .await
    }
}
