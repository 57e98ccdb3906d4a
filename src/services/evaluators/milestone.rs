//! Milestone criteria: a single threshold on a named measure.

use super::Evaluator;
use crate::domain::errors::EvaluatorError;
use crate::domain::models::{
    event_types, Achievement, AchievementProgress, AchievementType, Criteria, EventRecord,
    ProgressDelta,
};

pub struct MilestoneEvaluator;

impl Evaluator for MilestoneEvaluator {
    fn achievement_type(&self) -> AchievementType {
        AchievementType::Milestone
    }

    fn candidate_event_types(&self) -> &'static [&'static str] {
        &[
            event_types::MESSAGE_SENT,
            event_types::REACTION_ADDED,
            event_types::VOICE_JOINED,
            event_types::COMMAND_USED,
        ]
    }

    fn apply_event(
        &self,
        achievement: &Achievement,
        event: &EventRecord,
        progress: Option<&AchievementProgress>,
    ) -> Result<Option<ProgressDelta>, EvaluatorError> {
        let Criteria::Milestone { milestone_type, .. } = &achievement.criteria else {
            return Err(EvaluatorError {
                achievement_id: achievement.id,
                message: "criteria is not a milestone".to_string(),
            });
        };

        let Some(value) = event.event_data.get(milestone_type).and_then(|v| v.as_f64()) else {
            return Ok(None);
        };

        // Milestones track the best measure seen; stale or lower readings
        // never move progress backwards.
        let current = progress.map_or(0.0, |p| p.current_value);
        if value <= current {
            return Ok(None);
        }
        Ok(Some(ProgressDelta::Set(value)))
    }
}
